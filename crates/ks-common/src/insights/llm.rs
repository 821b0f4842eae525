use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InsightsError {
    #[error("llm request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("llm response malformed: {0}")]
    BadResponse(String),
    #[error("llm api error (status {status}): {body}")]
    Api { status: u16, body: String },
}

fn provider_defaults(provider: &str) -> (&'static str, &'static str) {
    match provider.to_ascii_lowercase().as_str() {
        "anthropic" => (
            "claude-3-5-haiku-20241022",
            "https://api.anthropic.com/v1/messages",
        ),
        "deepseek" => ("deepseek-chat", "https://api.deepseek.com/chat/completions"),
        _ => ("gpt-4o-mini", "https://api.openai.com/v1/chat/completions"),
    }
}

fn provider_api_key(provider: &str) -> Option<String> {
    match provider.to_ascii_lowercase().as_str() {
        "anthropic" => std::env::var("ANTHROPIC_API_KEY").ok(),
        "deepseek" => std::env::var("DEEPSEEK_API_KEY").ok(),
        _ => std::env::var("OPENAI_API_KEY").ok(),
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let (model, endpoint) = provider_defaults("openai");
        Self {
            provider: "openai".into(),
            model: model.into(),
            endpoint: endpoint.into(),
            api_key: None,
            timeout_secs: 30,
            max_tokens: 1024,
        }
    }
}

impl LlmConfig {
    pub fn from_env() -> Self {
        let provider = std::env::var("KS_LLM_PROVIDER").unwrap_or_else(|_| "openai".into());
        let (default_model, default_endpoint) = provider_defaults(&provider);

        Self {
            model: std::env::var("KS_LLM_MODEL").unwrap_or_else(|_| default_model.into()),
            endpoint: std::env::var("KS_LLM_ENDPOINT").unwrap_or_else(|_| default_endpoint.into()),
            api_key: std::env::var("KS_LLM_API_KEY")
                .ok()
                .or_else(|| provider_api_key(&provider)),
            timeout_secs: std::env::var("KS_LLM_TIMEOUT_SECS")
                .ok()
                .and_then(|raw| raw.parse::<u64>().ok())
                .unwrap_or(30),
            max_tokens: 1024,
            provider,
        }
    }

    pub fn api_available(&self) -> bool {
        self.api_key.is_some()
    }

    fn is_anthropic(&self) -> bool {
        self.provider.eq_ignore_ascii_case("anthropic")
    }
}

/// 最小限のテキスト補完クライアント。OpenAI 互換 chat と Anthropic messages に対応。
pub struct LlmClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self, InsightsError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    pub async fn complete(&self, prompt: &str) -> Result<String, InsightsError> {
        let api_key = self.config.api_key.as_deref().unwrap_or_default();

        let (request, extract): (_, fn(&Value) -> Option<String>) = if self.config.is_anthropic() {
            let body = json!({
                "model": self.config.model,
                "max_tokens": self.config.max_tokens,
                "messages": [{"role": "user", "content": prompt}],
            });
            let request = self
                .http
                .post(&self.config.endpoint)
                .header("x-api-key", api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&body);
            (request, |value: &Value| {
                value["content"][0]["text"].as_str().map(str::to_string)
            })
        } else {
            let body = json!({
                "model": self.config.model,
                "max_tokens": self.config.max_tokens,
                "messages": [{"role": "user", "content": prompt}],
            });
            let request = self
                .http
                .post(&self.config.endpoint)
                .bearer_auth(api_key)
                .json(&body);
            (request, |value: &Value| {
                value["choices"][0]["message"]["content"]
                    .as_str()
                    .map(str::to_string)
            })
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let mut truncated = body;
            truncated.truncate(500);
            return Err(InsightsError::Api {
                status: status.as_u16(),
                body: truncated,
            });
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| InsightsError::BadResponse(e.to_string()))?;

        extract(&value)
            .ok_or_else(|| InsightsError::BadResponse("no completion text in response".into()))
    }
}
