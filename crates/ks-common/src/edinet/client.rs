use std::time::{Duration, Instant};

use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::models::{DocumentListResponse, EdinetDocument};

const DEFAULT_BASE_URL: &str = "https://api.edinet-fsa.go.jp/api/v2";
const DEFAULT_USER_AGENT: &str = concat!("kaiseki/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum EdinetError {
    #[error("EDINET unavailable: {0}")]
    Unavailable(String),
    #[error("EDINET rejected credentials (status {status})")]
    Auth { status: u16 },
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("unexpected EDINET response: {0}")]
    BadResponse(String),
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// 取得する書類の形式。EDINET v2 の `type` クエリに対応。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFetchType {
    /// XBRL 一式の ZIP
    Archive,
    Pdf,
    Csv,
}

impl DocumentFetchType {
    pub fn as_query(&self) -> u8 {
        match self {
            DocumentFetchType::Archive => 1,
            DocumentFetchType::Pdf => 2,
            DocumentFetchType::Csv => 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EdinetConfig {
    pub base_url: String,
    pub subscription_key: Option<String>,
    /// API 呼び出し間の最小間隔
    pub min_interval: Duration,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for EdinetConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            subscription_key: None,
            min_interval: Duration::from_secs(2),
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(60),
            user_agent: DEFAULT_USER_AGENT.into(),
        }
    }
}

impl EdinetConfig {
    pub fn from_env() -> Self {
        fn parse_secs(key: &str) -> Option<Duration> {
            std::env::var(key)
                .ok()
                .and_then(|raw| raw.parse::<f64>().ok())
                .filter(|v| *v >= 0.0)
                .map(Duration::from_secs_f64)
        }

        let defaults = Self::default();
        Self {
            base_url: std::env::var("KS_EDINET_BASE_URL").unwrap_or(defaults.base_url),
            subscription_key: std::env::var("KS_EDINET_SUBSCRIPTION_KEY").ok(),
            min_interval: parse_secs("KS_EDINET_MIN_INTERVAL_SECS").unwrap_or(defaults.min_interval),
            max_attempts: std::env::var("KS_EDINET_MAX_ATTEMPTS")
                .ok()
                .and_then(|raw| raw.parse::<u32>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.max_attempts),
            base_delay: parse_secs("KS_EDINET_RETRY_BASE_SECS").unwrap_or(defaults.base_delay),
            request_timeout: parse_secs("KS_EDINET_TIMEOUT_SECS")
                .unwrap_or(defaults.request_timeout),
            user_agent: defaults.user_agent,
        }
    }
}

/// EDINET v2 API クライアント。呼び出し間隔の強制と指数バックオフ付き。
pub struct EdinetClient {
    http: reqwest::Client,
    config: EdinetConfig,
    last_call: Mutex<Option<Instant>>,
}

impl EdinetClient {
    pub fn new(config: EdinetConfig) -> Result<Self, EdinetError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("ja,en;q=0.8"));

        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            config,
            last_call: Mutex::new(None),
        })
    }

    /// 書類一覧の取得。`doc_type=2` で提出書類一覧＋メタデータ。
    pub async fn list_documents(
        &self,
        date: NaiveDate,
        doc_type: u8,
    ) -> Result<Vec<EdinetDocument>, EdinetError> {
        let url = format!("{}/documents.json", self.config.base_url);
        let date_param = date.format("%Y-%m-%d").to_string();

        let mut last_failure = String::from("no attempts made");
        for attempt in 0..self.config.max_attempts {
            self.pace().await;

            let mut request = self
                .http
                .get(&url)
                .query(&[("date", date_param.as_str())])
                .query(&[("type", doc_type)]);
            if let Some(key) = &self.config.subscription_key {
                request = request.query(&[("Subscription-Key", key.as_str())]);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        return Err(EdinetError::Auth {
                            status: status.as_u16(),
                        });
                    }
                    if status.is_success() {
                        let parsed: DocumentListResponse = response.json().await.map_err(|e| {
                            EdinetError::BadResponse(format!("list payload is not JSON: {e}"))
                        })?;
                        debug!(
                            date = %date_param,
                            count = parsed.results.len(),
                            "edinet_list_fetched"
                        );
                        return Ok(parsed.results);
                    }

                    last_failure = format!("status {status} for {date_param}");
                    warn!(attempt, %status, date = %date_param, "edinet_list_retryable");
                }
                Err(err) => {
                    last_failure = format!("request error: {err}");
                    warn!(attempt, error = %err, date = %date_param, "edinet_list_request_failed");
                }
            }

            self.backoff(attempt).await;
        }

        Err(EdinetError::Unavailable(last_failure))
    }

    /// 書類取得。ZIP/PDF/CSV のバイト列をそのまま返す。
    pub async fn fetch_document(
        &self,
        doc_id: &str,
        fetch_type: DocumentFetchType,
    ) -> Result<Vec<u8>, EdinetError> {
        let url = format!("{}/documents/{}", self.config.base_url, doc_id);

        let mut last_failure = String::from("no attempts made");
        for attempt in 0..self.config.max_attempts {
            self.pace().await;

            let mut request = self
                .http
                .get(&url)
                .query(&[("type", fetch_type.as_query())]);
            if let Some(key) = &self.config.subscription_key {
                request = request.query(&[("Subscription-Key", key.as_str())]);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    match status {
                        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                            return Err(EdinetError::Auth {
                                status: status.as_u16(),
                            });
                        }
                        StatusCode::NOT_FOUND => {
                            return Err(EdinetError::NotFound(doc_id.to_string()));
                        }
                        status if status.is_success() => {
                            let bytes = response
                                .bytes()
                                .await
                                .map_err(|e| EdinetError::Unavailable(e.to_string()))?;
                            debug!(doc_id, size = bytes.len(), "edinet_document_fetched");
                            return Ok(bytes.to_vec());
                        }
                        status => {
                            last_failure = format!("status {status} for {doc_id}");
                            warn!(attempt, %status, doc_id, "edinet_fetch_retryable");
                        }
                    }
                }
                Err(err) => {
                    last_failure = format!("request error: {err}");
                    warn!(attempt, error = %err, doc_id, "edinet_fetch_request_failed");
                }
            }

            self.backoff(attempt).await;
        }

        Err(EdinetError::Unavailable(last_failure))
    }

    async fn pace(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.config.min_interval {
                tokio::time::sleep(self.config.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn backoff(&self, attempt: u32) {
        if attempt + 1 >= self.config.max_attempts {
            return;
        }
        let delay = self.config.base_delay * 2u32.saturating_pow(attempt);
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_type_maps_to_query_values() {
        assert_eq!(DocumentFetchType::Archive.as_query(), 1);
        assert_eq!(DocumentFetchType::Pdf.as_query(), 2);
        assert_eq!(DocumentFetchType::Csv.as_query(), 5);
    }

    #[test]
    fn default_config_paces_at_two_seconds() {
        let config = EdinetConfig::default();
        assert_eq!(config.min_interval, Duration::from_secs(2));
        assert_eq!(config.max_attempts, 3);
    }

    #[tokio::test]
    async fn client_builds_without_network() {
        let client = EdinetClient::new(EdinetConfig::default());
        assert!(client.is_ok());
    }
}
