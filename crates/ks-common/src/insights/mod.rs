pub mod fallback;
pub mod llm;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::finance::CashflowAnalysis;
use crate::sentiment::SentimentAnalysis;

pub use fallback::fallback_points;
pub use llm::{InsightsError, LlmClient, LlmConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointSource {
    Llm,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentPoint {
    pub title: String,
    pub description: String,
    pub source: PointSource,
}

/// 生成結果のメタデータ。`api_success` は HTTP 呼び出しの成否のみを表し、
/// `fallback_used` が true なら決定的ポイントが混ざっている。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightsMetadata {
    pub api_available: bool,
    pub api_success: bool,
    pub fallback_used: bool,
    pub generation_timestamp: DateTime<Utc>,
    pub points_count: usize,
    pub model_used: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentInsights {
    pub investment_points: Vec<InvestmentPoint>,
    pub metadata: InsightsMetadata,
}

const MIN_POINTS: usize = 3;
const MAX_POINTS: usize = 5;

/// 分析結果から投資家向けの短い箇条書きを作る。
///
/// API キー未設定・呼び出し失敗・応答の解析不足、いずれの場合も
/// フォールバックで埋めて必ず整形済みの結果を返す。
pub struct InsightsGenerator {
    client: Option<LlmClient>,
    config: LlmConfig,
}

impl InsightsGenerator {
    pub fn new(config: LlmConfig) -> Self {
        let client = if config.api_available() {
            match LlmClient::new(config.clone()) {
                Ok(client) => Some(client),
                Err(err) => {
                    warn!(error = %err, "llm client unavailable, insights will use fallback");
                    None
                }
            }
        } else {
            None
        };

        Self { client, config }
    }

    pub fn from_env() -> Self {
        Self::new(LlmConfig::from_env())
    }

    pub async fn generate(
        &self,
        company_name: Option<&str>,
        doc_description: Option<&str>,
        sentiment: Option<&SentimentAnalysis>,
        finance: Option<&CashflowAnalysis>,
    ) -> InvestmentInsights {
        let api_available = self.client.is_some();

        let mut points: Vec<InvestmentPoint> = Vec::new();
        let mut api_success = false;
        let mut error_message = None;

        if let Some(client) = &self.client {
            let prompt = build_prompt(company_name, doc_description, sentiment, finance);
            match client.complete(&prompt).await {
                Ok(text) => {
                    api_success = true;
                    points = parse_points(&text);
                    points.truncate(MAX_POINTS);
                }
                Err(err) => {
                    warn!(error = %err, "llm insights call failed, using fallback");
                    error_message = Some(err.to_string());
                }
            }
        }

        let mut fallback_used = false;
        if points.len() < MIN_POINTS {
            for candidate in fallback_points(sentiment, finance) {
                if points.len() >= MAX_POINTS {
                    break;
                }
                if points.iter().any(|p| p.title == candidate.title) {
                    continue;
                }
                points.push(candidate);
                fallback_used = true;
            }
        }

        let model_used = if api_success {
            self.config.model.clone()
        } else {
            "fallback".to_string()
        };

        InvestmentInsights {
            metadata: InsightsMetadata {
                api_available,
                api_success,
                fallback_used,
                generation_timestamp: Utc::now(),
                points_count: points.len(),
                model_used,
                error_message,
            },
            investment_points: points,
        }
    }
}

fn build_prompt(
    company_name: Option<&str>,
    doc_description: Option<&str>,
    sentiment: Option<&SentimentAnalysis>,
    finance: Option<&CashflowAnalysis>,
) -> String {
    let mut prompt = String::from(
        "あなたは日本株のアナリストです。以下の開示書類の自動分析結果をもとに、\
         個人投資家向けの投資ポイントを3〜5個、日本語で挙げてください。\n\
         各行は「タイトル: 説明」の形式で、1行1ポイントにしてください。\n\n",
    );

    if let Some(name) = company_name {
        prompt.push_str(&format!("対象企業: {name}\n"));
    }
    if let Some(description) = doc_description {
        prompt.push_str(&format!("書類: {description}\n"));
    }

    if let Some(analysis) = sentiment {
        prompt.push_str(&format!(
            "\n感情分析: スコア {:.2} ({})\n",
            analysis.score,
            analysis.label.as_str()
        ));
        let keywords: Vec<&str> = analysis
            .top_positive
            .iter()
            .chain(analysis.top_negative.iter())
            .take(6)
            .map(|c| c.term.as_str())
            .collect();
        if !keywords.is_empty() {
            prompt.push_str(&format!("特徴語: {}\n", keywords.join("、")));
        }
        for highlight in analysis.highlights.iter().take(3) {
            prompt.push_str(&format!("例文: {}\n", highlight.sentence));
        }
    }

    if let Some(analysis) = finance {
        prompt.push_str(&format!(
            "\n財務診断: 健全性スコア {:.0}/100、CFパターン {}、リスク {}\n",
            analysis.health_score,
            analysis.pattern.label_ja(),
            analysis.risk.as_str()
        ));
    }

    prompt
}

/// 「タイトル: 説明」形式の行を抽出する。箇条書き記号と番号は剥がす。
fn parse_points(text: &str) -> Vec<InvestmentPoint> {
    text.lines()
        .filter_map(|line| {
            let mut cleaned = line.trim();
            for prefix in ["-", "・", "*", "●"] {
                cleaned = cleaned.strip_prefix(prefix).unwrap_or(cleaned).trim_start();
            }
            // 「1.」「2)」のような番号を剥がす
            let cleaned = cleaned
                .trim_start_matches(|c: char| c.is_ascii_digit())
                .trim_start_matches(['.', ')', '）'])
                .trim_start();

            let (title, description) = cleaned
                .split_once('：')
                .or_else(|| cleaned.split_once(':'))?;

            let title = title.trim();
            let description = description.trim();
            if title.is_empty() || description.is_empty() {
                return None;
            }

            Some(InvestmentPoint {
                title: title.to_string(),
                description: description.to_string(),
                source: PointSource::Llm,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_title_description_lines() {
        let text = "1. 増収基調: 売上高は前年を上回って推移しています。\n\
                    - 財務健全性：自己資本比率が高く資金繰りに余裕があります。\n\
                    この行は形式に合わない\n";
        let points = parse_points(text);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].title, "増収基調");
        assert_eq!(points[1].title, "財務健全性");
        assert!(points.iter().all(|p| p.source == PointSource::Llm));
    }

    #[test]
    fn empty_titles_are_rejected(){
        let points = parse_points("：説明だけ\nタイトルだけ：\n");
        assert!(points.is_empty());
    }

    #[tokio::test]
    async fn no_api_key_returns_pure_fallback() {
        let generator = InsightsGenerator::new(LlmConfig::default());
        let insights = generator.generate(None, None, None, None).await;

        assert!(!insights.metadata.api_available);
        assert!(!insights.metadata.api_success);
        assert!(insights.metadata.fallback_used);
        assert_eq!(insights.metadata.model_used, "fallback");
        assert!(insights.investment_points.len() >= 3);
        assert_eq!(
            insights.metadata.points_count,
            insights.investment_points.len()
        );
    }

    #[test]
    fn prompt_mentions_score_and_keywords() {
        let sentiment = crate::sentiment::SentimentAnalysis::neutral_empty();
        let prompt = build_prompt(Some("トヨタ自動車"), Some("有価証券報告書"), Some(&sentiment), None);
        assert!(prompt.contains("トヨタ自動車"));
        assert!(prompt.contains("感情分析"));
        assert!(prompt.contains("タイトル: 説明"));
    }
}
