use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::db::{
    self, DocumentRecord, DocumentStoreError, FinancialDataRecord, FinancialStoreError,
    HistoryRecord, PeriodType, PgPool, SessionStoreError,
};
use crate::edinet::{DocumentFetchType, EdinetClient};
use crate::extraction::{self, ExtractionOutput, TableUnit};
use crate::finance::CashflowAnalysis;
use crate::insights::{InsightsGenerator, InvestmentInsights};
use crate::sentiment::{SentimentAnalysis, SentimentConfig, SentimentDictionary, SentimentEngine};

use super::integrate::{integrate, IntegratedVerdict};
use super::session::{AnalysisMode, SessionRecord, SessionSummary};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("document not found: {0}")]
    DocumentNotFound(String),
    #[error("session store error: {0}")]
    Sessions(#[from] SessionStoreError),
    #[error("document store error: {0}")]
    Documents(#[from] DocumentStoreError),
    #[error("financial store error: {0}")]
    Financials(#[from] FinancialStoreError),
    #[error("result serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// `start_analysis` の戻り値。
#[derive(Debug)]
pub enum StartOutcome {
    Started { session_id: Uuid },
    AlreadyAnalyzed { session_id: Uuid, result: Option<Value> },
}

/// セッションに保存される最終結果の形。JSON で往復しても数値が保たれる。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub doc_id: String,
    pub mode: AnalysisMode,
    pub sentiment: Option<SentimentAnalysis>,
    pub finance: Option<CashflowAnalysis>,
    pub integrated: IntegratedVerdict,
    pub insights: InvestmentInsights,
    pub table_unit: Option<TableUnit>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// 同一書類の再解析を抑止するウィンドウ
    pub reuse_window: Duration,
    pub sentiment: SentimentConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            reuse_window: Duration::hours(1),
            sentiment: SentimentConfig::default(),
        }
    }
}

/// 書類単位のセッション状態機械。
/// PENDING で作成し、バックグラウンドタスクが PROCESSING → 終端まで進める。
pub struct Orchestrator {
    pool: PgPool,
    edinet: Arc<EdinetClient>,
    dictionary: Arc<SentimentDictionary>,
    insights: Arc<InsightsGenerator>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        pool: PgPool,
        edinet: Arc<EdinetClient>,
        dictionary: Arc<SentimentDictionary>,
        insights: Arc<InsightsGenerator>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            pool,
            edinet,
            dictionary,
            insights,
            config,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 解析開始。再利用ウィンドウ内に COMPLETED があれば新規セッションは作らない。
    #[instrument(skip(self, user_ip))]
    pub async fn start_analysis(
        self: &Arc<Self>,
        doc_id: &str,
        mode: AnalysisMode,
        force: bool,
        user_ip: Option<&str>,
    ) -> Result<StartOutcome, OrchestratorError> {
        let Some(document) = db::get_document(&self.pool, doc_id).await? else {
            return Err(OrchestratorError::DocumentNotFound(doc_id.to_string()));
        };

        if !force {
            if let Some(existing) = db::find_recent_completed(
                &self.pool,
                doc_id,
                self.config.reuse_window,
                Utc::now(),
            )
            .await?
            {
                info!(doc_id, session_id = %existing.session_id, "reusing recent completed session");
                return Ok(StartOutcome::AlreadyAnalyzed {
                    session_id: existing.session_id,
                    result: existing.result,
                });
            }
        }

        let session = SessionRecord::new(doc_id, mode, user_ip);
        let session_id = session.session_id;
        db::create_session(&self.pool, &session).await?;

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_pipeline(session_id, document, mode).await;
        });

        Ok(StartOutcome::Started { session_id })
    }

    /// パイプライン本体。失敗はセッションの FAILED 遷移に変換され、呼び出し元には漏れない。
    #[instrument(skip(self, document), fields(doc_id = %document.doc_id))]
    pub async fn run_pipeline(&self, session_id: Uuid, document: DocumentRecord, mode: AnalysisMode) {
        let started = Instant::now();
        if let Err(err) = self.execute(session_id, &document, mode, started).await {
            error!(session_id = %session_id, error = %err, "analysis pipeline failed");
            if let Err(mark_err) = db::fail_session(&self.pool, session_id, &err.to_string()).await
            {
                error!(session_id = %session_id, error = %mark_err, "failed to mark session failed");
            }
        }
    }

    async fn execute(
        &self,
        session_id: Uuid,
        document: &DocumentRecord,
        mode: AnalysisMode,
        started: Instant,
    ) -> Result<(), OrchestratorError> {
        db::mark_processing(&self.pool, session_id, 5, "init").await?;

        let extraction = self.fetch_and_extract(document).await;
        db::update_progress(&self.pool, session_id, 20, "extracted").await?;

        let sections = if extraction.sections.is_empty() {
            synthesize_sections(document)
        } else {
            extraction.sections.clone()
        };

        let engine = SentimentEngine::new(&self.dictionary, self.config.sentiment.clone());
        let sentiment = engine.analyze_sections(&sections);
        db::update_progress(&self.pool, session_id, 35, "sentiment").await?;

        let finance = if mode == AnalysisMode::Comprehensive && !extraction.financials.is_empty() {
            Some(crate::finance::analyze(&extraction.financials))
        } else {
            None
        };
        db::update_progress(&self.pool, session_id, 55, "finance").await?;

        if mode == AnalysisMode::Comprehensive && !extraction.financials.is_empty() {
            let record = FinancialDataRecord::from_extraction(
                &document.doc_id,
                document.edinet_code.as_deref(),
                PeriodType::from_doc_type_code(document.doc_type_code.as_deref()),
                extraction.period.as_ref(),
                &extraction.financials,
                extraction.extraction_confidence(),
            );
            db::upsert_financial_data(&self.pool, &record).await?;
        }
        db::update_progress(&self.pool, session_id, 70, "persisted").await?;

        let integrated = integrate(Some(&sentiment), finance.as_ref());
        db::update_progress(&self.pool, session_id, 85, "integrated").await?;

        // LLM 由来の肉付けは常に非致命。生成器側がフォールバックを保証する。
        let insights = self
            .insights
            .generate(
                document.filer_name.as_deref(),
                document.doc_description.as_deref(),
                Some(&sentiment),
                finance.as_ref(),
            )
            .await;

        let result = AnalysisResult {
            doc_id: document.doc_id.clone(),
            mode,
            sentiment: Some(sentiment),
            finance,
            integrated,
            insights,
            table_unit: extraction.table_unit,
            generated_at: Utc::now(),
        };

        let summary = SessionSummary {
            overall_score: result.integrated.overall_score,
            risk_level: Some(result.integrated.risk.as_str().to_string()),
            investment_stance: Some(result.integrated.stance.as_str().to_string()),
            cf_pattern: Some(result.integrated.cf_pattern.as_str().to_string()),
            financial_snapshot: Some(serde_json::to_value(&extraction.financials)?),
        };

        let result_json = serde_json::to_value(&result)?;
        db::complete_session(&self.pool, session_id, &result_json, &summary).await?;

        let history = HistoryRecord {
            doc_id: document.doc_id.clone(),
            overall_score: result.integrated.overall_score,
            sentiment_label: result
                .sentiment
                .as_ref()
                .map(|s| s.label.as_str().to_string()),
            risk_level: Some(result.integrated.risk.as_str().to_string()),
            cf_pattern: Some(result.integrated.cf_pattern.as_str().to_string()),
            duration_ms: Some(started.elapsed().as_millis() as i64),
            data_quality: Some(extraction.financials.completeness()),
        };
        if let Err(err) = db::insert_history(&self.pool, &history).await {
            warn!(session_id = %session_id, error = %err, "failed to append analysis history");
        }

        info!(
            session_id = %session_id,
            doc_id = %document.doc_id,
            duration_ms = started.elapsed().as_millis() as u64,
            "analysis completed"
        );
        Ok(())
    }

    /// 書類アーカイブの取得と抽出。上流都合の失敗は空の抽出結果に落とす。
    async fn fetch_and_extract(&self, document: &DocumentRecord) -> ExtractionOutput {
        let fetch_type = if document.has_xbrl {
            DocumentFetchType::Archive
        } else if document.has_pdf {
            DocumentFetchType::Pdf
        } else {
            warn!(doc_id = %document.doc_id, "document has neither xbrl nor pdf");
            return ExtractionOutput::default();
        };

        let bytes = match self.edinet.fetch_document(&document.doc_id, fetch_type).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(doc_id = %document.doc_id, error = %err, "document fetch failed; continuing with metadata only");
                return ExtractionOutput::default();
            }
        };

        match extraction::extract_archive(&bytes) {
            Ok(output) => output,
            Err(err) => {
                warn!(doc_id = %document.doc_id, error = %err, "archive extraction failed");
                ExtractionOutput::default()
            }
        }
    }
}

/// 抽出が全滅したときの代替テキスト。書類メタデータから最低限の説明文を作り、
/// 後続の感情・統合ステップを空入力で止めない。
fn synthesize_sections(document: &DocumentRecord) -> BTreeMap<String, String> {
    let mut text = String::new();
    if let Some(name) = &document.filer_name {
        text.push_str(name);
        text.push('。');
    }
    if let Some(description) = &document.doc_description {
        text.push_str(description);
        text.push('。');
    }
    if text.is_empty() {
        text = format!("書類 {} の本文は取得できませんでした。", document.doc_id);
    }

    let mut sections = BTreeMap::new();
    sections.insert("書類概要".to_string(), text);
    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn document_fixture() -> DocumentRecord {
        DocumentRecord {
            doc_id: "S100A000".into(),
            edinet_code: Some("E01234".into()),
            sec_code: Some("72030".into()),
            filer_name: Some("テスト株式会社".into()),
            doc_type_code: Some("120".into()),
            period_start: None,
            period_end: None,
            submit_datetime: None,
            file_date: NaiveDate::from_ymd_opt(2024, 5, 15).unwrap(),
            doc_description: Some("有価証券報告書".into()),
            has_xbrl: true,
            has_pdf: false,
            has_csv: false,
            has_attachments: false,
            has_english: false,
            legal_status: 1,
            withdrawal_status: 0,
            doc_info_edit_status: 0,
            disclosure_status: 0,
        }
    }

    #[test]
    fn synthesized_sections_carry_metadata() {
        let sections = synthesize_sections(&document_fixture());
        let body = sections.get("書類概要").unwrap();
        assert!(body.contains("テスト株式会社"));
        assert!(body.contains("有価証券報告書"));
    }

    #[test]
    fn synthesized_sections_fall_back_to_doc_id() {
        let mut document = document_fixture();
        document.filer_name = None;
        document.doc_description = None;
        let sections = synthesize_sections(&document);
        assert!(sections.get("書類概要").unwrap().contains("S100A000"));
    }

    #[test]
    fn analysis_result_round_trips_through_json() {
        let sentiment = SentimentAnalysis::neutral_empty();
        let finance = crate::finance::analyze(&crate::extraction::FinancialFacts {
            operating_cf: Some(100),
            investing_cf: Some(-50),
            financing_cf: Some(-30),
            net_sales: Some(1000),
            operating_income: Some(80),
            net_income: Some(50),
            total_assets: Some(500),
            net_assets: Some(300),
            ..Default::default()
        });
        let integrated = integrate(Some(&sentiment), Some(&finance));

        let result = AnalysisResult {
            doc_id: "S100A000".into(),
            mode: AnalysisMode::Comprehensive,
            sentiment: Some(sentiment),
            finance: Some(finance),
            integrated,
            insights: InvestmentInsights {
                investment_points: Vec::new(),
                metadata: crate::insights::InsightsMetadata {
                    api_available: false,
                    api_success: false,
                    fallback_used: true,
                    generation_timestamp: Utc::now(),
                    points_count: 0,
                    model_used: "fallback".into(),
                    error_message: None,
                },
            },
            table_unit: Some(TableUnit::Million),
            generated_at: Utc::now(),
        };

        let json = serde_json::to_value(&result).unwrap();
        let decoded: AnalysisResult = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, result);
    }
}
