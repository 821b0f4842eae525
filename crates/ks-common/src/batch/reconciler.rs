use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::{NaiveTime, Utc};
use rand::Rng;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::db::{
    claim_batch, complete_batch, deactivate_unreferenced, fail_batch, list_company_candidates,
    sync_companies, upsert_document_batch, BatchClaim, BatchStoreError, ChunkStats, CompanyRecord,
    CompanyStoreError, CompanySyncStats, DocumentRecord, DocumentStoreError, PgPool,
};
use crate::edinet::{EdinetClient, EdinetDocument, EdinetError};
use crate::timezone::jst_now;

use super::target_date::{
    resolve_target_date, AutoDateMode, DateSelection, TargetDateError,
};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    TargetDate(#[from] TargetDateError),
    #[error("edinet list failed: {0}")]
    Edinet(#[from] EdinetError),
    #[error("batch bookkeeping failed: {0}")]
    Batch(#[from] BatchStoreError),
    #[error("document upsert failed: {0}")]
    Documents(#[from] DocumentStoreError),
    #[error("company sync failed: {0}")]
    Companies(#[from] CompanyStoreError),
}

/// 企業マスタ更新のモード。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompanyUpdateMode {
    Skip,
    /// 当日取得分の書類（縦覧中のみ）から差分更新
    Incremental,
    /// ストア内の全書類から引き直し、参照切れを inactive 化
    Full,
}

impl CompanyUpdateMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompanyUpdateMode::Skip => "skip",
            CompanyUpdateMode::Incremental => "incremental",
            CompanyUpdateMode::Full => "full",
        }
    }
}

impl FromStr for CompanyUpdateMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "skip" => Ok(CompanyUpdateMode::Skip),
            "incremental" => Ok(CompanyUpdateMode::Incremental),
            "full" => Ok(CompanyUpdateMode::Full),
            other => Err(format!("unknown company update mode: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub date: DateSelection,
    pub auto_date_mode: AutoDateMode,
    pub night_batch_time: NaiveTime,
    pub force: bool,
    pub chunk_size: usize,
    pub retry_count: u32,
    pub db_retry_count: u32,
    pub stop_on_error: bool,
    pub company_update_mode: CompanyUpdateMode,
    pub send_notification: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            date: DateSelection::Auto,
            auto_date_mode: AutoDateMode::TimeBased,
            night_batch_time: NaiveTime::from_hms_opt(23, 0, 0).unwrap(),
            force: false,
            chunk_size: 100,
            retry_count: 3,
            db_retry_count: 3,
            stop_on_error: false,
            company_update_mode: CompanyUpdateMode::Incremental,
            send_notification: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub target_date: chrono::NaiveDate,
    pub listed: usize,
    pub inserted: u64,
    pub updated: u64,
    pub chunks_skipped: usize,
    pub companies_created: u64,
    pub companies_updated: u64,
    pub duration_ms: i64,
}

#[derive(Debug)]
pub enum BatchRun {
    Completed(BatchOutcome),
    /// 同日が SUCCESS 済みで `--force` なし。行は一切変更されない。
    SkippedAlreadySucceeded { batch_date: chrono::NaiveDate },
}

/// 日次取り込み本体。バッチ行の獲得からステータス確定までを面倒みる。
#[instrument(skip(pool, edinet, options))]
pub async fn run_daily_batch(
    pool: &PgPool,
    edinet: &EdinetClient,
    options: &BatchOptions,
) -> Result<BatchRun, BatchError> {
    let target_date = resolve_target_date(
        jst_now(),
        options.date,
        options.auto_date_mode,
        options.night_batch_time,
    )?;

    match claim_batch(pool, target_date, options.force).await? {
        BatchClaim::AlreadySucceeded(existing) => {
            warn!(
                batch_date = %target_date,
                processed = existing.processed_count,
                "batch already succeeded for this date; use --force to re-run"
            );
            return Ok(BatchRun::SkippedAlreadySucceeded {
                batch_date: target_date,
            });
        }
        BatchClaim::Claimed => {}
    }

    let started = Utc::now();
    match process(pool, edinet, options, target_date).await {
        Ok(mut outcome) => {
            outcome.duration_ms = (Utc::now() - started).num_milliseconds();
            complete_batch(pool, target_date, outcome.listed as i32).await?;
            emit_summary(&outcome, options.send_notification);
            Ok(BatchRun::Completed(outcome))
        }
        Err(err) => {
            if let Err(mark_err) = fail_batch(pool, target_date, &err.to_string()).await {
                warn!(error = %mark_err, "failed to record batch failure");
            }
            Err(err)
        }
    }
}

async fn process(
    pool: &PgPool,
    edinet: &EdinetClient,
    options: &BatchOptions,
    target_date: chrono::NaiveDate,
) -> Result<BatchOutcome, BatchError> {
    let documents = list_with_retries(edinet, target_date, options.retry_count).await?;
    info!(batch_date = %target_date, listed = documents.len(), "edinet documents listed");

    let records: Vec<DocumentRecord> = documents
        .iter()
        .filter_map(|doc| DocumentRecord::from_edinet(doc, target_date))
        .collect();

    let mut outcome = BatchOutcome {
        target_date,
        listed: documents.len(),
        ..Default::default()
    };

    for (index, chunk) in records.chunks(options.chunk_size.max(1)).enumerate() {
        match upsert_chunk_with_retries(pool, chunk, options.db_retry_count).await {
            Ok(stats) => {
                outcome.inserted += stats.inserted;
                outcome.updated += stats.updated;
            }
            Err(err) if options.stop_on_error => return Err(err.into()),
            Err(err) => {
                warn!(chunk = index, error = %err, "skipping chunk after retries");
                outcome.chunks_skipped += 1;
            }
        }
    }

    let company_stats =
        update_company_master(pool, &documents, options.company_update_mode).await?;
    outcome.companies_created = company_stats.created;
    outcome.companies_updated = company_stats.updated;

    Ok(outcome)
}

async fn list_with_retries(
    edinet: &EdinetClient,
    target_date: chrono::NaiveDate,
    retry_count: u32,
) -> Result<Vec<EdinetDocument>, BatchError> {
    let attempts = retry_count.max(1);
    let mut last_err = None;

    for attempt in 0..attempts {
        match edinet.list_documents(target_date, 2).await {
            Ok(documents) => return Ok(documents),
            Err(err @ EdinetError::Auth { .. }) => return Err(err.into()),
            Err(err) => {
                warn!(attempt, error = %err, "edinet list attempt failed");
                last_err = Some(err);
                if attempt + 1 < attempts {
                    tokio::time::sleep(StdDuration::from_secs(2u64.saturating_pow(attempt))).await;
                }
            }
        }
    }

    Err(last_err
        .map(BatchError::from)
        .unwrap_or_else(|| EdinetError::Unavailable("no attempts made".into()).into()))
}

/// デッドロック/ロック競合のみジッタ付きで再試行。その他のエラーは即時伝播。
async fn upsert_chunk_with_retries(
    pool: &PgPool,
    chunk: &[DocumentRecord],
    db_retry_count: u32,
) -> Result<ChunkStats, DocumentStoreError> {
    let attempts = db_retry_count.max(1);
    let mut attempt = 0u32;

    loop {
        match upsert_document_batch(pool, chunk).await {
            Ok(stats) => return Ok(stats),
            Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                let jitter = rand::thread_rng().gen_range(0..250u64);
                let backoff = 200u64.saturating_mul(2u64.saturating_pow(attempt)) + jitter;
                warn!(attempt, backoff_ms = backoff, "lock contention on chunk, retrying");
                tokio::time::sleep(StdDuration::from_millis(backoff)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn update_company_master(
    pool: &PgPool,
    documents: &[EdinetDocument],
    mode: CompanyUpdateMode,
) -> Result<CompanySyncStats, BatchError> {
    let candidates = match mode {
        CompanyUpdateMode::Skip => return Ok(CompanySyncStats::default()),
        CompanyUpdateMode::Incremental => incremental_candidates(documents),
        CompanyUpdateMode::Full => list_company_candidates(pool).await?,
    };

    let stats = sync_companies(pool, &candidates).await?;

    if mode == CompanyUpdateMode::Full {
        let deactivated = deactivate_unreferenced(pool).await?;
        if deactivated > 0 {
            info!(deactivated, "companies without documents marked inactive");
        }
    }

    Ok(stats)
}

/// 当日分の書類から (EDINETコード, 証券コード, 社名) の distinct を取る。
/// 縦覧中 (legal_status = 1) の書類のみが対象。
fn incremental_candidates(documents: &[EdinetDocument]) -> Vec<CompanyRecord> {
    let mut unique: BTreeMap<String, CompanyRecord> = BTreeMap::new();

    for doc in documents {
        if doc.legal_status_code() != 1 {
            continue;
        }
        let (Some(code), Some(name)) = (doc.edinet_code.as_deref(), doc.filer_name.as_deref())
        else {
            continue;
        };
        unique
            .entry(code.to_string())
            .or_insert_with(|| CompanyRecord::new(code, doc.sec_code.as_deref(), name));
    }

    unique.into_values().collect()
}

fn emit_summary(outcome: &BatchOutcome, send_notification: bool) {
    info!(
        batch_date = %outcome.target_date,
        listed = outcome.listed,
        inserted = outcome.inserted,
        updated = outcome.updated,
        chunks_skipped = outcome.chunks_skipped,
        companies_created = outcome.companies_created,
        companies_updated = outcome.companies_updated,
        duration_ms = outcome.duration_ms,
        "batch completed"
    );

    if send_notification {
        // 通知メールの送信自体は外部のリレーが担う。ここでは専用イベントを出すだけ。
        info!(
            batch_date = %outcome.target_date,
            listed = outcome.listed,
            inserted = outcome.inserted,
            updated = outcome.updated,
            chunks_skipped = outcome.chunks_skipped,
            "batch_summary_notification"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, code: &str, name: &str, legal: &str) -> EdinetDocument {
        EdinetDocument {
            doc_id: id.into(),
            edinet_code: Some(code.into()),
            sec_code: Some("72030".into()),
            filer_name: Some(name.into()),
            legal_status: Some(legal.into()),
            ..Default::default()
        }
    }

    #[test]
    fn incremental_candidates_are_distinct_and_viewable_only() {
        let documents = vec![
            doc("S100A000", "E01234", "トヨタ自動車株式会社", "1"),
            doc("S100A001", "E01234", "トヨタ自動車株式会社", "1"),
            doc("S100A002", "E05678", "ソニーグループ株式会社", "1"),
            doc("S100A003", "E09999", "縦覧終了株式会社", "0"),
        ];

        let candidates = incremental_candidates(&documents);
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().any(|c| c.edinet_code == "E01234"));
        assert!(candidates.iter().all(|c| c.edinet_code != "E09999"));
    }

    #[test]
    fn documents_without_codes_are_ignored() {
        let mut nameless = doc("S100A000", "E01234", "名無し", "1");
        nameless.filer_name = None;
        let candidates = incremental_candidates(&[nameless]);
        assert!(candidates.is_empty());
    }

    #[test]
    fn company_update_mode_parses() {
        assert_eq!(
            "incremental".parse::<CompanyUpdateMode>().unwrap(),
            CompanyUpdateMode::Incremental
        );
        assert_eq!(
            "skip".parse::<CompanyUpdateMode>().unwrap(),
            CompanyUpdateMode::Skip
        );
        assert!("partial".parse::<CompanyUpdateMode>().is_err());
    }

    #[test]
    fn default_options_match_operational_defaults() {
        let options = BatchOptions::default();
        assert_eq!(options.chunk_size, 100);
        assert_eq!(options.retry_count, 3);
        assert!(!options.force);
        assert_eq!(options.company_update_mode, CompanyUpdateMode::Incremental);
    }
}
