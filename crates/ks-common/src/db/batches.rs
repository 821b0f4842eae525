use chrono::{DateTime, NaiveDate, Utc};
use deadpool_postgres::PoolError;
use tokio_postgres::{Error as PgError, Row};
use tracing::instrument;

use crate::db::util::TimedClientExt;
use crate::db::PgPool;

/// エラーメッセージの保存上限。トレースバック込みでも暴れないように切る。
const ERROR_TEXT_LIMIT: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum BatchStoreError {
    #[error("failed to get postgres connection: {0}")]
    Pool(#[from] PoolError),
    #[error("postgres error: {0}")]
    Postgres(#[from] PgError),
    #[error("failed to map batch row: {0}")]
    Mapping(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Running,
    Success,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Running => "running",
            BatchStatus::Success => "success",
            BatchStatus::Failed => "failed",
        }
    }
}

fn parse_status(value: &str) -> Result<BatchStatus, BatchStoreError> {
    match value {
        "running" => Ok(BatchStatus::Running),
        "success" => Ok(BatchStatus::Success),
        "failed" => Ok(BatchStatus::Failed),
        other => Err(BatchStoreError::Mapping(format!(
            "unknown batch status: {other}"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchExecutionRecord {
    pub batch_date: NaiveDate,
    pub status: BatchStatus,
    pub processed_count: i32,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

fn row_to_batch(row: &Row) -> Result<BatchExecutionRecord, BatchStoreError> {
    Ok(BatchExecutionRecord {
        batch_date: row.try_get("batch_date")?,
        status: parse_status(row.try_get::<_, String>("status")?.as_str())?,
        processed_count: row.try_get("processed_count")?,
        error_message: row.try_get("error_message")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

/// `claim_batch` の結果。SUCCESS 済みで force なしなら既存レコードを返す。
#[derive(Debug)]
pub enum BatchClaim {
    Claimed,
    AlreadySucceeded(BatchExecutionRecord),
}

/// バッチ実行行の獲得。1日1行・同時実行1本を FOR UPDATE で保証する。
#[instrument(skip(pool))]
pub async fn claim_batch(
    pool: &PgPool,
    batch_date: NaiveDate,
    force: bool,
) -> Result<BatchClaim, BatchStoreError> {
    let mut client = pool.get().await?;
    let tx = client.transaction().await?;

    let row = tx
        .query_opt(
            "SELECT batch_date, status, processed_count, error_message, started_at, completed_at \
             FROM kaiseki.batch_executions WHERE batch_date = $1 FOR UPDATE",
            &[&batch_date],
        )
        .await?;

    match row {
        None => {
            tx.execute(
                "INSERT INTO kaiseki.batch_executions (batch_date, status, started_at) \
                 VALUES ($1, 'running', NOW())",
                &[&batch_date],
            )
            .await?;
        }
        Some(row) => {
            let existing = row_to_batch(&row)?;
            if existing.status == BatchStatus::Success && !force {
                tx.commit().await?;
                return Ok(BatchClaim::AlreadySucceeded(existing));
            }
            tx.execute(
                "UPDATE kaiseki.batch_executions SET \
                    status = 'running', \
                    processed_count = 0, \
                    error_message = NULL, \
                    started_at = NOW(), \
                    completed_at = NULL \
                 WHERE batch_date = $1",
                &[&batch_date],
            )
            .await?;
        }
    }

    tx.commit().await?;
    Ok(BatchClaim::Claimed)
}

#[instrument(skip(pool))]
pub async fn complete_batch(
    pool: &PgPool,
    batch_date: NaiveDate,
    processed_count: i32,
) -> Result<(), BatchStoreError> {
    let client = pool.get().await?;
    client
        .timed_execute(
            "UPDATE kaiseki.batch_executions SET \
                status = 'success', processed_count = $2, completed_at = NOW() \
             WHERE batch_date = $1",
            &[&batch_date, &processed_count],
            "batches.complete",
        )
        .await?;
    Ok(())
}

#[instrument(skip(pool, error))]
pub async fn fail_batch(
    pool: &PgPool,
    batch_date: NaiveDate,
    error: &str,
) -> Result<(), BatchStoreError> {
    let truncated: String = error.chars().take(ERROR_TEXT_LIMIT).collect();
    let client = pool.get().await?;
    client
        .timed_execute(
            "UPDATE kaiseki.batch_executions SET \
                status = 'failed', error_message = $2, completed_at = NOW() \
             WHERE batch_date = $1",
            &[&batch_date, &truncated],
            "batches.fail",
        )
        .await?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_batch(
    pool: &PgPool,
    batch_date: NaiveDate,
) -> Result<Option<BatchExecutionRecord>, BatchStoreError> {
    let client = pool.get().await?;
    let row = client
        .timed_query_opt(
            "SELECT batch_date, status, processed_count, error_message, started_at, completed_at \
             FROM kaiseki.batch_executions WHERE batch_date = $1",
            &[&batch_date],
            "batches.get",
        )
        .await?;
    row.as_ref().map(row_to_batch).transpose()
}
