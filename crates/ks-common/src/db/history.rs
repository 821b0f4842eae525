use deadpool_postgres::PoolError;
use tokio_postgres::Error as PgError;
use tracing::instrument;

use crate::db::util::TimedClientExt;
use crate::db::PgPool;

#[derive(Debug, thiserror::Error)]
pub enum HistoryStoreError {
    #[error("failed to get postgres connection: {0}")]
    Pool(#[from] PoolError),
    #[error("postgres error: {0}")]
    Postgres(#[from] PgError),
}

/// セッション完了時点の追記専用スナップショット。
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub doc_id: String,
    pub overall_score: Option<f64>,
    pub sentiment_label: Option<String>,
    pub risk_level: Option<String>,
    pub cf_pattern: Option<String>,
    pub duration_ms: Option<i64>,
    pub data_quality: Option<f64>,
}

#[instrument(skip(pool, record), fields(doc_id = %record.doc_id))]
pub async fn insert_history(
    pool: &PgPool,
    record: &HistoryRecord,
) -> Result<(), HistoryStoreError> {
    let client = pool.get().await?;
    client
        .timed_execute(
            "INSERT INTO kaiseki.analysis_history (\
                doc_id, overall_score, sentiment_label, risk_level, cf_pattern, \
                duration_ms, data_quality\
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)",
            &[
                &record.doc_id,
                &record.overall_score,
                &record.sentiment_label,
                &record.risk_level,
                &record.cf_pattern,
                &record.duration_ms,
                &record.data_quality,
            ],
            "history.insert",
        )
        .await?;
    Ok(())
}
