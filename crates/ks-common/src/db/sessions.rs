use chrono::{DateTime, Duration, Utc};
use deadpool_postgres::PoolError;
use serde_json::Value;
use tokio_postgres::{Error as PgError, Row};
use tracing::instrument;
use uuid::Uuid;

use crate::analysis::session::{AnalysisMode, SessionRecord, SessionStatus, SessionSummary};
use crate::db::util::TimedClientExt;
use crate::db::PgPool;

const ERROR_TEXT_LIMIT: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("failed to get postgres connection: {0}")]
    Pool(#[from] PoolError),
    #[error("postgres error: {0}")]
    Postgres(#[from] PgError),
    #[error("failed to map session row: {0}")]
    Mapping(String),
    #[error("session not found: {0}")]
    NotFound(Uuid),
}

fn parse_status(value: &str) -> Result<SessionStatus, SessionStoreError> {
    match value {
        "pending" => Ok(SessionStatus::Pending),
        "processing" => Ok(SessionStatus::Processing),
        "completed" => Ok(SessionStatus::Completed),
        "failed" => Ok(SessionStatus::Failed),
        other => Err(SessionStoreError::Mapping(format!(
            "unknown session status: {other}"
        ))),
    }
}

fn parse_mode(value: &str) -> Result<AnalysisMode, SessionStoreError> {
    match value {
        "sentiment" => Ok(AnalysisMode::Sentiment),
        "comprehensive" => Ok(AnalysisMode::Comprehensive),
        other => Err(SessionStoreError::Mapping(format!(
            "unknown analysis mode: {other}"
        ))),
    }
}

const SESSION_COLUMNS: &str = "session_id, doc_id, mode, status, progress, step, result, \
    financial_snapshot, overall_score, risk_level, investment_stance, cf_pattern, \
    error_message, user_ip, created_at, updated_at, expires_at";

fn row_to_session(row: &Row) -> Result<SessionRecord, SessionStoreError> {
    Ok(SessionRecord {
        session_id: row.try_get("session_id")?,
        doc_id: row.try_get("doc_id")?,
        mode: parse_mode(row.try_get::<_, String>("mode")?.as_str())?,
        status: parse_status(row.try_get::<_, String>("status")?.as_str())?,
        progress: row.try_get("progress")?,
        step: row.try_get("step")?,
        result: row.try_get("result")?,
        financial_snapshot: row.try_get("financial_snapshot")?,
        overall_score: row.try_get("overall_score")?,
        risk_level: row.try_get("risk_level")?,
        investment_stance: row.try_get("investment_stance")?,
        cf_pattern: row.try_get("cf_pattern")?,
        error_message: row.try_get("error_message")?,
        user_ip: row.try_get("user_ip")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

#[instrument(skip(pool, session), fields(session_id = %session.session_id))]
pub async fn create_session(
    pool: &PgPool,
    session: &SessionRecord,
) -> Result<(), SessionStoreError> {
    let client = pool.get().await?;
    client
        .timed_execute(
            "INSERT INTO kaiseki.analysis_sessions (\
                session_id, doc_id, mode, status, progress, step, user_ip, \
                created_at, updated_at, expires_at\
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            &[
                &session.session_id,
                &session.doc_id,
                &session.mode.as_str(),
                &session.status.as_str(),
                &session.progress,
                &session.step,
                &session.user_ip,
                &session.created_at,
                &session.updated_at,
                &session.expires_at,
            ],
            "sessions.create",
        )
        .await?;
    Ok(())
}

/// PENDING → PROCESSING。前進のみ許可し、終端からは戻れない。
#[instrument(skip(pool))]
pub async fn mark_processing(
    pool: &PgPool,
    session_id: Uuid,
    progress: i16,
    step: &str,
) -> Result<(), SessionStoreError> {
    let client = pool.get().await?;
    let updated = client
        .timed_execute(
            "UPDATE kaiseki.analysis_sessions SET \
                status = 'processing', progress = $2, step = $3, updated_at = NOW() \
             WHERE session_id = $1 AND status = 'pending'",
            &[&session_id, &progress, &step],
            "sessions.mark_processing",
        )
        .await?;
    if updated == 0 {
        return Err(SessionStoreError::NotFound(session_id));
    }
    Ok(())
}

/// 進捗の書き込み。各呼び出しが独立したトランザクション。
#[instrument(skip(pool))]
pub async fn update_progress(
    pool: &PgPool,
    session_id: Uuid,
    progress: i16,
    step: &str,
) -> Result<(), SessionStoreError> {
    let client = pool.get().await?;
    client
        .timed_execute(
            "UPDATE kaiseki.analysis_sessions SET \
                progress = GREATEST(progress, $2), step = $3, updated_at = NOW() \
             WHERE session_id = $1 AND status = 'processing'",
            &[&session_id, &progress, &step],
            "sessions.update_progress",
        )
        .await?;
    Ok(())
}

#[instrument(skip(pool, result, summary))]
pub async fn complete_session(
    pool: &PgPool,
    session_id: Uuid,
    result: &Value,
    summary: &SessionSummary,
) -> Result<(), SessionStoreError> {
    let client = pool.get().await?;
    let updated = client
        .timed_execute(
            "UPDATE kaiseki.analysis_sessions SET \
                status = 'completed', progress = 100, step = 'done', result = $2, \
                financial_snapshot = $3, overall_score = $4, risk_level = $5, \
                investment_stance = $6, cf_pattern = $7, updated_at = NOW() \
             WHERE session_id = $1 AND status IN ('pending', 'processing')",
            &[
                &session_id,
                result,
                &summary.financial_snapshot,
                &summary.overall_score,
                &summary.risk_level,
                &summary.investment_stance,
                &summary.cf_pattern,
            ],
            "sessions.complete",
        )
        .await?;
    if updated == 0 {
        return Err(SessionStoreError::NotFound(session_id));
    }
    Ok(())
}

#[instrument(skip(pool, error))]
pub async fn fail_session(
    pool: &PgPool,
    session_id: Uuid,
    error: &str,
) -> Result<(), SessionStoreError> {
    let truncated: String = error.chars().take(ERROR_TEXT_LIMIT).collect();
    let client = pool.get().await?;
    client
        .timed_execute(
            "UPDATE kaiseki.analysis_sessions SET \
                status = 'failed', error_message = $2, updated_at = NOW() \
             WHERE session_id = $1 AND status IN ('pending', 'processing')",
            &[&session_id, &truncated],
            "sessions.fail",
        )
        .await?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_session(
    pool: &PgPool,
    session_id: Uuid,
) -> Result<Option<SessionRecord>, SessionStoreError> {
    let client = pool.get().await?;
    let row = client
        .timed_query_opt(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM kaiseki.analysis_sessions WHERE session_id = $1"
            ),
            &[&session_id],
            "sessions.get",
        )
        .await?;
    row.as_ref().map(row_to_session).transpose()
}

/// 同一書類の直近 COMPLETED セッション（ウィンドウ内・未失効のみ）。
#[instrument(skip(pool))]
pub async fn find_recent_completed(
    pool: &PgPool,
    doc_id: &str,
    window: Duration,
    now: DateTime<Utc>,
) -> Result<Option<SessionRecord>, SessionStoreError> {
    let since = now - window;
    let client = pool.get().await?;
    let row = client
        .timed_query_opt(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM kaiseki.analysis_sessions \
                 WHERE doc_id = $1 AND status = 'completed' \
                   AND updated_at >= $2 AND expires_at > $3 \
                 ORDER BY updated_at DESC LIMIT 1"
            ),
            &[&doc_id, &since, &now],
            "sessions.find_recent_completed",
        )
        .await?;
    row.as_ref().map(row_to_session).transpose()
}

/// TTL を過ぎたセッションの物理削除。
#[instrument(skip(pool))]
pub async fn purge_expired_sessions(
    pool: &PgPool,
    now: DateTime<Utc>,
) -> Result<u64, SessionStoreError> {
    let client = pool.get().await?;
    let purged = client
        .timed_execute(
            "DELETE FROM kaiseki.analysis_sessions WHERE expires_at <= $1",
            &[&now],
            "sessions.purge_expired",
        )
        .await?;
    Ok(purged)
}

/// PROCESSING のまま放置されたセッション（ワーカー停止など）を FAILED に落とす。
#[instrument(skip(pool))]
pub async fn fail_stuck_sessions(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> Result<u64, SessionStoreError> {
    let client = pool.get().await?;
    let failed = client
        .timed_execute(
            "UPDATE kaiseki.analysis_sessions SET \
                status = 'failed', \
                error_message = 'analysis worker did not report back before the cutoff', \
                updated_at = NOW() \
             WHERE status = 'processing' AND updated_at <= $1",
            &[&cutoff],
            "sessions.fail_stuck",
        )
        .await?;
    Ok(failed)
}
