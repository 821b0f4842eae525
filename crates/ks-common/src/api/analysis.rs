use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::analysis::session::{SessionRecord, SessionStatus};
use crate::analysis::StartOutcome;

#[derive(Debug, Clone, Deserialize)]
pub struct StartAnalysisRequest {
    pub doc_id: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StartAnalysisResponse {
    Started {
        session_id: Uuid,
    },
    AlreadyAnalyzed {
        session_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },
}

impl From<StartOutcome> for StartAnalysisResponse {
    fn from(outcome: StartOutcome) -> Self {
        match outcome {
            StartOutcome::Started { session_id } => StartAnalysisResponse::Started { session_id },
            StartOutcome::AlreadyAnalyzed { session_id, result } => {
                StartAnalysisResponse::AlreadyAnalyzed { session_id, result }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressResponse {
    pub status: &'static str,
    pub progress: i16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressResponse {
    /// セッション行から進捗ビューへ。失効済みは expired として progress を伏せる。
    pub fn from_record(record: Option<&SessionRecord>, now: DateTime<Utc>) -> Self {
        match record {
            None => Self {
                status: "not_found",
                progress: 0,
                step: None,
                timestamp: now,
            },
            Some(session) if session.is_expired(now) => Self {
                status: "expired",
                progress: 0,
                step: None,
                timestamp: session.updated_at,
            },
            Some(session) => Self {
                status: session.status.as_str(),
                progress: session.progress,
                step: session.step.clone(),
                timestamp: session.updated_at,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResultResponse {
    Completed { result: Value },
    Failed { error: String },
    Processing,
    Expired,
    NotFound,
}

impl ResultResponse {
    pub fn from_record(record: Option<SessionRecord>, now: DateTime<Utc>) -> Self {
        let Some(session) = record else {
            return ResultResponse::NotFound;
        };

        if session.is_expired(now) {
            return ResultResponse::Expired;
        }

        match session.status {
            SessionStatus::Completed => match session.result {
                Some(result) => ResultResponse::Completed { result },
                None => ResultResponse::Failed {
                    error: "completed session has no stored result".into(),
                },
            },
            SessionStatus::Failed => ResultResponse::Failed {
                error: session
                    .error_message
                    .unwrap_or_else(|| "analysis failed".into()),
            },
            SessionStatus::Pending | SessionStatus::Processing => ResultResponse::Processing,
        }
    }
}
