use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// セッション状態。PENDING → PROCESSING → {COMPLETED, FAILED} の一方向。
/// EXPIRED は保存状態ではなく、TTL 超過時の読み出し側ビュー。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Processing => "processing",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

/// 解析モード。感情のみ/総合で TTL が異なる。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    Sentiment,
    Comprehensive,
}

impl AnalysisMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::Sentiment => "sentiment",
            AnalysisMode::Comprehensive => "comprehensive",
        }
    }

    pub fn ttl(&self) -> Duration {
        match self {
            AnalysisMode::Sentiment => Duration::hours(24),
            AnalysisMode::Comprehensive => Duration::hours(48),
        }
    }
}

/// `kaiseki.analysis_sessions` 1行分。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub doc_id: String,
    pub mode: AnalysisMode,
    pub status: SessionStatus,
    pub progress: i16,
    pub step: Option<String>,
    pub result: Option<Value>,
    pub financial_snapshot: Option<Value>,
    pub overall_score: Option<f64>,
    pub risk_level: Option<String>,
    pub investment_stance: Option<String>,
    pub cf_pattern: Option<String>,
    pub error_message: Option<String>,
    pub user_ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(doc_id: &str, mode: AnalysisMode, user_ip: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            doc_id: doc_id.to_string(),
            mode,
            status: SessionStatus::Pending,
            progress: 0,
            step: None,
            result: None,
            financial_snapshot: None,
            overall_score: None,
            risk_level: None,
            investment_stance: None,
            cf_pattern: None,
            error_message: None,
            user_ip: user_ip.map(str::to_string),
            created_at: now,
            updated_at: now,
            expires_at: now + mode.ttl(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// セッション完了時に書き戻すサマリ項目。
#[derive(Debug, Clone, Default)]
pub struct SessionSummary {
    pub overall_score: Option<f64>,
    pub risk_level: Option<String>,
    pub investment_stance: Option<String>,
    pub cf_pattern: Option<String>,
    pub financial_snapshot: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_depends_on_mode() {
        assert_eq!(AnalysisMode::Sentiment.ttl(), Duration::hours(24));
        assert_eq!(AnalysisMode::Comprehensive.ttl(), Duration::hours(48));
    }

    #[test]
    fn new_session_is_pending_with_future_expiry() {
        let session = SessionRecord::new("S100A000", AnalysisMode::Sentiment, Some("203.0.113.7"));
        assert_eq!(session.status, SessionStatus::Pending);
        assert_eq!(session.progress, 0);
        assert!(!session.is_expired(Utc::now()));
        assert!(session.expires_at > session.created_at);
    }

    #[test]
    fn expiry_is_a_view_not_a_status() {
        let mut session = SessionRecord::new("S100A000", AnalysisMode::Sentiment, None);
        session.expires_at = Utc::now() - Duration::hours(1);
        assert!(session.is_expired(Utc::now()));
        assert_eq!(session.status, SessionStatus::Pending);
    }

    #[test]
    fn terminal_states_are_terminal() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(!SessionStatus::Processing.is_terminal());
        assert!(!SessionStatus::Pending.is_terminal());
    }
}
