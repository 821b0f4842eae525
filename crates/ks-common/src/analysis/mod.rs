pub mod integrate;
pub mod orchestrator;
pub mod session;

pub use integrate::{integrate, IntegratedVerdict, InvestmentStance};
pub use orchestrator::{
    AnalysisResult, Orchestrator, OrchestratorConfig, OrchestratorError, StartOutcome,
};
pub use session::{AnalysisMode, SessionRecord, SessionStatus, SessionSummary};
