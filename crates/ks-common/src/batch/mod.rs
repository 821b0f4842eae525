pub mod reconciler;
pub mod target_date;

pub use reconciler::{
    run_daily_batch, BatchError, BatchOptions, BatchOutcome, BatchRun, CompanyUpdateMode,
};
pub use target_date::{resolve_target_date, AutoDateMode, DateSelection, TargetDateError};
