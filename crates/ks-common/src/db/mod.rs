pub mod batches;
pub mod companies;
pub mod documents;
pub mod financials;
pub mod history;
pub mod migrations;
pub mod pool;
pub mod sessions;
pub mod util;

// Keep re-exports unique so downstream crates see a single symbol per helper.
pub use batches::{
    claim_batch, complete_batch, fail_batch, get_batch, BatchClaim, BatchExecutionRecord,
    BatchStatus, BatchStoreError,
};
pub use companies::{
    deactivate_unreferenced, get_company, list_company_candidates, sync_companies, CompanyRecord,
    CompanyStoreError, CompanySyncStats,
};
pub use documents::{
    get_document, list_documents_for_date, upsert_document_batch, ChunkStats, DocumentRecord,
    DocumentStoreError,
};
pub use financials::{
    list_financials_for_document, upsert_financial_data, FinancialDataRecord, FinancialStoreError,
    PeriodType,
};
pub use history::{insert_history, HistoryRecord, HistoryStoreError};
pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool_from_url, create_pool_from_url_checked, DbPoolError, PgPool};
pub use sessions::{
    complete_session, create_session, fail_session, fail_stuck_sessions, find_recent_completed,
    get_session, mark_processing, purge_expired_sessions, update_progress, SessionStoreError,
};
pub use util::{is_lock_contention, TimedClientExt};
