use deadpool_postgres::PoolError;
use thiserror::Error;
use tokio_postgres::Error as PgError;
use tracing::{info, instrument};

use crate::db::{DbPoolError, PgPool};

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to get postgres connection: {0}")]
    Pool(#[from] PoolError),
    #[error("failed to run migration: {0}")]
    Postgres(#[from] PgError),
    #[error("failed to build pool: {0}")]
    PoolBuild(#[from] DbPoolError),
}

struct Migration {
    id: i32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    id: 1,
    description: "disclosure master + analysis session tables",
    sql: r#"
CREATE TABLE IF NOT EXISTS kaiseki.companies (
    edinet_code TEXT PRIMARY KEY CHECK (char_length(edinet_code) = 6),
    sec_code TEXT,
    name TEXT NOT NULL,
    name_kana TEXT,
    active BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_companies_sec_code ON kaiseki.companies(sec_code);

CREATE TABLE IF NOT EXISTS kaiseki.documents (
    doc_id TEXT PRIMARY KEY CHECK (char_length(doc_id) = 8),
    edinet_code TEXT,
    sec_code TEXT,
    filer_name TEXT,
    doc_type_code TEXT,
    period_start DATE,
    period_end DATE,
    submit_datetime TIMESTAMPTZ,
    file_date DATE NOT NULL,
    doc_description TEXT,
    has_xbrl BOOLEAN NOT NULL DEFAULT FALSE,
    has_pdf BOOLEAN NOT NULL DEFAULT FALSE,
    has_csv BOOLEAN NOT NULL DEFAULT FALSE,
    has_attachments BOOLEAN NOT NULL DEFAULT FALSE,
    has_english BOOLEAN NOT NULL DEFAULT FALSE,
    legal_status SMALLINT NOT NULL DEFAULT 1 CHECK (legal_status IN (0, 1, 2)),
    withdrawal_status SMALLINT NOT NULL DEFAULT 0,
    doc_info_edit_status SMALLINT NOT NULL DEFAULT 0,
    disclosure_status SMALLINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_documents_file_date ON kaiseki.documents(file_date);
CREATE INDEX IF NOT EXISTS idx_documents_edinet_code ON kaiseki.documents(edinet_code);

CREATE TABLE IF NOT EXISTS kaiseki.batch_executions (
    batch_date DATE PRIMARY KEY,
    status TEXT NOT NULL CHECK (status IN ('running', 'success', 'failed')),
    processed_count INTEGER NOT NULL DEFAULT 0 CHECK (processed_count >= 0),
    error_message TEXT,
    started_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    completed_at TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS kaiseki.financial_data (
    id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    doc_id TEXT NOT NULL REFERENCES kaiseki.documents(doc_id),
    edinet_code TEXT,
    period_type TEXT NOT NULL CHECK (period_type IN ('annual', 'quarterly', 'semi_annual')),
    period_start DATE,
    period_end DATE,
    fiscal_year INTEGER,
    net_sales BIGINT,
    operating_income BIGINT,
    ordinary_income BIGINT,
    net_income BIGINT,
    total_assets BIGINT,
    total_liabilities BIGINT,
    net_assets BIGINT,
    operating_cf BIGINT,
    investing_cf BIGINT,
    financing_cf BIGINT,
    operating_margin DOUBLE PRECISION,
    net_margin DOUBLE PRECISION,
    roa DOUBLE PRECISION,
    equity_ratio DOUBLE PRECISION,
    data_completeness DOUBLE PRECISION NOT NULL DEFAULT 0,
    extraction_confidence DOUBLE PRECISION NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT uq_financial_period
        UNIQUE NULLS NOT DISTINCT (doc_id, period_type, period_start, period_end)
);

CREATE TABLE IF NOT EXISTS kaiseki.analysis_sessions (
    session_id UUID PRIMARY KEY,
    doc_id TEXT NOT NULL,
    mode TEXT NOT NULL CHECK (mode IN ('sentiment', 'comprehensive')),
    status TEXT NOT NULL CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
    progress SMALLINT NOT NULL DEFAULT 0 CHECK (progress BETWEEN 0 AND 100),
    step TEXT,
    result JSONB,
    financial_snapshot JSONB,
    overall_score DOUBLE PRECISION,
    risk_level TEXT,
    investment_stance TEXT,
    cf_pattern TEXT,
    error_message TEXT,
    user_ip TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    expires_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sessions_doc_status
    ON kaiseki.analysis_sessions(doc_id, status, updated_at);
CREATE INDEX IF NOT EXISTS idx_sessions_expires
    ON kaiseki.analysis_sessions(expires_at);

CREATE TABLE IF NOT EXISTS kaiseki.analysis_history (
    id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    doc_id TEXT NOT NULL,
    overall_score DOUBLE PRECISION,
    sentiment_label TEXT,
    risk_level TEXT,
    cf_pattern TEXT,
    duration_ms BIGINT,
    data_quality DOUBLE PRECISION,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_history_doc ON kaiseki.analysis_history(doc_id, created_at);
"#,
}];

#[instrument(skip(pool))]
pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrationError> {
    let mut client = pool.get().await?;
    client
        .batch_execute(
            "CREATE SCHEMA IF NOT EXISTS kaiseki;
             CREATE TABLE IF NOT EXISTS kaiseki.schema_migrations (
                id INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
             );",
        )
        .await?;

    for migration in MIGRATIONS {
        let already_applied: bool = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM kaiseki.schema_migrations WHERE id = $1)",
                &[&migration.id],
            )
            .await?
            .get(0);

        if already_applied {
            continue;
        }

        let tx = client.transaction().await?;
        tx.batch_execute(migration.sql).await?;
        tx.execute(
            "INSERT INTO kaiseki.schema_migrations (id, description) VALUES ($1, $2)",
            &[&migration.id, &migration.description],
        )
        .await?;
        tx.commit().await?;

        info!(
            id = migration.id,
            description = migration.description,
            "applied migration"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_ids_are_unique_and_ordered() {
        let mut previous = 0;
        for migration in MIGRATIONS {
            assert!(migration.id > previous, "ids must be strictly increasing");
            previous = migration.id;
        }
    }
}
