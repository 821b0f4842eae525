use std::collections::HashMap;

use deadpool_postgres::PoolError;
use tokio_postgres::{Error as PgError, Row};
use tracing::{instrument, warn};

use crate::db::util::TimedClientExt;
use crate::db::PgPool;

#[derive(Debug, thiserror::Error)]
pub enum CompanyStoreError {
    #[error("failed to get postgres connection: {0}")]
    Pool(#[from] PoolError),
    #[error("postgres error: {0}")]
    Postgres(#[from] PgError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyRecord {
    pub edinet_code: String,
    pub sec_code: Option<String>,
    pub name: String,
    pub name_kana: Option<String>,
    pub active: bool,
}

impl CompanyRecord {
    pub fn new(edinet_code: &str, sec_code: Option<&str>, name: &str) -> Self {
        Self {
            edinet_code: edinet_code.to_string(),
            sec_code: sec_code.map(str::to_string),
            name: name.to_string(),
            name_kana: None,
            active: true,
        }
    }
}

fn row_to_company(row: &Row) -> CompanyRecord {
    CompanyRecord {
        edinet_code: row.get("edinet_code"),
        sec_code: row.get("sec_code"),
        name: row.get("name"),
        name_kana: row.get("name_kana"),
        active: row.get("active"),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompanySyncStats {
    pub created: u64,
    pub updated: u64,
}

const SYNC_CHUNK: usize = 100;

/// 企業マスタの同期。新規は作成、コードまたは名称が変わった既存行のみ更新。
#[instrument(skip(pool, candidates), fields(candidates = candidates.len()))]
pub async fn sync_companies(
    pool: &PgPool,
    candidates: &[CompanyRecord],
) -> Result<CompanySyncStats, CompanyStoreError> {
    let mut stats = CompanySyncStats::default();

    for chunk in candidates.chunks(SYNC_CHUNK) {
        let mut client = pool.get().await?;
        let mut tx = client.transaction().await?;

        let codes: Vec<&str> = chunk.iter().map(|c| c.edinet_code.as_str()).collect();
        let rows = tx
            .query(
                "SELECT edinet_code, sec_code, name, name_kana, active \
                 FROM kaiseki.companies WHERE edinet_code = ANY($1)",
                &[&codes],
            )
            .await?;
        let existing: HashMap<String, CompanyRecord> = rows
            .iter()
            .map(|row| {
                let company = row_to_company(row);
                (company.edinet_code.clone(), company)
            })
            .collect();

        let update_stmt = tx
            .prepare_cached(
                "UPDATE kaiseki.companies SET \
                    sec_code = $2, name = $3, active = TRUE, updated_at = NOW() \
                 WHERE edinet_code = $1",
            )
            .await?;

        let mut new_rows: Vec<&CompanyRecord> = Vec::new();
        for candidate in chunk {
            match existing.get(&candidate.edinet_code) {
                None => new_rows.push(candidate),
                Some(current)
                    if current.sec_code != candidate.sec_code
                        || current.name != candidate.name
                        || !current.active =>
                {
                    stats.updated += tx
                        .execute(
                            &update_stmt,
                            &[&candidate.edinet_code, &candidate.sec_code, &candidate.name],
                        )
                        .await?;
                }
                Some(_) => {}
            }
        }

        for (index, candidate) in new_rows.iter().enumerate() {
            let sp = tx.savepoint(format!("company_{index}")).await?;
            let result = sp
                .execute(
                    "INSERT INTO kaiseki.companies (edinet_code, sec_code, name, name_kana, active) \
                     VALUES ($1, $2, $3, $4, TRUE) \
                     ON CONFLICT (edinet_code) DO NOTHING",
                    &[
                        &candidate.edinet_code,
                        &candidate.sec_code,
                        &candidate.name,
                        &candidate.name_kana,
                    ],
                )
                .await;
            match result {
                Ok(count) => {
                    sp.commit().await?;
                    stats.created += count;
                }
                Err(err) => {
                    warn!(edinet_code = %candidate.edinet_code, error = %err, "skipping company row");
                    sp.rollback().await?;
                }
            }
        }

        tx.commit().await?;
    }

    Ok(stats)
}

/// `full` モード用: ストア内の全書類から会社候補を引き直す。
#[instrument(skip(pool))]
pub async fn list_company_candidates(
    pool: &PgPool,
) -> Result<Vec<CompanyRecord>, CompanyStoreError> {
    let client = pool.get().await?;
    let rows = client
        .timed_query(
            "SELECT DISTINCT edinet_code, sec_code, filer_name \
             FROM kaiseki.documents \
             WHERE edinet_code IS NOT NULL AND filer_name IS NOT NULL AND legal_status = 1",
            &[],
            "companies.candidates_full",
        )
        .await?;

    Ok(rows
        .iter()
        .map(|row| {
            CompanyRecord::new(
                row.get::<_, String>("edinet_code").as_str(),
                row.get::<_, Option<String>>("sec_code").as_deref(),
                row.get::<_, String>("filer_name").as_str(),
            )
        })
        .collect())
}

/// どの書類からも参照されなくなった会社を inactive に落とす。
#[instrument(skip(pool))]
pub async fn deactivate_unreferenced(pool: &PgPool) -> Result<u64, CompanyStoreError> {
    let client = pool.get().await?;
    let count = client
        .timed_execute(
            "UPDATE kaiseki.companies c SET active = FALSE, updated_at = NOW() \
             WHERE c.active \
               AND NOT EXISTS (\
                   SELECT 1 FROM kaiseki.documents d WHERE d.edinet_code = c.edinet_code\
               )",
            &[],
            "companies.deactivate_unreferenced",
        )
        .await?;
    Ok(count)
}

#[instrument(skip(pool))]
pub async fn get_company(
    pool: &PgPool,
    edinet_code: &str,
) -> Result<Option<CompanyRecord>, CompanyStoreError> {
    let client = pool.get().await?;
    let row = client
        .timed_query_opt(
            "SELECT edinet_code, sec_code, name, name_kana, active \
             FROM kaiseki.companies WHERE edinet_code = $1",
            &[&edinet_code],
            "companies.get",
        )
        .await?;
    Ok(row.as_ref().map(row_to_company))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_equality_drives_update_decision() {
        let stored = CompanyRecord::new("E01234", Some("72030"), "トヨタ自動車株式会社");
        let same = stored.clone();
        assert_eq!(stored, same);

        let renamed = CompanyRecord::new("E01234", Some("72030"), "トヨタ自動車（新社名）");
        assert_ne!(stored, renamed);
    }
}
