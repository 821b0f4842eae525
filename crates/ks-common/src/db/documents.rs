use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use deadpool_postgres::PoolError;
use deadpool_postgres::Transaction;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Error as PgError, Row};
use tracing::{instrument, warn};

use crate::db::util::{is_lock_contention, TimedClientExt};
use crate::db::PgPool;
use crate::edinet::EdinetDocument;

#[derive(Debug, thiserror::Error)]
pub enum DocumentStoreError {
    #[error("failed to get postgres connection: {0}")]
    Pool(#[from] PoolError),
    #[error("postgres error: {0}")]
    Postgres(#[from] PgError),
    #[error("failed to map document row: {0}")]
    Mapping(String),
}

impl DocumentStoreError {
    /// デッドロック/ロック競合ならチャンク単位で再試行できる。
    pub fn is_retryable(&self) -> bool {
        matches!(self, DocumentStoreError::Postgres(err) if is_lock_contention(err))
    }
}

/// `kaiseki.documents` 1行分。status 系4カラムのみが更新対象。
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub doc_id: String,
    pub edinet_code: Option<String>,
    pub sec_code: Option<String>,
    pub filer_name: Option<String>,
    pub doc_type_code: Option<String>,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub submit_datetime: Option<DateTime<Utc>>,
    pub file_date: NaiveDate,
    pub doc_description: Option<String>,
    pub has_xbrl: bool,
    pub has_pdf: bool,
    pub has_csv: bool,
    pub has_attachments: bool,
    pub has_english: bool,
    pub legal_status: i16,
    pub withdrawal_status: i16,
    pub doc_info_edit_status: i16,
    pub disclosure_status: i16,
}

impl DocumentRecord {
    /// API 応答1件をストア行へ変換する。doc_id が 8 文字でない行は捨てる。
    pub fn from_edinet(doc: &EdinetDocument, file_date: NaiveDate) -> Option<Self> {
        if doc.doc_id.chars().count() != 8 {
            warn!(doc_id = %doc.doc_id, "skipping document with malformed id");
            return None;
        }

        Some(Self {
            doc_id: doc.doc_id.clone(),
            edinet_code: doc.edinet_code.clone(),
            sec_code: doc.sec_code.clone(),
            filer_name: doc.filer_name.clone(),
            doc_type_code: doc.doc_type_code.clone(),
            period_start: doc.period_start_date(),
            period_end: doc.period_end_date(),
            submit_datetime: doc.submit_datetime_utc(),
            file_date,
            doc_description: doc.doc_description.clone(),
            has_xbrl: doc.has_xbrl(),
            has_pdf: doc.has_pdf(),
            has_csv: doc.has_csv(),
            has_attachments: doc.has_attachments(),
            has_english: doc.has_english(),
            legal_status: doc.legal_status_code(),
            withdrawal_status: doc.withdrawal_status_code(),
            doc_info_edit_status: doc.edit_status_code(),
            disclosure_status: doc.disclosure_status_code(),
        })
    }
}

fn row_to_document(row: &Row) -> Result<DocumentRecord, DocumentStoreError> {
    Ok(DocumentRecord {
        doc_id: row.try_get("doc_id")?,
        edinet_code: row.try_get("edinet_code")?,
        sec_code: row.try_get("sec_code")?,
        filer_name: row.try_get("filer_name")?,
        doc_type_code: row.try_get("doc_type_code")?,
        period_start: row.try_get("period_start")?,
        period_end: row.try_get("period_end")?,
        submit_datetime: row.try_get("submit_datetime")?,
        file_date: row.try_get("file_date")?,
        doc_description: row.try_get("doc_description")?,
        has_xbrl: row.try_get("has_xbrl")?,
        has_pdf: row.try_get("has_pdf")?,
        has_csv: row.try_get("has_csv")?,
        has_attachments: row.try_get("has_attachments")?,
        has_english: row.try_get("has_english")?,
        legal_status: row.try_get("legal_status")?,
        withdrawal_status: row.try_get("withdrawal_status")?,
        doc_info_edit_status: row.try_get("doc_info_edit_status")?,
        disclosure_status: row.try_get("disclosure_status")?,
    })
}

const DOCUMENT_COLUMNS: &str = "doc_id, edinet_code, sec_code, filer_name, doc_type_code, \
    period_start, period_end, submit_datetime, file_date, doc_description, \
    has_xbrl, has_pdf, has_csv, has_attachments, has_english, \
    legal_status, withdrawal_status, doc_info_edit_status, disclosure_status";

const DOCUMENT_COLUMN_COUNT: usize = 19;

fn push_document_params<'a>(doc: &'a DocumentRecord, params: &mut Vec<&'a (dyn ToSql + Sync)>) {
    params.push(&doc.doc_id);
    params.push(&doc.edinet_code);
    params.push(&doc.sec_code);
    params.push(&doc.filer_name);
    params.push(&doc.doc_type_code);
    params.push(&doc.period_start);
    params.push(&doc.period_end);
    params.push(&doc.submit_datetime);
    params.push(&doc.file_date);
    params.push(&doc.doc_description);
    params.push(&doc.has_xbrl);
    params.push(&doc.has_pdf);
    params.push(&doc.has_csv);
    params.push(&doc.has_attachments);
    params.push(&doc.has_english);
    params.push(&doc.legal_status);
    params.push(&doc.withdrawal_status);
    params.push(&doc.doc_info_edit_status);
    params.push(&doc.disclosure_status);
}

fn bulk_insert_sql(rows: usize) -> String {
    let mut sql = format!(
        "INSERT INTO kaiseki.documents ({DOCUMENT_COLUMNS}) VALUES "
    );
    for row in 0..rows {
        if row > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for col in 0..DOCUMENT_COLUMN_COUNT {
            if col > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&format!("${}", row * DOCUMENT_COLUMN_COUNT + col + 1));
        }
        sql.push(')');
    }
    sql.push_str(" ON CONFLICT (doc_id) DO NOTHING");
    sql
}

const SINGLE_INSERT: &str = "INSERT INTO kaiseki.documents (doc_id, edinet_code, sec_code, \
    filer_name, doc_type_code, period_start, period_end, submit_datetime, file_date, \
    doc_description, has_xbrl, has_pdf, has_csv, has_attachments, has_english, \
    legal_status, withdrawal_status, doc_info_edit_status, disclosure_status) \
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19) \
    ON CONFLICT (doc_id) DO NOTHING";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkStats {
    pub inserted: u64,
    pub updated: u64,
}

/// 1チャンク分のドキュメント upsert。チャンク全体が1トランザクション。
///
/// 既存行は行ロックの上で status 系カラムのみ更新し、新規行は一括 INSERT
/// （衝突は無視）。一括 INSERT が失敗した場合はセーブポイントで巻き戻して
/// 1行ずつ投入に切り替える。
#[instrument(skip(pool, chunk), fields(chunk_len = chunk.len()))]
pub async fn upsert_document_batch(
    pool: &PgPool,
    chunk: &[DocumentRecord],
) -> Result<ChunkStats, DocumentStoreError> {
    if chunk.is_empty() {
        return Ok(ChunkStats::default());
    }

    let mut client = pool.get().await?;
    let mut tx = client.transaction().await?;

    let ids: Vec<&str> = chunk.iter().map(|d| d.doc_id.as_str()).collect();
    let locked = tx
        .query(
            "SELECT doc_id FROM kaiseki.documents WHERE doc_id = ANY($1) \
             FOR UPDATE SKIP LOCKED",
            &[&ids],
        )
        .await?;
    let existing: HashSet<String> = locked.iter().map(|row| row.get("doc_id")).collect();

    let mut stats = ChunkStats::default();

    let update_stmt = tx
        .prepare_cached(
            "UPDATE kaiseki.documents SET \
                legal_status = $2, \
                withdrawal_status = $3, \
                doc_info_edit_status = $4, \
                disclosure_status = $5, \
                updated_at = NOW() \
             WHERE doc_id = $1",
        )
        .await?;

    let mut new_docs: Vec<&DocumentRecord> = Vec::new();
    for doc in chunk {
        if existing.contains(&doc.doc_id) {
            stats.updated += tx
                .execute(
                    &update_stmt,
                    &[
                        &doc.doc_id,
                        &doc.legal_status,
                        &doc.withdrawal_status,
                        &doc.doc_info_edit_status,
                        &doc.disclosure_status,
                    ],
                )
                .await?;
        } else {
            new_docs.push(doc);
        }
    }

    if !new_docs.is_empty() {
        stats.inserted = insert_new_documents(&mut tx, &new_docs).await?;
    }

    tx.commit().await?;
    Ok(stats)
}

async fn insert_new_documents(
    tx: &mut Transaction<'_>,
    new_docs: &[&DocumentRecord],
) -> Result<u64, DocumentStoreError> {
    let sql = bulk_insert_sql(new_docs.len());
    let mut params: Vec<&(dyn ToSql + Sync)> =
        Vec::with_capacity(new_docs.len() * DOCUMENT_COLUMN_COUNT);
    for doc in new_docs {
        push_document_params(doc, &mut params);
    }

    let bulk = tx.savepoint("bulk_documents").await?;
    match bulk.execute(sql.as_str(), &params).await {
        Ok(count) => {
            bulk.commit().await?;
            return Ok(count);
        }
        Err(err) => {
            warn!(error = %err, "bulk document insert failed; falling back to per-row");
            bulk.rollback().await?;
        }
    }

    let mut inserted = 0u64;
    for (index, doc) in new_docs.iter().enumerate() {
        let mut row_params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(DOCUMENT_COLUMN_COUNT);
        push_document_params(doc, &mut row_params);

        let sp = tx.savepoint(format!("doc_row_{index}")).await?;
        match sp.execute(SINGLE_INSERT, &row_params).await {
            Ok(count) => {
                sp.commit().await?;
                inserted += count;
            }
            Err(err) => {
                warn!(doc_id = %doc.doc_id, error = %err, "skipping uninsertable document");
                sp.rollback().await?;
            }
        }
    }

    Ok(inserted)
}

/// 指定日の書類一覧。既定は縦覧中 (legal_status = 1) のみ。
#[instrument(skip(pool))]
pub async fn list_documents_for_date(
    pool: &PgPool,
    file_date: NaiveDate,
    legal_status: i16,
) -> Result<Vec<DocumentRecord>, DocumentStoreError> {
    let client = pool.get().await?;
    let rows = client
        .timed_query(
            &format!(
                "SELECT {DOCUMENT_COLUMNS} FROM kaiseki.documents \
                 WHERE file_date = $1 AND legal_status = $2 ORDER BY doc_id"
            ),
            &[&file_date, &legal_status],
            "documents.list_for_date",
        )
        .await?;

    rows.iter().map(row_to_document).collect()
}

#[instrument(skip(pool))]
pub async fn get_document(
    pool: &PgPool,
    doc_id: &str,
) -> Result<Option<DocumentRecord>, DocumentStoreError> {
    let client = pool.get().await?;
    let row = client
        .timed_query_opt(
            &format!("SELECT {DOCUMENT_COLUMNS} FROM kaiseki.documents WHERE doc_id = $1"),
            &[&doc_id],
            "documents.get",
        )
        .await?;

    row.as_ref().map(row_to_document).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_edinet_doc() -> EdinetDocument {
        EdinetDocument {
            doc_id: "S100A000".into(),
            edinet_code: Some("E01234".into()),
            sec_code: Some("72030".into()),
            filer_name: Some("テスト株式会社".into()),
            doc_type_code: Some("120".into()),
            xbrl_flag: Some("1".into()),
            legal_status: Some("1".into()),
            ..Default::default()
        }
    }

    #[test]
    fn converts_api_document_to_record() {
        let file_date = NaiveDate::from_ymd_opt(2024, 5, 15).unwrap();
        let record = DocumentRecord::from_edinet(&sample_edinet_doc(), file_date).unwrap();
        assert_eq!(record.doc_id, "S100A000");
        assert!(record.has_xbrl);
        assert_eq!(record.legal_status, 1);
        assert_eq!(record.file_date, file_date);
    }

    #[test]
    fn rejects_malformed_doc_ids() {
        let mut doc = sample_edinet_doc();
        doc.doc_id = "BAD".into();
        let file_date = NaiveDate::from_ymd_opt(2024, 5, 15).unwrap();
        assert!(DocumentRecord::from_edinet(&doc, file_date).is_none());
    }

    #[test]
    fn bulk_insert_sql_numbers_placeholders() {
        let sql = bulk_insert_sql(2);
        assert!(sql.contains("$1"));
        assert!(sql.contains("$38"));
        assert!(!sql.contains("$39"));
        assert!(sql.ends_with("ON CONFLICT (doc_id) DO NOTHING"));
    }
}
