//! Processed-document repository: one row per submitted job, unique on
//! content hash.
//!
//! The two pipelines own disjoint content columns (`ocr_content` /
//! `llm_content`); each merge runs in a single-row transaction that also
//! re-evaluates the status, so concurrent merges cannot lose a status update.

use chrono::Utc;
use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw processed-document row.
#[derive(Debug, Clone)]
pub struct DocRow {
    pub job_id: String,
    pub content_hash: String,
    pub file_name: String,
    pub file_size: u64,
    pub owner_id: String,
    pub storage_path: Option<String>,
    pub status: String,
    pub status_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub ocr_content: Option<String>,
    pub llm_content: Option<String>,
}

impl DocRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("job_id")?,
            content_hash: row.get("content_hash")?,
            file_name: row.get("file_name")?,
            file_size: row.get("file_size")?,
            owner_id: row.get("owner_id")?,
            storage_path: row.get("storage_path")?,
            status: row.get("status")?,
            status_message: row.get("status_message")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            ocr_content: row.get("ocr_content")?,
            llm_content: row.get("llm_content")?,
        })
    }
}

/// Query filter parameters for document listing.
#[derive(Debug, Default, Clone)]
pub struct DocFilter {
    pub status: Option<String>,
    pub owner_id: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts the placeholder row for a freshly accepted job. Fails with
/// `DuplicateContent` when a row with the same content hash already exists.
pub fn insert_placeholder(db: &Database, row: &DocRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO processed_docs (job_id, content_hash, file_name, file_size, owner_id,
             storage_path, status, status_message, created_at, updated_at, ocr_content, llm_content)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                row.job_id,
                row.content_hash,
                row.file_name,
                row.file_size,
                row.owner_id,
                row.storage_path,
                row.status,
                row.status_message,
                row.created_at,
                row.updated_at,
                row.ocr_content,
                row.llm_content,
            ],
        )
        .map_err(|e| map_unique_violation(e, &row.content_hash))?;
        Ok(())
    })
}

/// Writes the recognition pipeline's output. Returns `false` when the row
/// does not exist (nothing was merged).
pub fn merge_ocr(db: &Database, job_id: &str, content_json: &str) -> Result<bool, DatabaseError> {
    db.with_tx(|tx| {
        let now = Utc::now().to_rfc3339();
        let updated = tx.execute(
            "UPDATE processed_docs SET ocr_content = ?2, updated_at = ?3 WHERE job_id = ?1",
            params![job_id, content_json, now],
        )?;
        promote_if_complete(tx, job_id, &now)?;
        Ok(updated > 0)
    })
}

/// Writes the extraction pipeline's output together with the archive path.
/// Returns `false` when the row does not exist.
pub fn merge_llm(
    db: &Database,
    job_id: &str,
    content_json: &str,
    storage_path: &str,
) -> Result<bool, DatabaseError> {
    db.with_tx(|tx| {
        let now = Utc::now().to_rfc3339();
        let updated = tx.execute(
            "UPDATE processed_docs SET llm_content = ?2, storage_path = ?3, updated_at = ?4
             WHERE job_id = ?1",
            params![job_id, content_json, storage_path, now],
        )?;
        promote_if_complete(tx, job_id, &now)?;
        Ok(updated > 0)
    })
}

/// Flips the row to `processed` once both content columns are present.
/// A row that already left `processing` (e.g. marked failed) stays put.
fn promote_if_complete(
    tx: &rusqlite::Transaction<'_>,
    job_id: &str,
    now: &str,
) -> Result<(), rusqlite::Error> {
    tx.execute(
        "UPDATE processed_docs
         SET status = 'processed', status_message = 'Both pipelines completed', updated_at = ?2
         WHERE job_id = ?1
           AND status = 'processing'
           AND ocr_content IS NOT NULL
           AND llm_content IS NOT NULL",
        params![job_id, now],
    )?;
    Ok(())
}

/// Updates only the status and diagnostic message of a row.
pub fn update_status(
    db: &Database,
    job_id: &str,
    status: &str,
    message: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE processed_docs SET status = ?2, status_message = ?3, updated_at = ?4
             WHERE job_id = ?1",
            params![job_id, status, message, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    })
}

/// Finds a row by its job id.
pub fn find_by_id(db: &Database, job_id: &str) -> Result<Option<DocRow>, DatabaseError> {
    find_one(db, "SELECT * FROM processed_docs WHERE job_id = ?1", job_id)
}

/// Finds a row by its content hash.
pub fn find_by_hash(db: &Database, hash: &str) -> Result<Option<DocRow>, DatabaseError> {
    find_one(db, "SELECT * FROM processed_docs WHERE content_hash = ?1", hash)
}

fn find_one(db: &Database, sql: &str, key: &str) -> Result<Option<DocRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query_map(params![key], DocRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Queries rows with filters, returning (rows, total_count).
pub fn query(db: &Database, filter: &DocFilter) -> Result<(Vec<DocRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.clone()));
        }
        if let Some(ref owner_id) = filter.owner_id {
            conditions.push(format!("owner_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(owner_id.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM processed_docs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM processed_docs {} ORDER BY created_at DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<DocRow> = stmt
            .query_map(params_ref.as_slice(), DocRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

fn map_unique_violation(e: rusqlite::Error, hash: &str) -> DatabaseError {
    match e {
        rusqlite::Error::SqliteFailure(err, Some(msg))
            if err.code == rusqlite::ErrorCode::ConstraintViolation
                && msg.contains("content_hash") =>
        {
            DatabaseError::DuplicateContent {
                hash: hash.to_string(),
            }
        }
        other => DatabaseError::Sqlite(other),
    }
}
