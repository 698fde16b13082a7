//! Persistence facade shared by the ingestion path and both pipelines.

use std::path::PathBuf;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::db::doc_repo::{self, DocFilter, DocRow};
use crate::db::{Database, DatabaseError};
use crate::document::ExtractedDoc;
use crate::error::TextractorError;
use crate::job::{Job, ProcessingStatus};
use crate::storage::FileStore;

/// Facade over the document store and the file archive. Cheap to clone;
/// every pipeline worker holds its own copy.
#[derive(Clone)]
pub struct DocService {
    db: Database,
    store: FileStore,
}

impl DocService {
    pub fn new(db: Database, store: FileStore) -> Self {
        Self { db, store }
    }

    /// Records the placeholder row for a freshly accepted job: status
    /// `processing`, both content columns empty.
    pub fn insert_placeholder(&self, job: &Job) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let row = DocRow {
            job_id: job.id.to_string(),
            content_hash: job.content_hash.clone(),
            file_name: job.name.clone(),
            file_size: job.size_bytes,
            owner_id: job.owner_id.to_string(),
            storage_path: None,
            status: ProcessingStatus::Processing.as_str().to_string(),
            status_message: Some(job.status_message.clone()),
            created_at: now.clone(),
            updated_at: now,
            ocr_content: None,
            llm_content: None,
        };
        doc_repo::insert_placeholder(&self.db, &row)
    }

    /// Merges the recognition pipeline's output into the document row.
    pub fn merge_ocr(&self, job_id: Uuid, doc: &ExtractedDoc) -> Result<(), TextractorError> {
        let json = doc.to_json().map_err(DatabaseError::Serialize)?;
        let merged = doc_repo::merge_ocr(&self.db, &job_id.to_string(), &json)?;
        if !merged {
            warn!(%job_id, "No document row to merge recognition output into");
        }
        Ok(())
    }

    /// Archives the raw bytes and merges the extraction pipeline's output
    /// into the document row. Returns the archive path.
    pub fn merge_llm(
        &self,
        job_id: Uuid,
        doc: &ExtractedDoc,
        content: &[u8],
    ) -> Result<PathBuf, TextractorError> {
        let json = doc.to_json().map_err(DatabaseError::Serialize)?;
        let path = self.store.save(content)?;
        let merged = doc_repo::merge_llm(
            &self.db,
            &job_id.to_string(),
            &json,
            &path.to_string_lossy(),
        )?;
        if !merged {
            warn!(%job_id, "No document row to merge extraction output into");
        }
        Ok(path)
    }

    /// Marks a job failed with a diagnostic message.
    pub fn mark_failed(&self, job_id: Uuid, message: &str) -> Result<(), DatabaseError> {
        doc_repo::update_status(
            &self.db,
            &job_id.to_string(),
            ProcessingStatus::Failed.as_str(),
            message,
        )
    }

    pub fn find_by_id(&self, job_id: Uuid) -> Result<Option<DocRow>, DatabaseError> {
        doc_repo::find_by_id(&self.db, &job_id.to_string())
    }

    pub fn find_by_hash(&self, hash: &str) -> Result<Option<DocRow>, DatabaseError> {
        doc_repo::find_by_hash(&self.db, hash)
    }

    /// Current processing status of a job. Degrades to `Unknown` on a
    /// missing row, an unrecognized stored value, or a store error;
    /// status queries never fail.
    pub fn status(&self, job_id: Uuid) -> ProcessingStatus {
        match self.find_by_id(job_id) {
            Ok(Some(row)) => ProcessingStatus::parse(&row.status),
            Ok(None) => ProcessingStatus::Unknown,
            Err(e) => {
                warn!(%job_id, error = %e, "Status lookup failed");
                ProcessingStatus::Unknown
            }
        }
    }

    /// Filtered, paginated listing of document rows.
    pub fn list(&self, filter: &DocFilter) -> Result<(Vec<DocRow>, u64), DatabaseError> {
        doc_repo::query(&self.db, filter)
    }
}
