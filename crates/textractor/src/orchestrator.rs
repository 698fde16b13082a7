//! Submission front door.
//!
//! Accepts a document, validates it, persists the placeholder row, and fans
//! the job out to both pipelines over the bus. Submission returns as soon as
//! the job is published; all processing is asynchronous from the caller's
//! perspective.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::bus::MessageBus;
use crate::db::doc_repo::{DocFilter, DocRow};
use crate::db::{profile_repo, Database, DatabaseError};
use crate::error::{Result, ValidationError};
use crate::job::{Job, ProcessingStatus};
use crate::service::DocService;

pub struct Orchestrator {
    docs: DocService,
    db: Database,
    bus: Arc<dyn MessageBus>,
    ocr_topic: String,
    llm_topic: String,
}

impl Orchestrator {
    pub fn new(
        docs: DocService,
        db: Database,
        bus: Arc<dyn MessageBus>,
        ocr_topic: &str,
        llm_topic: &str,
    ) -> Self {
        Self {
            docs,
            db,
            bus,
            ocr_topic: ocr_topic.to_string(),
            llm_topic: llm_topic.to_string(),
        }
    }

    /// Accepts a document for processing and returns its job id.
    ///
    /// Validation happens before any side effect: empty content and unknown
    /// owners are rejected with nothing persisted and nothing published.
    /// Byte-identical resubmissions return the existing job id.
    pub fn submit(
        &self,
        content: Vec<u8>,
        name: &str,
        mime_type: &str,
        owner_id: Uuid,
    ) -> Result<Uuid> {
        if content.is_empty() {
            return Err(ValidationError::EmptyContent.into());
        }
        if !profile_repo::exists(&self.db, &owner_id.to_string())? {
            return Err(ValidationError::UnknownOwner { owner_id }.into());
        }

        let job = Job::new(content, name, mime_type, owner_id);

        if let Some(existing) = self.docs.find_by_hash(&job.content_hash)? {
            info!(hash = %job.content_hash, job_id = %existing.job_id, "Content already known");
            return row_job_id(&existing);
        }

        match self.docs.insert_placeholder(&job) {
            Ok(()) => {}
            Err(DatabaseError::DuplicateContent { .. }) => {
                // Lost the insert race to a concurrent identical submission.
                if let Some(existing) = self.docs.find_by_hash(&job.content_hash)? {
                    return row_job_id(&existing);
                }
                return Err(DatabaseError::DuplicateContent {
                    hash: job.content_hash.clone(),
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        }

        // Fire-and-forget fan-out: recognition first, then extraction.
        // A publish failure is logged, not surfaced; the job stays queryable.
        let payload = job.to_bytes()?;
        for topic in [&self.ocr_topic, &self.llm_topic] {
            if let Err(e) = self.bus.publish(topic, &payload) {
                warn!(topic = %topic, job_id = %job.id, error = %e, "Failed to publish job");
            }
        }

        info!(job_id = %job.id, name = %job.name, size = job.size_bytes, "Job accepted");
        Ok(job.id)
    }

    /// Current processing status. Degrades to `Unknown` instead of failing.
    pub fn status(&self, job_id: Uuid) -> ProcessingStatus {
        self.docs.status(job_id)
    }

    /// Filtered listing of processed-document rows.
    pub fn list(&self, filter: &DocFilter) -> Result<(Vec<DocRow>, u64)> {
        Ok(self.docs.list(filter)?)
    }
}

fn row_job_id(row: &DocRow) -> Result<Uuid> {
    Uuid::parse_str(&row.job_id)
        .map_err(|_| DatabaseError::CorruptRow(format!("bad job id '{}'", row.job_id)).into())
}
