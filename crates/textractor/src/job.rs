//! The unit of submitted document-processing work.
//!
//! A [`Job`] is constructed once at ingestion and never mutated afterwards.
//! Both pipelines receive the same job over the bus and record their outcome
//! in the persisted document row, not on the job itself.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Processing state of a submitted document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Processing,
    Processed,
    Failed,
    Unknown,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Processed => "processed",
            ProcessingStatus::Failed => "failed",
            ProcessingStatus::Unknown => "unknown",
        }
    }

    /// Parses a stored status string. Anything unrecognized maps to
    /// `Unknown` rather than an error, so status queries never fail on
    /// corrupt rows.
    pub fn parse(s: &str) -> Self {
        match s {
            "processing" => ProcessingStatus::Processing,
            "processed" => ProcessingStatus::Processed,
            "failed" => ProcessingStatus::Failed,
            _ => ProcessingStatus::Unknown,
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One submitted document. Immutable once constructed; cloned freely across
/// threads and serialized as the bus payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    /// Raw payload bytes, base64-encoded on the wire.
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    /// SHA-256 of `content`, hex-encoded. Computed exactly once at
    /// construction; identical bytes always yield the identical hash.
    pub content_hash: String,
    pub owner_id: Uuid,
    pub status: ProcessingStatus,
    pub status_message: String,
}

impl Job {
    /// Creates a new job for the given payload. When `mime_type` is empty
    /// the type is detected from the file name, falling back to
    /// `application/octet-stream`.
    pub fn new(content: Vec<u8>, name: &str, mime_type: &str, owner_id: Uuid) -> Self {
        let mime_type = if mime_type.is_empty() {
            detect_mime_type(name)
        } else {
            mime_type.to_string()
        };

        let content_hash = content_hash(&content);

        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            size_bytes: content.len() as u64,
            mime_type,
            content,
            content_hash,
            owner_id,
            status: ProcessingStatus::Processing,
            status_message: "File accepted for processing".to_string(),
        }
    }

    /// Serializes the job as a bus payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserializes a bus payload back into a job.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// SHA-256 fingerprint of raw bytes, hex-encoded. Deterministic and
/// independent of any metadata.
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

fn detect_mime_type(name: &str) -> String {
    mime_guess::from_path(name)
        .first()
        .map(|m| m.to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let a = content_hash(b"same bytes");
        let b = content_hash(b"same bytes");
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_differs_for_distinct_content() {
        assert_ne!(content_hash(b"payload one"), content_hash(b"payload two"));
    }

    #[test]
    fn test_hash_independent_of_metadata() {
        let owner_a = Uuid::new_v4();
        let owner_b = Uuid::new_v4();
        let job_a = Job::new(b"identical".to_vec(), "a.pdf", "application/pdf", owner_a);
        let job_b = Job::new(b"identical".to_vec(), "b.png", "image/png", owner_b);

        assert_eq!(job_a.content_hash, job_b.content_hash);
        assert_ne!(job_a.id, job_b.id);
    }

    #[test]
    fn test_new_job_starts_processing() {
        let job = Job::new(b"content".to_vec(), "doc.pdf", "application/pdf", Uuid::new_v4());
        assert_eq!(job.status, ProcessingStatus::Processing);
        assert_eq!(job.size_bytes, 7);
        assert_eq!(job.mime_type, "application/pdf");
    }

    #[test]
    fn test_mime_type_detected_from_name() {
        let job = Job::new(b"x".to_vec(), "scan.png", "", Uuid::new_v4());
        assert_eq!(job.mime_type, "image/png");

        let job = Job::new(b"x".to_vec(), "mystery.zzz9", "", Uuid::new_v4());
        assert_eq!(job.mime_type, "application/octet-stream");
    }

    #[test]
    fn test_bus_payload_preserves_content() {
        let job = Job::new(vec![0, 159, 146, 150], "raw.bin", "", Uuid::new_v4());
        let payload = job.to_bytes().unwrap();
        let decoded = Job::from_bytes(&payload).unwrap();

        assert_eq!(decoded.id, job.id);
        assert_eq!(decoded.content, job.content);
        assert_eq!(decoded.content_hash, job.content_hash);
        assert_eq!(decoded.owner_id, job.owner_id);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(ProcessingStatus::parse("processing"), ProcessingStatus::Processing);
        assert_eq!(ProcessingStatus::parse("processed"), ProcessingStatus::Processed);
        assert_eq!(ProcessingStatus::parse("failed"), ProcessingStatus::Failed);
        assert_eq!(ProcessingStatus::parse("garbage"), ProcessingStatus::Unknown);
    }
}
