use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Dedup signal, not a pipeline failure: a row with this content hash
    /// already exists.
    #[error("Content already processed (hash {hash})")]
    DuplicateContent { hash: String },

    #[error("Failed to serialize document content: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("IO error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}
