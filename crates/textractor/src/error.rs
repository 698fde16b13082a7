use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TextractorError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Recognition error: {0}")]
    Recognition(#[from] RecognitionError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Submission rejections. Raised before any side effect takes place.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Submitted content is empty")]
    EmptyContent,

    #[error("Unknown owner: {owner_id}")]
    UnknownOwner { owner_id: uuid::Uuid },
}

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("Failed to create recognition engine: {0}")]
    EngineCreation(String),

    #[error("Recognition failed: {0}")]
    Failed(String),
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Extraction request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Model returned an empty response")]
    EmptyResponse,

    #[error("Failed to parse extraction response: {0}")]
    ResponseParse(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Worker-pool lifecycle errors. `EngineInit` is fatal at startup: the pool
/// refuses to start with fewer engines than configured.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Failed to initialize engine {index}: {source}")]
    EngineInit {
        index: usize,
        #[source]
        source: RecognitionError,
    },

    #[error("Pool channel closed unexpectedly")]
    ChannelClosed,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TextractorError>;
