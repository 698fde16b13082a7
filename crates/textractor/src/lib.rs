pub mod bus;
pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod job;
pub mod llm;
pub mod ocr;
pub mod orchestrator;
pub mod service;
pub mod storage;
pub mod telemetry;

pub use bus::{InProcessBus, MessageBus, Subscription};
pub use config::{load_config, Config, LlmSettings, OcrSettings};
pub use document::{DocPage, ExtractedDoc};
pub use error::{
    ExtractionError, PoolError, RecognitionError, Result, TextractorError, ValidationError,
};
pub use job::{Job, ProcessingStatus};
pub use llm::{LlmPool, OpenAiExtractor, TextExtractor};
pub use ocr::{EngineFactory, OcrPool, RecognitionEngine};
pub use orchestrator::Orchestrator;
pub use service::DocService;
pub use storage::FileStore;
