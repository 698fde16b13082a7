//! Optical-recognition pipeline: a pooled set of expensive engine handles
//! drained by a dispatcher/worker subsystem.

pub mod engine;
pub mod pool;

pub use engine::{EngineFactory, RecognitionEngine};
pub use pool::OcrPool;
