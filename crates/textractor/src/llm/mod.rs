//! Language-model extraction pipeline: a dispatcher/worker subsystem over a
//! remote chat-completions backend.

pub mod extractor;
pub mod pool;

pub use extractor::{OpenAiExtractor, TextExtractor};
pub use pool::LlmPool;
