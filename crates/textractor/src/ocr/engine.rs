//! The recognition capability seam.
//!
//! A [`RecognitionEngine`] is one expensive, stateful handle on the
//! underlying recognition backend (a licensed native engine in production).
//! Handles are created once at startup through an [`EngineFactory`] and live
//! in the pool for the lifetime of the process; dropping a handle releases
//! the backend resources.

use crate::document::ExtractedDoc;
use crate::error::RecognitionError;

/// One recognition-engine handle. `recognize` takes `&mut self`: a handle
/// serves a single document at a time, which is what the pool's lease
/// discipline guarantees.
pub trait RecognitionEngine: Send {
    fn recognize(&mut self, content: &[u8]) -> Result<ExtractedDoc, RecognitionError>;
}

/// Creates engine handles during pool startup.
pub trait EngineFactory {
    fn create_engine(&self) -> Result<Box<dyn RecognitionEngine>, RecognitionError>;
}
