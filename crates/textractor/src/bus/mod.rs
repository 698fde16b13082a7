//! Topic-based publish/subscribe used to fan submitted jobs out to the
//! processing pipelines.
//!
//! The bus is a collaborator with at-most-once semantics: a published message
//! is delivered to every subscriber registered at publish time, and nothing
//! is retained for late subscribers. [`InProcessBus`] is the in-process
//! implementation; anything with the same topic/payload contract (an external
//! broker client, for instance) can stand in behind [`MessageBus`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use thiserror::Error;
use tracing::debug;

/// Default topic for the recognition pipeline.
pub const OCR_TOPIC: &str = "ocr-processing-topic";
/// Default topic for the language-model extraction pipeline.
pub const LLM_TOPIC: &str = "llm-processing-topic";

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Bus subscriber registry is poisoned")]
    Poisoned,
}

/// A handle on one topic subscription. Receiving drains messages delivered
/// since the subscription was created.
pub struct Subscription {
    receiver: Receiver<Vec<u8>>,
}

impl Subscription {
    /// Blocks until a message arrives or the timeout elapses. `Ok(None)`
    /// means timeout; `Err` means the bus is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Vec<u8>>, BusError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(payload) => Ok(Some(payload)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(BusError::Poisoned),
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Option<Vec<u8>> {
        self.receiver.try_recv().ok()
    }
}

/// Topic publish/subscribe.
pub trait MessageBus: Send + Sync {
    /// Delivers `payload` to every current subscriber of `topic`.
    /// Fire-and-forget: no subscriber acknowledgment is awaited.
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError>;

    /// Registers a new subscriber for `topic`.
    fn subscribe(&self, topic: &str) -> Subscription;
}

/// In-process bus backed by one channel per subscriber.
#[derive(Clone, Default)]
pub struct InProcessBus {
    topics: Arc<Mutex<HashMap<String, Vec<Sender<Vec<u8>>>>>>,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageBus for InProcessBus {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        let mut topics = self.topics.lock().map_err(|_| BusError::Poisoned)?;
        let Some(subscribers) = topics.get_mut(topic) else {
            debug!(topic, "No subscribers for topic, dropping message");
            return Ok(());
        };

        // Deliver to live subscribers, pruning the ones that went away.
        subscribers.retain(|tx| tx.send(payload.to_vec()).is_ok());
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Subscription {
        let (tx, rx) = unbounded();
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics.entry(topic.to_string()).or_default().push(tx);
        Subscription { receiver: rx }
    }
}
