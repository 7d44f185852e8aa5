//! Event Sink Port (Driven Port)
//!
//! Publish-and-confirm contract for relayed events.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::frame::RelayEvent;

/// Acknowledgement of a published event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    /// Message id assigned by the sink.
    pub message_id: String,
}

/// Event publishing error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// The sink could not be reached.
    #[error("event sink connection error: {message}")]
    Connection {
        /// Error detail.
        message: String,
    },

    /// The sink rejected the event.
    #[error("event sink rejected publish ({status}): {message}")]
    Rejected {
        /// HTTP status or sink-specific code.
        status: u16,
        /// Error detail.
        message: String,
    },

    /// The sink answered without a message id.
    #[error("event sink returned no acknowledgement")]
    MissingAck,

    /// Credentials for the sink could not be obtained.
    #[error("event sink authentication failed: {message}")]
    Auth {
        /// Error detail.
        message: String,
    },
}

/// Port for publishing relay events.
///
/// Implementations are shared across concurrent publishes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSinkPort: Send + Sync {
    /// Publish one event and wait for its acknowledgement.
    async fn publish(&self, event: RelayEvent) -> Result<PublishAck, PublishError>;
}

/// Event sink that keeps published events in memory.
#[derive(Debug, Default)]
pub struct InMemoryEventSink {
    events: Mutex<Vec<RelayEvent>>,
    next_id: AtomicU64,
    failing: AtomicBool,
}

impl InMemoryEventSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes fail (`true`) or succeed (`false`).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Snapshot of the events published so far.
    #[must_use]
    pub fn events(&self) -> Vec<RelayEvent> {
        self.events.lock().clone()
    }

    /// Number of events published so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether nothing has been published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[async_trait]
impl EventSinkPort for InMemoryEventSink {
    async fn publish(&self, event: RelayEvent) -> Result<PublishAck, PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::MissingAck);
        }

        self.events.lock().push(event);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(PublishAck {
            message_id: format!("mem-{id}"),
        })
    }
}
