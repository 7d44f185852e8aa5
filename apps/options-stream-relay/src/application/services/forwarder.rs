//! Frame Forwarder
//!
//! Classifies each inbound frame and queues the qualifying ones for
//! publishing. The queued payload is the received text, never a
//! re-serialization of the parsed value.

use std::sync::Arc;

use serde_json::Value;

use super::publish_queue::{EnqueueError, PublishQueue};
use crate::application::ports::{FrameError, FrameHandler};
use crate::domain::frame::{
    Classification, DiscardReason, RelayEvent, classify, response_summaries,
};
use crate::domain::streaming::FeedState;
use crate::infrastructure::metrics;

/// Frame handler that relays market-data frames to the publish queue.
#[derive(Debug)]
pub struct Forwarder {
    queue: PublishQueue,
    feed: Arc<FeedState>,
}

impl Forwarder {
    /// Create a forwarder feeding the given queue.
    #[must_use]
    pub const fn new(queue: PublishQueue, feed: Arc<FeedState>) -> Self {
        Self { queue, feed }
    }

    fn forward(&self, frame: &str) -> Result<(), FrameError> {
        self.queue.enqueue(RelayEvent::new(frame))?;

        self.feed.increment_forwarded();
        metrics::record_frame_forwarded();
        Ok(())
    }

    fn discard(&self, frame: &str, reason: DiscardReason) {
        self.feed.increment_discarded();
        metrics::record_frame_discarded(reason);

        match reason {
            DiscardReason::Response => {
                if let Ok(value) = serde_json::from_str::<Value>(frame) {
                    log_responses(&value);
                }
            }
            DiscardReason::Notify => tracing::trace!("Heartbeat received"),
            _ => tracing::debug!(reason = reason.as_str(), "Frame not forwarded"),
        }
    }

    fn malformed(&self, error: String) -> FrameError {
        self.feed.increment_malformed();
        metrics::record_frame_malformed();
        FrameError::Decode(error)
    }
}

impl FrameHandler for Forwarder {
    fn handle_frame(&mut self, frame: &str) -> Result<(), FrameError> {
        match classify(frame) {
            Classification::Forward => self.forward(frame),
            Classification::Discard(reason) => {
                self.discard(frame, reason);
                Ok(())
            }
            Classification::Malformed(e) => Err(self.malformed(e)),
        }
    }
}

fn log_responses(frame: &Value) {
    for response in response_summaries(frame) {
        if response.is_failure() {
            tracing::warn!(
                service = %response.service,
                command = %response.command,
                code = ?response.code,
                message = ?response.message,
                "Streamer rejected request"
            );
        } else {
            tracing::info!(
                service = %response.service,
                command = %response.command,
                message = ?response.message,
                "Streamer acknowledged request"
            );
        }
    }
}

impl From<EnqueueError> for FrameError {
    fn from(e: EnqueueError) -> Self {
        Self::Enqueue(e.to_string())
    }
}
