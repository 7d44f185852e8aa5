//! Streaming Session State
//!
//! Connection lifecycle and counters of the streamer session, shared between
//! the connection, the forwarder, the publish queue and the health endpoint.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Lifecycle of one streamer connection.
///
/// `Unconnected -> Connecting -> Open -> Closed`. `Closed` is terminal for a
/// connection; a reconnect starts over with a new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No connection attempted yet.
    #[default]
    Unconnected,
    /// Transport handshake in progress.
    Connecting,
    /// Frames may be sent and received.
    Open,
    /// The connection is gone.
    Closed,
}

impl ConnectionState {
    /// State name for logs and health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unconnected => "unconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }

    /// Whether send and receive are valid.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Point-in-time copy of the feed counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedSnapshot {
    /// Current connection state.
    pub state: ConnectionState,
    /// Last time the connection opened.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Last connection error, cleared on open.
    pub last_error: Option<String>,
    /// Instruments in the active subscription.
    pub subscribed_instruments: u64,
    /// Reconnect attempts since the last healthy session.
    pub reconnect_attempts: u32,
    /// Frames received from the streamer.
    pub frames_received: u64,
    /// Frames that qualified and were queued for publishing.
    pub frames_forwarded: u64,
    /// Frames dropped by the classifier.
    pub frames_discarded: u64,
    /// Frames that failed to decode.
    pub frames_malformed: u64,
    /// Events acknowledged by the sink.
    pub events_published: u64,
    /// Publishes that failed.
    pub publish_failures: u64,
    /// Events dropped because the publish queue was full.
    pub queue_drops: u64,
}

/// Shared state of the streamer feed.
#[derive(Debug, Default)]
pub struct FeedState {
    state: RwLock<ConnectionState>,
    last_connected_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    subscribed_instruments: AtomicU64,
    reconnect_attempts: AtomicU32,
    frames_received: AtomicU64,
    frames_forwarded: AtomicU64,
    frames_discarded: AtomicU64,
    frames_malformed: AtomicU64,
    events_published: AtomicU64,
    publish_failures: AtomicU64,
    queue_drops: AtomicU64,
}

impl FeedState {
    /// Create a feed in the `Unconnected` state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection state.
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        if state == ConnectionState::Open {
            *self.last_connected_at.write() = Some(Utc::now());
            *self.last_error.write() = None;
        }
    }

    /// Close the feed with an error message.
    pub fn set_error(&self, message: String) {
        *self.state.write() = ConnectionState::Closed;
        *self.last_error.write() = Some(message);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Record the size of the active subscription.
    pub fn set_subscribed_instruments(&self, count: u64) {
        self.subscribed_instruments.store(count, Ordering::Relaxed);
    }

    /// Count a reconnect attempt.
    pub fn increment_reconnect_attempts(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Clear reconnect attempts after a healthy session.
    pub fn reset_reconnect_attempts(&self) {
        self.reconnect_attempts.store(0, Ordering::Relaxed);
    }

    /// Count a received frame.
    pub fn increment_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a forwarded frame.
    pub fn increment_forwarded(&self) {
        self.frames_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a discarded frame.
    pub fn increment_discarded(&self) {
        self.frames_discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a malformed frame.
    pub fn increment_malformed(&self) {
        self.frames_malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an acknowledged publish.
    pub fn increment_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failed publish.
    pub fn increment_publish_failures(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an event dropped at the publish queue.
    pub fn increment_queue_drops(&self) {
        self.queue_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Frames received so far.
    #[must_use]
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Frames queued for publishing so far.
    #[must_use]
    pub fn frames_forwarded(&self) -> u64 {
        self.frames_forwarded.load(Ordering::Relaxed)
    }

    /// Copy all counters.
    #[must_use]
    pub fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            state: self.state(),
            last_connected_at: *self.last_connected_at.read(),
            last_error: self.last_error.read().clone(),
            subscribed_instruments: self.subscribed_instruments.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_forwarded: self.frames_forwarded.load(Ordering::Relaxed),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
            frames_malformed: self.frames_malformed.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            queue_drops: self.queue_drops.load(Ordering::Relaxed),
        }
    }
}
