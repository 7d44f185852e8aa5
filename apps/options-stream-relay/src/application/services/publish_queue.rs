//! Publish Queue
//!
//! Decouples forwarding from publish acknowledgement. The forwarder enqueues
//! without waiting; a worker task drains the queue, publishes with bounded
//! concurrency and awaits each acknowledgement. Failed publishes are logged
//! and dropped. A full queue drops the newest event.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::application::ports::EventSinkPort;
use crate::domain::frame::RelayEvent;
use crate::domain::streaming::FeedState;
use crate::infrastructure::metrics;

/// Default number of events buffered between forwarder and publisher.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Default number of publishes awaiting acknowledgement at once.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// Publish queue sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishQueueConfig {
    /// Events buffered before new ones are dropped.
    pub capacity: usize,
    /// Publishes awaiting acknowledgement at once.
    pub max_in_flight: usize,
}

impl Default for PublishQueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

/// Errors returned when an event cannot be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    /// The queue is at capacity; the event was dropped.
    #[error("publish queue full, event dropped")]
    Full,
    /// The publisher worker is gone.
    #[error("publish queue closed")]
    Closed,
}

/// Totals reported by the worker once the queue is drained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    /// Events acknowledged by the sink.
    pub published: u64,
    /// Events whose publish failed.
    pub failed: u64,
}

/// Producer side of the publish queue.
#[derive(Clone)]
pub struct PublishQueue {
    tx: mpsc::Sender<RelayEvent>,
    feed: Arc<FeedState>,
}

impl std::fmt::Debug for PublishQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishQueue")
            .field("capacity", &self.tx.max_capacity())
            .field("available", &self.tx.capacity())
            .finish_non_exhaustive()
    }
}

/// Handle to the publisher worker task.
#[derive(Debug)]
pub struct PublishWorker {
    handle: JoinHandle<PublishStats>,
}

impl PublishQueue {
    /// Create a queue and spawn its publisher worker.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(
        sink: Arc<dyn EventSinkPort>,
        config: PublishQueueConfig,
        feed: Arc<FeedState>,
    ) -> (Self, PublishWorker) {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let handle = tokio::spawn(run_worker(
            rx,
            sink,
            config.max_in_flight.max(1),
            Arc::clone(&feed),
        ));

        (Self { tx, feed }, PublishWorker { handle })
    }

    /// Queue an event without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Full`] when the queue is at capacity (the event
    /// is dropped and counted) or [`EnqueueError::Closed`] when the worker is
    /// gone.
    pub fn enqueue(&self, event: RelayEvent) -> Result<(), EnqueueError> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.feed.increment_queue_drops();
                metrics::record_queue_drop();
                Err(EnqueueError::Full)
            }
            Err(TrySendError::Closed(_)) => Err(EnqueueError::Closed),
        }
    }
}

impl PublishWorker {
    /// Wait for the worker to publish everything still queued.
    ///
    /// The queue drains once every [`PublishQueue`] clone has been dropped.
    pub async fn drain(self) -> PublishStats {
        match self.handle.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(error = %e, "Publisher worker aborted");
                PublishStats::default()
            }
        }
    }
}

async fn run_worker(
    rx: mpsc::Receiver<RelayEvent>,
    sink: Arc<dyn EventSinkPort>,
    max_in_flight: usize,
    feed: Arc<FeedState>,
) -> PublishStats {
    let published = AtomicU64::new(0);
    let failed = AtomicU64::new(0);

    ReceiverStream::new(rx)
        .for_each_concurrent(max_in_flight, |event| {
            let sink = Arc::clone(&sink);
            let feed = &feed;
            let published = &published;
            let failed = &failed;
            async move {
                tracing::debug!(bytes = event.as_str().len(), "Publishing event");
                let started = Instant::now();

                match sink.publish(event).await {
                    Ok(ack) => {
                        published.fetch_add(1, Ordering::Relaxed);
                        feed.increment_published();
                        metrics::record_publish_success(started.elapsed());
                        tracing::debug!(message_id = %ack.message_id, "Event published");
                    }
                    Err(e) => {
                        failed.fetch_add(1, Ordering::Relaxed);
                        feed.increment_publish_failures();
                        metrics::record_publish_failure();
                        tracing::error!(error = %e, "Publish failed, event dropped");
                    }
                }
            }
        })
        .await;

    PublishStats {
        published: published.load(Ordering::Relaxed),
        failed: failed.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::application::ports::{InMemoryEventSink, MockEventSinkPort, PublishAck, PublishError};

    #[tokio::test]
    async fn drains_everything_before_returning() {
        let sink = Arc::new(InMemoryEventSink::new());
        let feed = Arc::new(FeedState::new());
        let (queue, worker) =
            PublishQueue::spawn(sink.clone(), PublishQueueConfig::default(), feed.clone());

        for i in 0..10 {
            queue.enqueue(RelayEvent::new(format!("event-{i}"))).unwrap();
        }
        drop(queue);

        let stats = worker.drain().await;
        assert_eq!(stats, PublishStats { published: 10, failed: 0 });
        assert_eq!(sink.len(), 10);
        assert_eq!(feed.snapshot().events_published, 10);
    }

    #[tokio::test]
    async fn single_in_flight_preserves_order() {
        let sink = Arc::new(InMemoryEventSink::new());
        let config = PublishQueueConfig {
            capacity: 16,
            max_in_flight: 1,
        };
        let (queue, worker) = PublishQueue::spawn(sink.clone(), config, Arc::new(FeedState::new()));

        for text in ["a", "b", "c"] {
            queue.enqueue(RelayEvent::new(text)).unwrap();
        }
        drop(queue);
        worker.drain().await;

        let texts: Vec<String> = sink.events().into_iter().map(RelayEvent::into_inner).collect();
        assert_eq!(texts, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn failures_are_counted_and_dropped() {
        let mut sink = MockEventSinkPort::new();
        sink.expect_publish()
            .times(2)
            .returning(|event| {
                if event.as_str() == "bad" {
                    Err(PublishError::MissingAck)
                } else {
                    Ok(PublishAck {
                        message_id: "1".to_string(),
                    })
                }
            });

        let feed = Arc::new(FeedState::new());
        let (queue, worker) =
            PublishQueue::spawn(Arc::new(sink), PublishQueueConfig::default(), feed.clone());
        queue.enqueue(RelayEvent::new("bad")).unwrap();
        queue.enqueue(RelayEvent::new("good")).unwrap();
        drop(queue);

        let stats = worker.drain().await;
        assert_eq!(stats, PublishStats { published: 1, failed: 1 });
        assert_eq!(feed.snapshot().publish_failures, 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn full_queue_drops_newest() {
        let sink = Arc::new(InMemoryEventSink::new());
        let feed = Arc::new(FeedState::new());
        let config = PublishQueueConfig {
            capacity: 1,
            max_in_flight: 1,
        };
        let (queue, worker) = PublishQueue::spawn(sink.clone(), config, feed.clone());

        // The worker cannot run until this task yields, so the second event
        // finds the single slot taken.
        assert_ok!(queue.enqueue(RelayEvent::new("kept")));
        assert_eq!(assert_err!(queue.enqueue(RelayEvent::new("dropped"))), EnqueueError::Full);
        drop(queue);

        worker.drain().await;
        assert_eq!(sink.events(), vec![RelayEvent::new("kept")]);
        assert_eq!(feed.snapshot().queue_drops, 1);
    }
}
