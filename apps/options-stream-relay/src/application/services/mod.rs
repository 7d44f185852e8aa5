//! Application Services
//!
//! Frame forwarding and the asynchronous publish pipeline behind it.

mod forwarder;
mod publish_queue;

pub use forwarder::Forwarder;
pub use publish_queue::{
    DEFAULT_MAX_IN_FLIGHT, DEFAULT_QUEUE_CAPACITY, EnqueueError, PublishQueue, PublishQueueConfig,
    PublishStats, PublishWorker,
};
