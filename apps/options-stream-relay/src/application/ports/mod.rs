//! Application Ports (Driver and Driven)
//!
//! Interfaces for the external collaborators the relay depends on. Concrete
//! adapters live in the infrastructure layer.
//!
//! ## Driven Ports (Outbound)
//!
//! - `EventSinkPort`: publish relayed events and await acknowledgement
//! - `SecretStorePort`: read the brokerage access token
//! - `BrokeragePort`: user principals and option chain discovery
//!
//! ## Driver Ports (Inbound)
//!
//! - `FrameHandler`: receives each inbound streamer frame

mod brokerage_port;
mod event_sink_port;
mod frame_handler_port;
mod secret_store_port;

pub use brokerage_port::{BrokerageError, BrokeragePort};
#[cfg(test)]
pub use event_sink_port::MockEventSinkPort;
pub use event_sink_port::{EventSinkPort, InMemoryEventSink, PublishAck, PublishError};
pub use frame_handler_port::{FrameError, FrameHandler};
pub use secret_store_port::{LATEST_VERSION, SecretStoreError, SecretStorePort};
