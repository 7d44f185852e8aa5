//! Domain Layer - Streamer protocol values and pure transforms.
//!
//! Nothing in this layer performs I/O. Types carry serialization support so
//! adapters can decode brokerage payloads straight into them.

/// Session credentials and the login request.
pub mod session;

/// Instrument discovery result and the subscription request.
pub mod subscription;

/// Inbound frame classification.
pub mod frame;

/// Connection lifecycle and feed counters.
pub mod streaming;
