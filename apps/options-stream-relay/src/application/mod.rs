//! Application Layer - Ports and the relay service.
//!
//! Ports describe the external collaborators; services wire the streamer
//! connection, the frame classifier and the event sink together.

/// Port interfaces for external systems (event sink, secrets, brokerage).
pub mod ports;

/// Relay session orchestration and publish queue.
pub mod services;
