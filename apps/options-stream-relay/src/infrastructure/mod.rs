//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports, plus the process-level
//! concerns (configuration, telemetry, metrics, health).

/// Brokerage streamer WebSocket connection and the relay loop.
pub mod streamer;

/// Brokerage REST client (user principals, option chains).
pub mod tdameritrade;

/// Google Cloud adapters (Pub/Sub, Secret Manager).
pub mod gcp;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
