#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Options Stream Relay - Brokerage Streamer to Pub/Sub
//!
//! Opens one streaming session against the brokerage's WebSocket streamer,
//! subscribes to the full option chain of a single underlying, and forwards
//! every qualifying data frame, byte for byte, to a Pub/Sub topic.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Protocol values and pure transforms
//!   - `session`: Principals, streamer credentials, the login request
//!   - `subscription`: Option chain keys and the subscription request
//!   - `frame`: Inbound frame classification
//!   - `streaming`: Connection state and feed counters
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Event sink, secret store, brokerage, frame handler
//!   - `services`: Frame forwarder and bounded publish queue
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `streamer`: WebSocket connection, reconnect policy, relay loop
//!   - `tdameritrade`: Brokerage REST client
//!   - `gcp`: Pub/Sub publisher and Secret Manager client
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! Secret Manager ──► access token ──► /userprincipals ──► SessionContext
//!                                     /marketdata/chains ──► SubscriptionRequest
//!
//!                  LOGIN, SUBS
//!   OptionsRelay ───────────────► Streamer WS
//!        ▲                            │ text frames
//!        │                            ▼
//!        │                      ┌───────────┐  forward  ┌─────────────┐
//!        └────── SessionEnd ────│ Forwarder │──────────►│ PublishQueue│──► Pub/Sub
//!                               └───────────┘           └─────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Protocol types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::frame::{Classification, DiscardReason, RelayEvent, classify};
pub use domain::session::{SessionContext, SessionError, UserPrincipals};
pub use domain::streaming::{ConnectionState, FeedSnapshot, FeedState};
pub use domain::subscription::{
    InstrumentKey, OptionChain, SubscriptionRequest, collect_instrument_keys,
};

// Ports
pub use application::ports::{
    BrokerageError, BrokeragePort, EventSinkPort, InMemoryEventSink, PublishAck, PublishError,
    SecretStoreError, SecretStorePort,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, RelayConfig};

// Relay
pub use infrastructure::streamer::{OptionsRelay, RelayError, RelaySettings, SessionEnd};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
