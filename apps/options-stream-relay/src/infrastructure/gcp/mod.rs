//! Google Cloud Integration
//!
//! REST clients for Pub/Sub (event sink) and Secret Manager (access token),
//! sharing one token provider.

pub mod auth;
pub mod pubsub;
pub mod secret_manager;

pub use auth::{AuthError, GcpTokenProvider};
pub use pubsub::PubSubPublisher;
pub use secret_manager::SecretManagerClient;
