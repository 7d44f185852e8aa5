//! Brokerage Port (Driven Port)
//!
//! Session metadata and instrument discovery from the brokerage REST API.

use async_trait::async_trait;

use crate::domain::session::UserPrincipals;
use crate::domain::subscription::OptionChain;

/// Brokerage REST error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerageError {
    /// Transport failure.
    #[error("brokerage request failed: {0}")]
    Network(String),

    /// The access token was rejected.
    #[error("brokerage rejected the access token")]
    Unauthorized,

    /// Any other non-success status.
    #[error("brokerage API error ({status}): {message}")]
    Api {
        /// HTTP status.
        status: u16,
        /// Response body.
        message: String,
    },

    /// The response body did not match the expected shape.
    #[error("failed to decode brokerage response: {0}")]
    Decode(String),
}

/// Port for the brokerage REST endpoints used before streaming starts.
#[async_trait]
pub trait BrokeragePort: Send + Sync {
    /// Fetch account and streamer metadata for the token's owner.
    async fn user_principals(&self, access_token: &str) -> Result<UserPrincipals, BrokerageError>;

    /// Fetch the option chain of one underlying symbol.
    async fn option_chain(&self, symbol: &str) -> Result<OptionChain, BrokerageError>;
}
