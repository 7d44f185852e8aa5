//! Secret Store Port (Driven Port)
//!
//! Access to versioned secrets such as the brokerage access token.

use async_trait::async_trait;

/// Version alias resolving to the newest enabled version.
pub const LATEST_VERSION: &str = "latest";

/// Secret store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecretStoreError {
    /// The secret or version does not exist.
    #[error("secret not found: {name}")]
    NotFound {
        /// Resource name that was requested.
        name: String,
    },

    /// The caller may not access the secret.
    #[error("permission denied for secret: {name}")]
    PermissionDenied {
        /// Resource name that was requested.
        name: String,
    },

    /// Transport failure talking to the store.
    #[error("secret store request failed: {0}")]
    Network(String),

    /// Credentials for the store could not be obtained.
    #[error("secret store authentication failed: {0}")]
    Auth(String),

    /// The store answered with an unexpected payload.
    #[error("invalid secret store response: {0}")]
    InvalidResponse(String),

    /// Any other status returned by the store.
    #[error("secret store error ({status}): {message}")]
    Api {
        /// HTTP status.
        status: u16,
        /// Error detail.
        message: String,
    },
}

/// Port for a versioned secret store.
#[async_trait]
pub trait SecretStorePort: Send + Sync {
    /// Read the payload of one secret version as UTF-8 text.
    async fn get_secret(&self, secret_id: &str, version: &str) -> Result<String, SecretStoreError>;

    /// Read the latest version of a secret.
    async fn get_latest_secret(&self, secret_id: &str) -> Result<String, SecretStoreError> {
        self.get_secret(secret_id, LATEST_VERSION).await
    }

    /// Add a new version holding `value`. Returns the version's resource name.
    async fn add_secret_version(
        &self,
        secret_id: &str,
        value: &str,
    ) -> Result<String, SecretStoreError>;

    /// Destroy one secret version. Returns the version's resource name.
    async fn destroy_secret_version(
        &self,
        secret_id: &str,
        version: &str,
    ) -> Result<String, SecretStoreError>;
}
