//! Google Cloud Access Tokens
//!
//! Bearer tokens for the Pub/Sub and Secret Manager REST APIs.
//!
//! Token sources:
//! - none, for local emulators
//! - `GOOGLE_OAUTH_ACCESS_TOKEN`, used as-is when set
//! - the GCE metadata server otherwise, cached until shortly before expiry

use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;

/// Metadata server endpoint for the default service account token.
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Environment variable holding a pre-minted access token.
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Error obtaining an access token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The metadata server could not be reached.
    #[error("metadata server request failed: {0}")]
    Network(String),

    /// The metadata server refused the request.
    #[error("metadata server returned {status}: {message}")]
    Refused {
        /// HTTP status.
        status: u16,
        /// Response body.
        message: String,
    },

    /// The token response could not be decoded.
    #[error("invalid token response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

enum TokenSource {
    Anonymous,
    Fixed(String),
    Metadata { client: Client, url: String },
}

/// Supplies bearer tokens to the Google Cloud clients.
pub struct GcpTokenProvider {
    source: TokenSource,
    cache: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for GcpTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let source = match &self.source {
            TokenSource::Anonymous => "anonymous",
            TokenSource::Fixed(_) => "fixed",
            TokenSource::Metadata { .. } => "metadata",
        };
        f.debug_struct("GcpTokenProvider")
            .field("source", &source)
            .finish_non_exhaustive()
    }
}

impl GcpTokenProvider {
    /// No credentials; requests go out unauthenticated.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::with_source(TokenSource::Anonymous)
    }

    /// Always use the given token.
    #[must_use]
    pub fn fixed(token: impl Into<String>) -> Self {
        Self::with_source(TokenSource::Fixed(token.into()))
    }

    /// Fetch tokens from a metadata server at `url`.
    #[must_use]
    pub fn metadata(client: Client, url: impl Into<String>) -> Self {
        Self::with_source(TokenSource::Metadata {
            client,
            url: url.into(),
        })
    }

    /// Use `GOOGLE_OAUTH_ACCESS_TOKEN` if set, else the metadata server.
    #[must_use]
    pub fn from_env(client: Client) -> Self {
        match std::env::var(ACCESS_TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => Self::fixed(token.trim()),
            _ => Self::metadata(client, METADATA_TOKEN_URL),
        }
    }

    fn with_source(source: TokenSource) -> Self {
        Self {
            source,
            cache: Mutex::new(None),
        }
    }

    /// Current bearer token, or `None` when unauthenticated.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata server cannot provide a token.
    pub async fn bearer(&self) -> Result<Option<String>, AuthError> {
        match &self.source {
            TokenSource::Anonymous => Ok(None),
            TokenSource::Fixed(token) => Ok(Some(token.clone())),
            TokenSource::Metadata { client, url } => {
                let mut cache = self.cache.lock().await;
                if let Some(cached) = cache
                    .as_ref()
                    .filter(|cached| Instant::now() < cached.refresh_at)
                {
                    return Ok(Some(cached.value.clone()));
                }

                let fresh = fetch_metadata_token(client, url).await?;
                let value = fresh.value.clone();
                *cache = Some(fresh);
                Ok(Some(value))
            }
        }
    }
}

async fn fetch_metadata_token(client: &Client, url: &str) -> Result<CachedToken, AuthError> {
    let response = client
        .get(url)
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .map_err(|e| AuthError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(AuthError::Refused {
            status: status.as_u16(),
            message,
        });
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

    let lifetime = Duration::from_secs(token.expires_in).saturating_sub(EXPIRY_MARGIN);
    tracing::debug!(expires_in = token.expires_in, "Fetched access token from metadata server");

    Ok(CachedToken {
        value: token.access_token,
        refresh_at: Instant::now() + lifetime,
    })
}
