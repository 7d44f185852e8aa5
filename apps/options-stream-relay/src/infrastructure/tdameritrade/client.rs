//! Brokerage REST Client
//!
//! [`BrokeragePort`] adapter for the two REST calls made before streaming:
//! user principals (streamer session metadata) and the option chain of the
//! configured symbol.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use crate::application::ports::{BrokerageError, BrokeragePort};
use crate::domain::session::UserPrincipals;
use crate::domain::subscription::OptionChain;
use crate::infrastructure::config::BrokerageSettings;

/// Extra principal fields required to open a streamer session.
const PRINCIPAL_FIELDS: &str = "streamerSubscriptionKeys,streamerConnectionInfo";

/// HTTP client for the brokerage REST API.
#[derive(Clone)]
pub struct TdAmeritradeClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for TdAmeritradeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TdAmeritradeClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl TdAmeritradeClient {
    /// Create a client from settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: &BrokerageSettings) -> Result<Self, BrokerageError> {
        let client = Client::builder()
            .timeout(settings.http_timeout)
            .build()
            .map_err(|e| BrokerageError::Network(e.to_string()))?;

        Ok(Self::with_client(client, &settings.base_url, &settings.api_key))
    }

    /// Create a client around an existing HTTP client.
    #[must_use]
    pub fn with_client(client: Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, BrokerageError> {
        let response = request
            .send()
            .await
            .map_err(|e| BrokerageError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(BrokerageError::Unauthorized);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BrokerageError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| BrokerageError::Network(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| BrokerageError::Decode(e.to_string()))
    }
}

#[async_trait]
impl BrokeragePort for TdAmeritradeClient {
    async fn user_principals(&self, access_token: &str) -> Result<UserPrincipals, BrokerageError> {
        let request = self
            .client
            .get(format!("{}/userprincipals", self.base_url))
            .bearer_auth(access_token)
            .query(&[("fields", PRINCIPAL_FIELDS)]);

        let principals: UserPrincipals = self.fetch(request).await?;
        tracing::info!(
            accounts = principals.accounts.len(),
            streamer = %principals.streamer_info.streamer_socket_url,
            "Fetched user principals"
        );
        Ok(principals)
    }

    async fn option_chain(&self, symbol: &str) -> Result<OptionChain, BrokerageError> {
        let request = self
            .client
            .get(format!("{}/marketdata/chains", self.base_url))
            .query(&[("apikey", self.api_key.as_str()), ("symbol", symbol)]);

        let chain: OptionChain = self.fetch(request).await?;
        tracing::info!(
            symbol,
            put_expirations = chain.put_exp_date_map.len(),
            call_expirations = chain.call_exp_date_map.len(),
            "Fetched option chain"
        );
        Ok(chain)
    }
}
