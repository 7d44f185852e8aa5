//! Secret Manager Client
//!
//! [`SecretStorePort`] adapter over the Secret Manager REST API (v1).

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::auth::GcpTokenProvider;
use crate::application::ports::{SecretStoreError, SecretStorePort};

#[derive(Debug, Deserialize)]
struct AccessResponse {
    payload: SecretPayload,
}

#[derive(Debug, Serialize, Deserialize)]
struct SecretPayload {
    data: String,
}

#[derive(Debug, Serialize)]
struct AddVersionRequest {
    payload: SecretPayload,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    name: String,
}

/// Secret Manager client scoped to one project.
#[derive(Debug, Clone)]
pub struct SecretManagerClient {
    client: Client,
    base_url: String,
    project: String,
    auth: Arc<GcpTokenProvider>,
}

impl SecretManagerClient {
    /// Create a client for secrets of `project`.
    #[must_use]
    pub fn new(client: Client, base_url: &str, project: &str, auth: Arc<GcpTokenProvider>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            project: project.to_string(),
            auth,
        }
    }

    /// Resource name of a secret.
    #[must_use]
    pub fn secret_path(&self, secret_id: &str) -> String {
        format!("projects/{}/secrets/{secret_id}", self.project)
    }

    /// Resource name of a secret version.
    #[must_use]
    pub fn version_path(&self, secret_id: &str, version: &str) -> String {
        format!("{}/versions/{version}", self.secret_path(secret_id))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        name: &str,
    ) -> Result<T, SecretStoreError> {
        let mut request = request;
        if let Some(token) = self
            .auth
            .bearer()
            .await
            .map_err(|e| SecretStoreError::Auth(e.to_string()))?
        {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SecretStoreError::Network(e.to_string()))?;

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => {
                return Err(SecretStoreError::NotFound {
                    name: name.to_string(),
                });
            }
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                return Err(SecretStoreError::PermissionDenied {
                    name: name.to_string(),
                });
            }
            _ if !status.is_success() => {
                let message = response.text().await.unwrap_or_default();
                return Err(SecretStoreError::Api {
                    status: status.as_u16(),
                    message,
                });
            }
            _ => {}
        }

        response
            .json()
            .await
            .map_err(|e| SecretStoreError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl SecretStorePort for SecretManagerClient {
    async fn get_secret(&self, secret_id: &str, version: &str) -> Result<String, SecretStoreError> {
        let name = self.version_path(secret_id, version);
        let url = format!("{}/v1/{name}:access", self.base_url);

        let response: AccessResponse = self.call(self.client.get(url), &name).await?;
        let bytes = STANDARD
            .decode(response.payload.data.as_bytes())
            .map_err(|e| SecretStoreError::InvalidResponse(e.to_string()))?;

        tracing::debug!(secret = %name, "Secret version accessed");
        String::from_utf8(bytes).map_err(|e| SecretStoreError::InvalidResponse(e.to_string()))
    }

    async fn add_secret_version(
        &self,
        secret_id: &str,
        value: &str,
    ) -> Result<String, SecretStoreError> {
        let name = self.secret_path(secret_id);
        let url = format!("{}/v1/{name}:addVersion", self.base_url);
        let body = AddVersionRequest {
            payload: SecretPayload {
                data: STANDARD.encode(value.as_bytes()),
            },
        };

        let version: VersionResponse = self.call(self.client.post(url).json(&body), &name).await?;
        tracing::info!(version = %version.name, "Secret version added");
        Ok(version.name)
    }

    async fn destroy_secret_version(
        &self,
        secret_id: &str,
        version: &str,
    ) -> Result<String, SecretStoreError> {
        let name = self.version_path(secret_id, version);
        let url = format!("{}/v1/{name}:destroy", self.base_url);

        let destroyed: VersionResponse = self
            .call(self.client.post(url).json(&serde_json::json!({})), &name)
            .await?;
        tracing::info!(version = %destroyed.name, "Secret version destroyed");
        Ok(destroyed.name)
    }
}
