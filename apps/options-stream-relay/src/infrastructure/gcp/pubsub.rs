//! Pub/Sub Publisher
//!
//! [`EventSinkPort`] adapter over the Pub/Sub REST API. Each event is
//! published as one message whose data is the frame text, and the call
//! returns once Pub/Sub has assigned a message id.
//!
//! ```text
//! POST {base}/v1/projects/{project}/topics/{topic}:publish
//! {"messages":[{"data":"<base64>"}]}  ->  {"messageIds":["..."]}
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::auth::GcpTokenProvider;
use crate::application::ports::{EventSinkPort, PublishAck, PublishError};
use crate::domain::frame::RelayEvent;

#[derive(Debug, Serialize)]
struct PublishRequest {
    messages: [OutgoingMessage; 1],
}

#[derive(Debug, Serialize)]
struct OutgoingMessage {
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

/// Publishes relay events to one Pub/Sub topic.
#[derive(Debug, Clone)]
pub struct PubSubPublisher {
    client: Client,
    publish_url: String,
    topic_path: String,
    auth: Arc<GcpTokenProvider>,
}

impl PubSubPublisher {
    /// Create a publisher for `projects/{project}/topics/{topic}`.
    #[must_use]
    pub fn new(
        client: Client,
        base_url: &str,
        project: &str,
        topic: &str,
        auth: Arc<GcpTokenProvider>,
    ) -> Self {
        let topic_path = format!("projects/{project}/topics/{topic}");
        Self {
            client,
            publish_url: format!("{}/v1/{topic_path}:publish", base_url.trim_end_matches('/')),
            topic_path,
            auth,
        }
    }

    /// Full resource name of the topic.
    #[must_use]
    pub fn topic_path(&self) -> &str {
        &self.topic_path
    }
}

#[async_trait]
impl EventSinkPort for PubSubPublisher {
    async fn publish(&self, event: RelayEvent) -> Result<PublishAck, PublishError> {
        let body = PublishRequest {
            messages: [OutgoingMessage {
                data: STANDARD.encode(event.as_bytes()),
            }],
        };

        let mut request = self.client.post(&self.publish_url).json(&body);
        let token = self
            .auth
            .bearer()
            .await
            .map_err(|e| PublishError::Auth {
                message: e.to_string(),
            })?;
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| PublishError::Connection {
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PublishError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let ack: PublishResponse = response.json().await.map_err(|e| {
            tracing::warn!(topic = %self.topic_path, error = %e, "Undecodable publish response");
            PublishError::MissingAck
        })?;

        ack.message_ids
            .into_iter()
            .next()
            .map(|message_id| PublishAck { message_id })
            .ok_or(PublishError::MissingAck)
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const FRAME: &str = r#"{"data":[{"content":[{"foo":"bar"}]}]}"#;

    fn publisher(server: &MockServer, auth: GcpTokenProvider) -> PubSubPublisher {
        PubSubPublisher::new(
            Client::new(),
            &server.uri(),
            "projectoceanis",
            "options_events",
            Arc::new(auth),
        )
    }

    #[tokio::test]
    async fn publishes_base64_frame_and_returns_message_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/projectoceanis/topics/options_events:publish"))
            .and(header("authorization", "Bearer ya29.token"))
            .and(body_json(serde_json::json!({
                "messages": [{"data": STANDARD.encode(FRAME)}]
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"messageIds": ["7"]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let ack = publisher(&server, GcpTokenProvider::fixed("ya29.token"))
            .publish(RelayEvent::new(FRAME))
            .await
            .unwrap();
        assert_eq!(ack.message_id, "7");
    }

    #[tokio::test]
    async fn empty_message_ids_is_missing_ack() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let err = publisher(&server, GcpTokenProvider::anonymous())
            .publish(RelayEvent::new(FRAME))
            .await
            .unwrap_err();
        assert_eq!(err, PublishError::MissingAck);
    }

    #[tokio::test]
    async fn error_status_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("topic not found"))
            .mount(&server)
            .await;

        let err = publisher(&server, GcpTokenProvider::anonymous())
            .publish(RelayEvent::new(FRAME))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PublishError::Rejected {
                status: 404,
                message: "topic not found".to_string()
            }
        );
    }

    #[test]
    fn topic_path_and_url() {
        let publisher = PubSubPublisher::new(
            Client::new(),
            "http://localhost:8085/",
            "p",
            "t",
            Arc::new(GcpTokenProvider::anonymous()),
        );
        assert_eq!(publisher.topic_path(), "projects/p/topics/t");
        assert_eq!(
            publisher.publish_url,
            "http://localhost:8085/v1/projects/p/topics/t:publish"
        );
    }
}
