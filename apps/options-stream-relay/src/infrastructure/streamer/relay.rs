//! Options Relay
//!
//! Drives streamer sessions: connect, log in, subscribe, then relay
//! qualifying frames to the event sink until the stream ends. With
//! reconnection enabled the relay starts a fresh session (new connection,
//! new login, new subscription) with exponential backoff; otherwise it
//! returns once the first session ends.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::connection::{ConnectError, ConnectionManager, SendError, SessionEnd};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::EventSinkPort;
use crate::application::services::{Forwarder, PublishQueue, PublishQueueConfig, PublishStats};
use crate::domain::session::{SessionContext, SessionError};
use crate::domain::streaming::FeedState;
use crate::domain::subscription::SubscriptionRequest;
use crate::infrastructure::config::{RelayConfig, StreamerSettings};
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end the relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// A request frame could not be built.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The streamer could not be reached.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Login or subscription could not be sent.
    #[error("failed to send request: {0}")]
    Send(#[from] SendError),

    /// Reconnection gave up.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxReconnectAttemptsExceeded(u32),
}

// =============================================================================
// Settings & Reports
// =============================================================================

/// Relay tuning.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelaySettings {
    /// Streamer connection settings.
    pub streamer: StreamerSettings,
    /// Publish queue sizing.
    pub publish: PublishQueueConfig,
    /// Backoff between sessions; `None` disables reconnection.
    pub reconnect: Option<ReconnectConfig>,
}

impl RelaySettings {
    /// Relay tuning taken from the service configuration.
    #[must_use]
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            streamer: config.streamer,
            publish: PublishQueueConfig {
                capacity: config.publish.queue_capacity,
                max_in_flight: config.publish.max_in_flight,
            },
            reconnect: config
                .reconnect
                .enabled
                .then(|| ReconnectConfig::from_settings(&config.reconnect)),
        }
    }
}

/// Outcome of one streamer session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    /// How the receive loop ended.
    pub end: SessionEnd,
    /// Frames received during the session.
    pub frames_received: u64,
    /// Frames forwarded to the publish queue during the session.
    pub frames_forwarded: u64,
    /// Publish totals of the session.
    pub publish: PublishStats,
}

// =============================================================================
// Options Relay
// =============================================================================

/// Relays option market data from the streamer to the event sink.
pub struct OptionsRelay {
    endpoint: String,
    login_frame: String,
    subscription_frame: String,
    instruments: usize,
    connections: ConnectionManager,
    sink: Arc<dyn EventSinkPort>,
    settings: RelaySettings,
    feed: Arc<FeedState>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for OptionsRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionsRelay")
            .field("endpoint", &self.endpoint)
            .field("instruments", &self.instruments)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl OptionsRelay {
    /// Create a relay for one session context and subscription.
    ///
    /// Both request frames are serialized once here and resent unchanged on
    /// every reconnect.
    ///
    /// # Errors
    ///
    /// Returns an error if a request frame cannot be serialized.
    pub fn new(
        session: &SessionContext,
        subscription: &SubscriptionRequest,
        sink: Arc<dyn EventSinkPort>,
        settings: RelaySettings,
        feed: Arc<FeedState>,
        cancel: CancellationToken,
    ) -> Result<Self, RelayError> {
        Ok(Self {
            endpoint: session.streamer_url(),
            login_frame: session.login_request().to_frame()?,
            subscription_frame: subscription.to_frame()?,
            instruments: subscription.key_count(),
            connections: ConnectionManager::new(
                settings.streamer,
                Arc::clone(&feed),
                cancel.clone(),
            ),
            sink,
            settings,
            feed,
            cancel,
        })
    }

    /// Connect somewhere other than the session's streamer host.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Streamer endpoint this relay connects to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Run sessions until the stream ends for good, the relay is cancelled,
    /// or reconnection gives up.
    ///
    /// # Errors
    ///
    /// Without reconnection, returns the error of the only session. With
    /// reconnection, returns [`RelayError::MaxReconnectAttemptsExceeded`] once
    /// the policy is exhausted.
    pub async fn run(&self) -> Result<(), RelayError> {
        let Some(reconnect) = self.settings.reconnect else {
            return match self.run_session().await {
                Ok(_) | Err(RelayError::Connect(ConnectError::Cancelled)) => Ok(()),
                Err(e) => Err(e),
            };
        };

        let mut policy = ReconnectPolicy::new(reconnect);

        loop {
            match self.run_session().await {
                Ok(report) if report.end == SessionEnd::Cancelled => return Ok(()),
                Ok(report) => {
                    // Only market data resets the backoff; a rejected login
                    // still produces a response frame.
                    if report.frames_forwarded > 0 {
                        policy.reset();
                        self.feed.reset_reconnect_attempts();
                    }
                }
                Err(RelayError::Connect(ConnectError::Cancelled)) => return Ok(()),
                Err(e) => tracing::warn!(error = %e, "Streamer session failed"),
            }

            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let Some(delay) = policy.next_delay() else {
                return Err(RelayError::MaxReconnectAttemptsExceeded(
                    policy.attempt_count(),
                ));
            };

            let attempt = policy.attempt_count();
            self.feed.increment_reconnect_attempts();
            metrics::record_reconnect();
            tracing::info!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to streamer"
            );

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Relay cancelled during reconnect delay");
                    return Ok(());
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Run one session: connect, log in, subscribe, relay until the stream
    /// ends, then wait for queued events to be published.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be opened or a request frame
    /// cannot be sent. Errors after that point end the session normally and
    /// are reported in [`SessionReport::end`].
    pub async fn run_session(&self) -> Result<SessionReport, RelayError> {
        let mut connection = self.connections.connect(&self.endpoint).await?;

        connection.send(&self.login_frame).await?;
        tracing::info!("Login request sent");

        connection.send(&self.subscription_frame).await?;
        self.feed
            .set_subscribed_instruments(u64::try_from(self.instruments).unwrap_or(u64::MAX));
        metrics::set_subscribed_instruments(self.instruments);
        tracing::info!(instruments = self.instruments, "Subscription request sent");

        let received_before = self.feed.frames_received();
        let forwarded_before = self.feed.frames_forwarded();
        let (queue, worker) =
            PublishQueue::spawn(Arc::clone(&self.sink), self.settings.publish, Arc::clone(&self.feed));
        let mut forwarder = Forwarder::new(queue, Arc::clone(&self.feed));

        let end = connection.receive_loop(&mut forwarder).await;

        // Closing the queue lets the worker finish what is already queued.
        drop(forwarder);
        let publish = worker.drain().await;

        let report = SessionReport {
            end,
            frames_received: self.feed.frames_received() - received_before,
            frames_forwarded: self.feed.frames_forwarded() - forwarded_before,
            publish,
        };
        tracing::info!(
            frames = report.frames_received,
            forwarded = report.frames_forwarded,
            published = report.publish.published,
            publish_failures = report.publish.failed,
            "Streamer session finished"
        );
        Ok(report)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    use super::*;
    use crate::application::ports::{InMemoryEventSink, MockEventSinkPort, PublishAck};
    use crate::domain::session::tests::sample_principals;
    use crate::domain::subscription::InstrumentKey;

    const QUOTE: &str = r#"{"data":[{"service":"OPTION","content":[{"key":"NVDA_C500","2":1.25}]}]}"#;

    fn relay(sink: Arc<dyn EventSinkPort>, reconnect: Option<ReconnectConfig>) -> OptionsRelay {
        let session = SessionContext::from_principals(&sample_principals()).unwrap();
        let keys = [InstrumentKey::new("NVDA_C500"), InstrumentKey::new("NVDA_P500")];
        let subscription = SubscriptionRequest::new(&session, &keys);
        let settings = RelaySettings {
            streamer: StreamerSettings {
                connect_timeout: Duration::from_secs(5),
                idle_timeout: Some(Duration::from_secs(5)),
            },
            publish: PublishQueueConfig::default(),
            reconnect,
        };
        OptionsRelay::new(
            &session,
            &subscription,
            sink,
            settings,
            Arc::new(FeedState::new()),
            CancellationToken::new(),
        )
        .unwrap()
    }

    /// Accepts connections forever; each one reads the two requests, sends
    /// `first` on the first connection and `rest` on later ones, then closes.
    async fn streamer(
        first: Vec<&'static str>,
        rest: Vec<&'static str>,
        connections: Arc<AtomicUsize>,
    ) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let index = connections.fetch_add(1, Ordering::SeqCst);
                let frames = if index == 0 { first.clone() } else { rest.clone() };
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                    for _ in 0..2 {
                        let _ = ws.next().await;
                    }
                    for frame in frames {
                        ws.send(Message::text(frame)).await.unwrap();
                    }
                    let _ = ws.close(None).await;
                    while ws.next().await.is_some() {}
                });
            }
        });
        format!("ws://{addr}/ws")
    }

    #[test]
    fn endpoint_comes_from_session() {
        let relay = relay(Arc::new(InMemoryEventSink::new()), None);
        assert_eq!(relay.endpoint(), "wss://streamer-ws.tdameritrade.com/ws");
        assert_eq!(relay.instruments, 2);
        assert!(relay.login_frame.contains(r#""command":"LOGIN""#));
        assert!(relay.subscription_frame.contains(r#""keys":"NVDA_C500,NVDA_P500""#));
    }

    #[test]
    fn settings_follow_configuration() {
        let mut config = RelayConfig::default();
        config.publish.queue_capacity = 5;
        assert_eq!(RelaySettings::from_config(&config).publish.capacity, 5);
        assert!(RelaySettings::from_config(&config).reconnect.is_none());

        config.reconnect.enabled = true;
        config.reconnect.max_attempts = 3;
        let reconnect = RelaySettings::from_config(&config).reconnect.unwrap();
        assert_eq!(reconnect.max_attempts, 3);
        assert_eq!(reconnect.initial_delay, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn session_publishes_only_qualifying_frames() {
        let mut sink = MockEventSinkPort::new();
        sink.expect_publish()
            .withf(|event| event.as_str() == QUOTE)
            .times(1)
            .returning(|_| {
                Ok(PublishAck {
                    message_id: "42".to_string(),
                })
            });

        let endpoint = streamer(
            vec![
                r#"{"response":[{"service":"ADMIN","command":"LOGIN","content":{"code":0}}]}"#,
                r#"{"data":[{"content":[{"cusip":"123"}]}]}"#,
                QUOTE,
                "garbage",
            ],
            Vec::new(),
            Arc::new(AtomicUsize::new(0)),
        )
        .await;

        let relay = relay(Arc::new(sink), None).with_endpoint(endpoint);
        let report = relay.run_session().await.unwrap();

        assert!(report.end.is_clean());
        assert_eq!(report.frames_received, 4);
        assert_eq!(report.frames_forwarded, 1);
        assert_eq!(report.publish, PublishStats { published: 1, failed: 0 });
    }

    #[tokio::test]
    async fn without_reconnect_run_returns_after_first_session() {
        let connections = Arc::new(AtomicUsize::new(0));
        let endpoint = streamer(vec![QUOTE], Vec::new(), connections.clone()).await;
        let sink = Arc::new(InMemoryEventSink::new());

        relay(sink.clone(), None).with_endpoint(endpoint).run().await.unwrap();

        assert_eq!(connections.load(Ordering::SeqCst), 1);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn reconnect_gives_up_after_empty_sessions() {
        let connections = Arc::new(AtomicUsize::new(0));
        let endpoint = streamer(vec![QUOTE], Vec::new(), connections.clone()).await;
        let sink = Arc::new(InMemoryEventSink::new());
        let backoff = ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 1,
        };

        let err = relay(sink.clone(), Some(backoff))
            .with_endpoint(endpoint)
            .run()
            .await
            .unwrap_err();

        // The first session carried data and reset the policy; the second was
        // empty and used up the only attempt.
        assert!(matches!(err, RelayError::MaxReconnectAttemptsExceeded(1)));
        assert_eq!(connections.load(Ordering::SeqCst), 2);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn rejected_login_exhausts_reconnect_attempts() {
        const LOGIN_DENIED: &str = r#"{"response":[{"service":"ADMIN","command":"LOGIN","content":{"code":3,"msg":"Login denied"}}]}"#;

        let connections = Arc::new(AtomicUsize::new(0));
        let endpoint = streamer(
            vec![LOGIN_DENIED],
            vec![LOGIN_DENIED],
            connections.clone(),
        )
        .await;
        let sink = Arc::new(InMemoryEventSink::new());
        let backoff = ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 1,
        };

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            relay(sink.clone(), Some(backoff)).with_endpoint(endpoint).run(),
        )
        .await
        .expect("relay should give up on a streamer that only rejects logins");

        assert!(matches!(
            result,
            Err(RelayError::MaxReconnectAttemptsExceeded(1))
        ));
        assert_eq!(connections.load(Ordering::SeqCst), 2);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn unreachable_streamer_is_fatal_without_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = relay(Arc::new(InMemoryEventSink::new()), None)
            .with_endpoint(format!("ws://{addr}/ws"))
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Connect(ConnectError::Handshake(_))));
    }
}
