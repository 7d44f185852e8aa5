//! Streamer Connection
//!
//! One WebSocket connection to the brokerage streamer. The connection owns
//! the only reader of the socket: frames are pulled one at a time and handed
//! to a [`FrameHandler`] until the remote side closes, the transport fails,
//! the connection goes idle, or the relay is cancelled.
//!
//! # State Machine
//!
//! `Unconnected -> Connecting -> Open -> Closed`. `Closed` is terminal; a
//! reconnect opens a new connection.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::application::ports::FrameHandler;
use crate::domain::streaming::{ConnectionState, FeedState};
use crate::infrastructure::config::StreamerSettings;
use crate::infrastructure::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Error Types
// =============================================================================

/// Errors opening a streamer connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// The endpoint is not a `ws://` or `wss://` URL.
    #[error("invalid streamer endpoint {0}")]
    InvalidEndpoint(String),

    /// The handshake did not finish in time.
    #[error("streamer handshake timed out after {0:?}")]
    Timeout(Duration),

    /// The transport or WebSocket handshake failed.
    #[error("streamer handshake failed: {0}")]
    Handshake(String),

    /// The relay was cancelled while connecting.
    #[error("connect cancelled")]
    Cancelled,
}

/// Errors sending a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The connection is not open.
    #[error("connection is not open")]
    Closed,

    /// The write failed; the connection is now closed.
    #[error("send failed: {0}")]
    Transport(String),
}

/// How a receive loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The streamer sent a close frame.
    RemoteClosed {
        /// Close code, if one was sent.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
    /// The stream ended without a close frame.
    StreamEnded,
    /// Nothing arrived within the idle timeout.
    IdleTimeout(Duration),
    /// The relay was cancelled.
    Cancelled,
    /// The transport failed.
    TransportError(String),
}

impl SessionEnd {
    /// Whether the session ended without a transport fault.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        matches!(
            self,
            Self::RemoteClosed { .. } | Self::StreamEnded | Self::Cancelled
        )
    }
}

impl std::fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RemoteClosed { code: Some(code), reason } => {
                write!(f, "remote closed ({code}): {reason}")
            }
            Self::RemoteClosed { code: None, .. } => write!(f, "remote closed"),
            Self::StreamEnded => write!(f, "stream ended"),
            Self::IdleTimeout(idle) => write!(f, "no frames for {idle:?}"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::TransportError(e) => write!(f, "transport error: {e}"),
        }
    }
}

// =============================================================================
// Connection Manager
// =============================================================================

/// Opens streamer connections.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    settings: StreamerSettings,
    feed: Arc<FeedState>,
    cancel: CancellationToken,
}

impl ConnectionManager {
    /// Create a manager reporting into `feed`.
    #[must_use]
    pub const fn new(
        settings: StreamerSettings,
        feed: Arc<FeedState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            settings,
            feed,
            cancel,
        }
    }

    /// Open a connection to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is invalid, the handshake fails or
    /// times out, or the relay is cancelled meanwhile.
    pub async fn connect(&self, endpoint: &str) -> Result<StreamerConnection, ConnectError> {
        let url = url::Url::parse(endpoint)
            .map_err(|e| ConnectError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConnectError::InvalidEndpoint(endpoint.to_string()));
        }

        tracing::info!(endpoint, "Connecting to streamer");
        self.feed.set_state(ConnectionState::Connecting);

        let handshake =
            tokio::time::timeout(self.settings.connect_timeout, tokio_tungstenite::connect_async(endpoint));

        let outcome = tokio::select! {
            () = self.cancel.cancelled() => Err(ConnectError::Cancelled),
            result = handshake => match result {
                Err(_) => Err(ConnectError::Timeout(self.settings.connect_timeout)),
                Ok(Err(e)) => Err(ConnectError::Handshake(e.to_string())),
                Ok(Ok((ws, _response))) => Ok(ws),
            },
        };

        match outcome {
            Ok(ws) => {
                self.feed.set_state(ConnectionState::Open);
                metrics::set_streamer_connected(true);
                tracing::info!(endpoint, "Streamer connection open");

                Ok(StreamerConnection {
                    ws,
                    state: ConnectionState::Open,
                    endpoint: endpoint.to_string(),
                    idle_timeout: self.settings.idle_timeout,
                    feed: Arc::clone(&self.feed),
                    cancel: self.cancel.clone(),
                })
            }
            Err(e) => {
                self.feed.set_error(e.to_string());
                metrics::record_websocket_error("connect");
                Err(e)
            }
        }
    }
}

// =============================================================================
// Streamer Connection
// =============================================================================

/// An open streamer connection.
pub struct StreamerConnection {
    ws: WsStream,
    state: ConnectionState,
    endpoint: String,
    idle_timeout: Option<Duration>,
    feed: Arc<FeedState>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for StreamerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamerConnection")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

impl StreamerConnection {
    /// Current state of this connection.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Send one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] if the connection is not open, or
    /// [`SendError::Transport`] if the write fails (which closes it).
    pub async fn send(&mut self, payload: &str) -> Result<(), SendError> {
        if !self.state.is_open() {
            return Err(SendError::Closed);
        }

        if let Err(e) = self.ws.send(Message::text(payload.to_owned())).await {
            let message = e.to_string();
            self.mark_closed(Some(message.clone()));
            metrics::record_websocket_error("send");
            return Err(SendError::Transport(message));
        }
        Ok(())
    }

    /// Pull frames until the connection ends, handing each text frame to
    /// `handler`.
    ///
    /// Handler errors are logged and the loop moves on to the next frame.
    pub async fn receive_loop<H>(mut self, handler: &mut H) -> SessionEnd
    where
        H: FrameHandler + ?Sized,
    {
        let cancel = self.cancel.clone();

        let end = loop {
            if !self.state.is_open() {
                break SessionEnd::StreamEnded;
            }

            let next = tokio::select! {
                () = cancel.cancelled() => None,
                next = self.next_message() => Some(next),
            };

            let Some(next) = next else {
                let _ = self.ws.close(None).await;
                break SessionEnd::Cancelled;
            };

            match next {
                Err(idle) => {
                    let _ = self.ws.close(None).await;
                    break SessionEnd::IdleTimeout(idle);
                }
                Ok(None) => break SessionEnd::StreamEnded,
                Ok(Some(Ok(message))) => {
                    if let Some(end) = self.on_message(message, handler).await {
                        break end;
                    }
                }
                Ok(Some(Err(e))) => break Self::on_error(e),
            }
        };

        let error = (!end.is_clean()).then(|| end.to_string());
        self.mark_closed(error);

        if end.is_clean() {
            tracing::info!(endpoint = %self.endpoint, reason = %end, "Streamer session ended");
        } else {
            tracing::warn!(endpoint = %self.endpoint, reason = %end, "Streamer session ended");
        }
        end
    }

    async fn next_message(&mut self) -> Result<Option<Result<Message, tungstenite::Error>>, Duration> {
        match self.idle_timeout {
            Some(idle) => tokio::time::timeout(idle, self.ws.next())
                .await
                .map_err(|_| idle),
            None => Ok(self.ws.next().await),
        }
    }

    async fn on_message<H>(&mut self, message: Message, handler: &mut H) -> Option<SessionEnd>
    where
        H: FrameHandler + ?Sized,
    {
        match message {
            Message::Text(text) => self.dispatch(text.as_str(), handler),
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => self.dispatch(text, handler),
                Err(e) => {
                    tracing::warn!(bytes = data.len(), error = %e, "Skipping non-UTF-8 binary frame");
                }
            },
            Message::Ping(_) => {
                // tungstenite queues the pong itself; flush it out now.
                if let Err(e) = self.ws.flush().await {
                    tracing::warn!(error = %e, "Failed to answer ping");
                }
            }
            Message::Close(frame) => {
                let _ = self.ws.flush().await;
                let (code, reason) = frame.map_or((None, String::new()), |f| {
                    (Some(u16::from(f.code)), f.reason.as_str().to_string())
                });
                return Some(SessionEnd::RemoteClosed { code, reason });
            }
            Message::Pong(_) | Message::Frame(_) => {}
        }
        None
    }

    fn dispatch<H>(&self, text: &str, handler: &mut H)
    where
        H: FrameHandler + ?Sized,
    {
        self.feed.increment_received();
        metrics::record_frame_received();
        tracing::trace!(frame = text, "Frame received");

        if let Err(e) = handler.handle_frame(text) {
            tracing::warn!(error = %e, "Frame dropped");
        }
    }

    fn on_error(error: tungstenite::Error) -> SessionEnd {
        match error {
            tungstenite::Error::ConnectionClosed
            | tungstenite::Error::AlreadyClosed
            | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                metrics::record_websocket_error("reset");
                SessionEnd::StreamEnded
            }
            tungstenite::Error::Io(e) => {
                metrics::record_websocket_error("io");
                SessionEnd::TransportError(e.to_string())
            }
            other => {
                metrics::record_websocket_error("protocol");
                SessionEnd::TransportError(other.to_string())
            }
        }
    }

    fn mark_closed(&mut self, error: Option<String>) {
        self.state = ConnectionState::Closed;
        match error {
            Some(message) => self.feed.set_error(message),
            None => self.feed.set_state(ConnectionState::Closed),
        }
        metrics::set_streamer_connected(false);
    }
}

// =============================================================================
// Tests
// =============================================================================
