//! Brokerage Streamer Integration
//!
//! WebSocket connection to the brokerage streamer and the relay that drives
//! login, subscription and frame forwarding over it.
//!
//! # Stream URL
//!
//! `wss://{streamerSocketUrl}/ws`, where the host comes from the user
//! principals' `streamerInfo`.
//!
//! # Protocol
//!
//! Text JSON frames. The client sends exactly one `ADMIN/LOGIN` request and
//! then exactly one `OPTION/SUBS` request per connection; the streamer answers
//! with `response`, `notify` and `data` frames.

pub mod connection;
pub mod reconnect;
pub mod relay;

pub use connection::{ConnectError, ConnectionManager, SendError, SessionEnd, StreamerConnection};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use relay::{OptionsRelay, RelayError, RelaySettings, SessionReport};
