//! Streamer Session Credentials
//!
//! Turns the brokerage's user-principals metadata into an immutable
//! [`SessionContext`] and derives the `ADMIN/LOGIN` request from it.
//!
//! # Login Frame
//!
//! ```json
//! {"requests":[{"service":"ADMIN","requestid":"0","command":"LOGIN",
//!   "account":"123456789","source":"appid",
//!   "parameters":{"credential":"userid=...&token=...","token":"...","version":"1.0"}}]}
//! ```
//!
//! The `credential` parameter is a form-urlencoded map whose `timestamp`
//! entry is the streamer token's issue time in integer milliseconds. The
//! streamer compares it against its own record, so the value must be
//! truncated exactly, never rounded.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// Constants
// =============================================================================

/// Service tag for administrative requests.
pub const ADMIN_SERVICE: &str = "ADMIN";

/// Command for the login request.
pub const LOGIN_COMMAND: &str = "LOGIN";

/// Request id of the login request. Always the first frame of a session.
pub const LOGIN_REQUEST_ID: &str = "0";

/// Protocol version sent with the login request.
pub const LOGIN_VERSION: &str = "1.0";

/// Timestamp layouts that carry an offset. The offset is parsed and dropped.
const OFFSET_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
];

/// Timestamp layouts without an offset.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised while assembling a session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The principals payload listed no accounts.
    #[error("user principals contain no accounts")]
    NoAccounts,

    /// The streamer token timestamp could not be parsed.
    #[error("invalid streamer token timestamp: {0}")]
    InvalidTimestamp(String),

    /// A request could not be serialized to a frame.
    #[error("failed to serialize request: {0}")]
    Serialization(String),
}

// =============================================================================
// User Principals (brokerage metadata)
// =============================================================================

/// User principals as returned by the brokerage REST API.
///
/// Only the fields the streamer login needs are modelled. Any of them missing
/// fails deserialization, which is fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPrincipals {
    /// Accounts attached to the user. The first one owns the session.
    pub accounts: Vec<PrincipalAccount>,
    /// Streamer connection info.
    pub streamer_info: StreamerInfo,
}

/// One account entry of the user principals.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalAccount {
    /// Account identifier.
    #[serde(deserialize_with = "string_or_number")]
    pub account_id: String,
    /// Company code.
    pub company: String,
    /// Segment code.
    pub segment: String,
    /// CD-domain identifier.
    pub account_cd_domain_id: String,
}

/// Streamer section of the user principals.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamerInfo {
    /// Streamer token.
    pub token: String,
    /// Issue time of the streamer token, ISO-8601-ish.
    pub token_timestamp: String,
    /// User group.
    pub user_group: String,
    /// Access level.
    pub access_level: String,
    /// Application id, sent as the request `source`.
    pub app_id: String,
    /// Access control list.
    pub acl: String,
    /// Streamer host name (no scheme, no path).
    pub streamer_socket_url: String,
}

impl std::fmt::Debug for StreamerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamerInfo")
            .field("token", &"[REDACTED]")
            .field("token_timestamp", &self.token_timestamp)
            .field("user_group", &self.user_group)
            .field("access_level", &self.access_level)
            .field("app_id", &self.app_id)
            .field("acl", &self.acl)
            .field("streamer_socket_url", &self.streamer_socket_url)
            .finish()
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

// =============================================================================
// Session Context
// =============================================================================

/// Immutable snapshot of everything needed to log into the streamer.
///
/// Built once at startup and shared read-only for the rest of the run.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionContext {
    account_id: String,
    company: String,
    segment: String,
    cd_domain_id: String,
    app_id: String,
    user_group: String,
    access_level: String,
    acl: String,
    streamer_token: String,
    token_timestamp_ms: i64,
    streamer_host: String,
}

impl SessionContext {
    /// Build a session context from the user principals.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no account or the token timestamp
    /// cannot be parsed.
    pub fn from_principals(principals: &UserPrincipals) -> Result<Self, SessionError> {
        let account = principals.accounts.first().ok_or(SessionError::NoAccounts)?;
        let streamer = &principals.streamer_info;
        let token_timestamp_ms = parse_token_timestamp_ms(&streamer.token_timestamp)?;

        Ok(Self {
            account_id: account.account_id.clone(),
            company: account.company.clone(),
            segment: account.segment.clone(),
            cd_domain_id: account.account_cd_domain_id.clone(),
            app_id: streamer.app_id.clone(),
            user_group: streamer.user_group.clone(),
            access_level: streamer.access_level.clone(),
            acl: streamer.acl.clone(),
            streamer_token: streamer.token.clone(),
            token_timestamp_ms,
            streamer_host: streamer.streamer_socket_url.clone(),
        })
    }

    /// Account identifier.
    #[must_use]
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Application id, used as the request `source`.
    #[must_use]
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Streamer token issue time in milliseconds since the Unix epoch.
    #[must_use]
    pub const fn token_timestamp_ms(&self) -> i64 {
        self.token_timestamp_ms
    }

    /// WebSocket endpoint of the streamer.
    #[must_use]
    pub fn streamer_url(&self) -> String {
        format!("wss://{}/ws", self.streamer_host)
    }

    /// Credential key/value pairs in the order the streamer expects them.
    #[must_use]
    pub fn build_credentials(&self) -> Vec<(&'static str, String)> {
        vec![
            ("userid", self.account_id.clone()),
            ("token", self.streamer_token.clone()),
            ("company", self.company.clone()),
            ("segment", self.segment.clone()),
            ("cddomain", self.cd_domain_id.clone()),
            ("usergroup", self.user_group.clone()),
            ("accesslevel", self.access_level.clone()),
            ("authorized", "Y".to_string()),
            ("timestamp", self.token_timestamp_ms.to_string()),
            ("appid", self.app_id.clone()),
            ("acl", self.acl.clone()),
        ]
    }

    /// Form-urlencoded credential blob.
    #[must_use]
    pub fn encoded_credentials(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.build_credentials())
            .finish()
    }

    /// Build the login request for this session.
    #[must_use]
    pub fn login_request(&self) -> LoginRequest {
        LoginRequest {
            requests: [LoginEntry {
                service: ADMIN_SERVICE,
                requestid: LOGIN_REQUEST_ID,
                command: LOGIN_COMMAND,
                account: self.account_id.clone(),
                source: self.app_id.clone(),
                parameters: LoginParameters {
                    credential: self.encoded_credentials(),
                    token: self.streamer_token.clone(),
                    version: LOGIN_VERSION,
                },
            }],
        }
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("account_id", &self.account_id)
            .field("company", &self.company)
            .field("segment", &self.segment)
            .field("cd_domain_id", &self.cd_domain_id)
            .field("app_id", &self.app_id)
            .field("streamer_token", &"[REDACTED]")
            .field("token_timestamp_ms", &self.token_timestamp_ms)
            .field("streamer_host", &self.streamer_host)
            .finish_non_exhaustive()
    }
}

/// Parse the streamer token timestamp into epoch milliseconds.
///
/// Any offset is ignored: the wall-clock fields are taken as written and
/// measured against the Unix epoch. Sub-millisecond digits are truncated.
///
/// # Errors
///
/// Returns [`SessionError::InvalidTimestamp`] if no supported layout matches.
pub fn parse_token_timestamp_ms(raw: &str) -> Result<i64, SessionError> {
    let trimmed = raw.trim();

    let naive = DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|dt| dt.naive_local())
        .or_else(|| {
            OFFSET_FORMATS.iter().find_map(|fmt| {
                DateTime::parse_from_str(trimmed, fmt)
                    .ok()
                    .map(|dt| dt.naive_local())
            })
        })
        .or_else(|| {
            NAIVE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        })
        .ok_or_else(|| SessionError::InvalidTimestamp(raw.to_string()))?;

    Ok(naive.and_utc().timestamp_millis())
}

// =============================================================================
// Login Request
// =============================================================================

/// `ADMIN/LOGIN` request envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginRequest {
    requests: [LoginEntry; 1],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct LoginEntry {
    service: &'static str,
    requestid: &'static str,
    command: &'static str,
    account: String,
    source: String,
    parameters: LoginParameters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct LoginParameters {
    credential: String,
    token: String,
    version: &'static str,
}

impl LoginRequest {
    /// Serialize the request to the text frame sent on the wire.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn to_frame(&self) -> Result<String, SessionError> {
        serde_json::to_string(self).map_err(|e| SessionError::Serialization(e.to_string()))
    }
}

// =============================================================================
// Tests
// =============================================================================
