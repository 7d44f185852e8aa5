//! Relay Configuration Settings
//!
//! Configuration types for the options relay, loaded from environment
//! variables. Every variable is optional; defaults match the production
//! deployment.

use std::time::Duration;

/// Pub/Sub topic that receives relayed events.
pub const EVENTS_TOPIC: &str = "options_events";

/// Default Google Cloud project.
pub const DEFAULT_GCP_PROJECT: &str = "projectoceanis";

/// Default underlying symbol.
pub const DEFAULT_SYMBOL: &str = "NVDA";

/// Default secret holding the brokerage access token.
pub const DEFAULT_ACCESS_TOKEN_SECRET: &str = "access_token";

/// Default brokerage REST base URL.
pub const DEFAULT_TDA_API_BASE_URL: &str = "https://api.tdameritrade.com/v1";

/// Default brokerage API key for option chain requests.
pub const DEFAULT_TDA_API_KEY: &str = "OMNIUSR@AMER.OAUTHAP";

/// Production Pub/Sub endpoint.
pub const DEFAULT_PUBSUB_BASE_URL: &str = "https://pubsub.googleapis.com";

/// Production Secret Manager endpoint.
pub const DEFAULT_SECRET_MANAGER_BASE_URL: &str = "https://secretmanager.googleapis.com";

/// Google Cloud settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcpSettings {
    /// Project holding the secret and the topic.
    pub project: String,
    /// Pub/Sub REST base URL.
    pub pubsub_base_url: String,
    /// Whether Pub/Sub is an emulator (no authentication).
    pub pubsub_emulator: bool,
    /// Secret Manager REST base URL.
    pub secret_manager_base_url: String,
    /// Secret holding the brokerage access token.
    pub access_token_secret: String,
}

impl Default for GcpSettings {
    fn default() -> Self {
        Self {
            project: DEFAULT_GCP_PROJECT.to_string(),
            pubsub_base_url: DEFAULT_PUBSUB_BASE_URL.to_string(),
            pubsub_emulator: false,
            secret_manager_base_url: DEFAULT_SECRET_MANAGER_BASE_URL.to_string(),
            access_token_secret: DEFAULT_ACCESS_TOKEN_SECRET.to_string(),
        }
    }
}

impl GcpSettings {
    /// Topic receiving relayed events.
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        EVENTS_TOPIC
    }
}

/// Brokerage REST settings.
#[derive(Clone, PartialEq, Eq)]
pub struct BrokerageSettings {
    /// REST base URL.
    pub base_url: String,
    /// API key sent with option chain requests.
    pub api_key: String,
    /// Underlying symbol whose chain is subscribed.
    pub symbol: String,
    /// Per-request timeout.
    pub http_timeout: Duration,
}

impl Default for BrokerageSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_TDA_API_BASE_URL.to_string(),
            api_key: DEFAULT_TDA_API_KEY.to_string(),
            symbol: DEFAULT_SYMBOL.to_string(),
            http_timeout: Duration::from_secs(30),
        }
    }
}

impl std::fmt::Debug for BrokerageSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerageSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("symbol", &self.symbol)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

/// Streamer connection settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamerSettings {
    /// Transport handshake timeout.
    pub connect_timeout: Duration,
    /// Maximum silence before the connection is dropped (`None` = wait forever).
    pub idle_timeout: Option<Duration>,
}

impl Default for StreamerSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(120)),
        }
    }
}

/// Reconnection settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectSettings {
    /// Whether to start a new session after the stream ends.
    pub enabled: bool,
    /// Initial reconnection delay.
    pub delay_initial: Duration,
    /// Maximum reconnection delay.
    pub delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            delay_initial: Duration::from_millis(500),
            delay_max: Duration::from_secs(30),
            delay_multiplier: 2.0,
            max_attempts: 0,
        }
    }
}

/// Publish queue settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishSettings {
    /// Events buffered between forwarder and publisher.
    pub queue_capacity: usize,
    /// Publishes awaiting acknowledgement at once.
    pub max_in_flight: usize,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            max_in_flight: 64,
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// Google Cloud settings.
    pub gcp: GcpSettings,
    /// Brokerage REST settings.
    pub brokerage: BrokerageSettings,
    /// Streamer connection settings.
    pub streamer: StreamerSettings,
    /// Reconnection settings.
    pub reconnect: ReconnectSettings,
    /// Publish queue settings.
    pub publish: PublishSettings,
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            gcp: GcpSettings::default(),
            brokerage: BrokerageSettings::default(),
            streamer: StreamerSettings::default(),
            reconnect: ReconnectSettings::default(),
            publish: PublishSettings::default(),
            health_port: 8080,
        }
    }
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an empty or unparseable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an empty or unparseable value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let defaults = Self::default();

        let emulator_host = env.optional_string("PUBSUB_EMULATOR_HOST")?;
        let gcp = GcpSettings {
            project: env.string("GCP_PROJECT", &defaults.gcp.project)?,
            pubsub_base_url: emulator_host
                .as_deref()
                .map_or_else(|| defaults.gcp.pubsub_base_url.clone(), emulator_base_url),
            pubsub_emulator: emulator_host.is_some(),
            secret_manager_base_url: env
                .string("SECRET_MANAGER_BASE_URL", &defaults.gcp.secret_manager_base_url)?,
            access_token_secret: env
                .string("RELAY_ACCESS_TOKEN_SECRET", &defaults.gcp.access_token_secret)?,
        };

        let brokerage = BrokerageSettings {
            base_url: env.string("TDA_API_BASE_URL", &defaults.brokerage.base_url)?,
            api_key: env.string("TDA_API_KEY", &defaults.brokerage.api_key)?,
            symbol: env.string("RELAY_SYMBOL", &defaults.brokerage.symbol)?,
            http_timeout: env
                .parse::<u64>("RELAY_HTTP_TIMEOUT_SECS")?
                .map_or(defaults.brokerage.http_timeout, Duration::from_secs),
        };

        let streamer = StreamerSettings {
            connect_timeout: env
                .parse::<u64>("RELAY_CONNECT_TIMEOUT_SECS")?
                .map_or(defaults.streamer.connect_timeout, Duration::from_secs),
            idle_timeout: match env.parse::<u64>("RELAY_IDLE_TIMEOUT_SECS")? {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.streamer.idle_timeout,
            },
        };

        let reconnect = ReconnectSettings {
            enabled: env.flag("RELAY_RECONNECT", defaults.reconnect.enabled)?,
            delay_initial: env
                .parse::<u64>("RELAY_RECONNECT_DELAY_INITIAL_MS")?
                .map_or(defaults.reconnect.delay_initial, Duration::from_millis),
            delay_max: env
                .parse::<u64>("RELAY_RECONNECT_DELAY_MAX_SECS")?
                .map_or(defaults.reconnect.delay_max, Duration::from_secs),
            delay_multiplier: env
                .parse::<f64>("RELAY_RECONNECT_DELAY_MULTIPLIER")?
                .unwrap_or(defaults.reconnect.delay_multiplier),
            max_attempts: env
                .parse::<u32>("RELAY_MAX_RECONNECT_ATTEMPTS")?
                .unwrap_or(defaults.reconnect.max_attempts),
        };

        let publish = PublishSettings {
            queue_capacity: env
                .parse::<usize>("RELAY_PUBLISH_QUEUE_CAPACITY")?
                .unwrap_or(defaults.publish.queue_capacity),
            max_in_flight: env
                .parse::<usize>("RELAY_PUBLISH_MAX_IN_FLIGHT")?
                .unwrap_or(defaults.publish.max_in_flight),
        };

        Ok(Self {
            gcp,
            brokerage,
            streamer,
            reconnect,
            publish,
            health_port: env
                .parse::<u16>("RELAY_HEALTH_PORT")?
                .unwrap_or(defaults.health_port),
        })
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

/// Emulators speak plain HTTP on `host:port`.
fn emulator_base_url(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("http://{host}")
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional_string(&self, key: &str) -> Result<Option<String>, ConfigError> {
        match (self.lookup)(key) {
            Some(value) if value.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
            Some(value) => Ok(Some(value.trim().to_string())),
            None => Ok(None),
        }
    }

    fn string(&self, key: &str, default: &str) -> Result<String, ConfigError> {
        Ok(self
            .optional_string(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    fn parse<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        self.optional_string(key)?
            .map(|value| {
                value.parse().map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value,
                })
            })
            .transpose()
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        let Some(value) = self.optional_string(key)? else {
            return Ok(default);
        };
        match value.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        }
    }
}
