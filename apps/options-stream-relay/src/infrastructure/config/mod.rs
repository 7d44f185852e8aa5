//! Configuration Module
//!
//! Configuration loading for the relay service.

mod settings;

pub use settings::{
    BrokerageSettings, ConfigError, EVENTS_TOPIC, GcpSettings, PublishSettings, ReconnectSettings,
    RelayConfig, StreamerSettings,
};
