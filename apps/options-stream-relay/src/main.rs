//! Options Stream Relay Binary
//!
//! Starts the options market data relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin options-stream-relay
//! ```
//!
//! # Environment Variables
//!
//! All optional.
//!
//! - `GCP_PROJECT`: Google Cloud project (default: projectoceanis)
//! - `RELAY_ACCESS_TOKEN_SECRET`: secret holding the brokerage token (default: `access_token`)
//! - `PUBSUB_EMULATOR_HOST`: publish to a local emulator, unauthenticated
//! - `GOOGLE_OAUTH_ACCESS_TOKEN`: Google bearer token (default: metadata server)
//! - `TDA_API_BASE_URL`, `TDA_API_KEY`: brokerage REST endpoint and API key
//! - `RELAY_SYMBOL`: underlying to subscribe to (default: NVDA)
//! - `RELAY_HTTP_TIMEOUT_SECS`, `RELAY_CONNECT_TIMEOUT_SECS`, `RELAY_IDLE_TIMEOUT_SECS`
//! - `RELAY_RECONNECT`: start a new session when the stream ends (default: false)
//! - `RELAY_RECONNECT_DELAY_INITIAL_MS`, `RELAY_RECONNECT_DELAY_MAX_SECS`,
//!   `RELAY_RECONNECT_DELAY_MULTIPLIER`, `RELAY_MAX_RECONNECT_ATTEMPTS`
//! - `RELAY_PUBLISH_QUEUE_CAPACITY`, `RELAY_PUBLISH_MAX_IN_FLIGHT`
//! - `RELAY_HEALTH_PORT`: health and metrics port, 0 disables (default: 8080)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: cream-options-stream-relay)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use options_stream_relay::application::ports::{BrokeragePort, EventSinkPort, SecretStorePort};
use options_stream_relay::domain::session::SessionContext;
use options_stream_relay::domain::streaming::FeedState;
use options_stream_relay::domain::subscription::{SubscriptionRequest, collect_instrument_keys};
use options_stream_relay::infrastructure::gcp::{
    GcpTokenProvider, PubSubPublisher, SecretManagerClient,
};
use options_stream_relay::infrastructure::health::{HealthServer, HealthServerState};
use options_stream_relay::infrastructure::tdameritrade::TdAmeritradeClient;
use options_stream_relay::infrastructure::telemetry;
use options_stream_relay::{OptionsRelay, RelayConfig, RelaySettings, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Time allowed for queued events to drain after a shutdown signal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let telemetry_guard = telemetry::init();

    tracing::info!(
        otel_export = telemetry_guard.is_exporting(),
        "Starting Options Stream Relay"
    );

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = RelayConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let http = reqwest::Client::builder()
        .timeout(config.brokerage.http_timeout)
        .build()
        .context("failed to build HTTP client")?;

    // Secret Manager always needs real credentials; Pub/Sub does not when
    // pointed at the emulator.
    let gcp_auth = Arc::new(GcpTokenProvider::from_env(http.clone()));
    let pubsub_auth = if config.gcp.pubsub_emulator {
        Arc::new(GcpTokenProvider::anonymous())
    } else {
        Arc::clone(&gcp_auth)
    };

    let secrets = SecretManagerClient::new(
        http.clone(),
        &config.gcp.secret_manager_base_url,
        &config.gcp.project,
        gcp_auth,
    );
    let access_token = secrets
        .get_latest_secret(&config.gcp.access_token_secret)
        .await
        .context("failed to read brokerage access token")?;

    let brokerage =
        TdAmeritradeClient::new(&config.brokerage).context("failed to build brokerage client")?;
    let principals = brokerage
        .user_principals(&access_token)
        .await
        .context("failed to fetch user principals")?;
    let session = SessionContext::from_principals(&principals)?;

    let chain = brokerage
        .option_chain(&config.brokerage.symbol)
        .await
        .context("failed to fetch option chain")?;
    let keys = collect_instrument_keys(&chain);
    let subscription = SubscriptionRequest::new(&session, &keys);
    tracing::info!(
        symbol = %config.brokerage.symbol,
        instruments = subscription.key_count(),
        streamer = %session.streamer_url(),
        "Session prepared"
    );

    let sink: Arc<dyn EventSinkPort> = Arc::new(PubSubPublisher::new(
        http,
        &config.gcp.pubsub_base_url,
        &config.gcp.project,
        config.gcp.topic(),
        pubsub_auth,
    ));

    let shutdown_token = CancellationToken::new();
    let feed = Arc::new(FeedState::new());

    // Spawn health server
    if config.health_port == 0 {
        tracing::info!("Health server disabled");
    } else {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            Arc::clone(&feed),
        ));
        let health_server =
            HealthServer::new(config.health_port, health_state, shutdown_token.clone());
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    let signals = tokio::spawn(await_shutdown(shutdown_token.clone()));

    let relay = OptionsRelay::new(
        &session,
        &subscription,
        sink,
        RelaySettings::from_config(&config),
        Arc::clone(&feed),
        shutdown_token.clone(),
    )?;

    tracing::info!("Options relay ready");

    let run = relay.run();
    tokio::pin!(run);
    let result = tokio::select! {
        result = &mut run => result,
        () = shutdown_token.cancelled() => {
            // The relay stops reading on cancel; give queued events time to publish.
            if let Ok(result) = tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut run).await {
                result
            } else {
                tracing::warn!(
                    timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                    "Shutdown timed out before the publish queue drained"
                );
                Ok(())
            }
        }
    };

    shutdown_token.cancel();
    signals.abort();

    let snapshot = feed.snapshot();
    tracing::info!(
        frames_received = snapshot.frames_received,
        frames_forwarded = snapshot.frames_forwarded,
        events_published = snapshot.events_published,
        publish_failures = snapshot.publish_failures,
        "Options relay stopped"
    );

    result.context("options relay failed")
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        project = %config.gcp.project,
        topic = config.gcp.topic(),
        pubsub_emulator = config.gcp.pubsub_emulator,
        symbol = %config.brokerage.symbol,
        reconnect = config.reconnect.enabled,
        health_port = config.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        brokerage_url = %config.brokerage.base_url,
        pubsub_url = %config.gcp.pubsub_base_url,
        secret_manager_url = %config.gcp.secret_manager_base_url,
        connect_timeout_secs = config.streamer.connect_timeout.as_secs(),
        idle_timeout_secs = config.streamer.idle_timeout.map(|d| d.as_secs()),
        queue_capacity = config.publish.queue_capacity,
        max_in_flight = config.publish.max_in_flight,
        "Relay endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
