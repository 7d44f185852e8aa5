//! Prometheus Metrics Module
//!
//! Exposes relay metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Frames**: received, forwarded, discarded by reason, malformed
//! - **Publishing**: acknowledged, failed, dropped at the queue, latency
//! - **Connection**: streamer connection state, reconnects, subscription size
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::frame::DiscardReason;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "options_relay_frames_received_total",
        "Total frames received from the streamer"
    );
    describe_counter!(
        "options_relay_frames_forwarded_total",
        "Total qualifying frames queued for publishing"
    );
    describe_counter!(
        "options_relay_frames_discarded_total",
        "Total frames dropped by the classifier, by reason"
    );
    describe_counter!(
        "options_relay_frames_malformed_total",
        "Total frames that failed to decode"
    );

    describe_counter!(
        "options_relay_events_published_total",
        "Total events acknowledged by the event sink"
    );
    describe_counter!(
        "options_relay_publish_failures_total",
        "Total publishes that failed"
    );
    describe_counter!(
        "options_relay_publish_queue_dropped_total",
        "Total events dropped because the publish queue was full"
    );
    describe_histogram!(
        "options_relay_publish_seconds",
        "Time from publish submission to acknowledgement"
    );

    describe_gauge!(
        "options_relay_streamer_connected",
        "Whether the streamer connection is open (1) or not (0)"
    );
    describe_gauge!(
        "options_relay_subscribed_instruments",
        "Instrument keys in the active subscription"
    );
    describe_counter!(
        "options_relay_reconnects_total",
        "Total streamer reconnection attempts"
    );
    describe_counter!(
        "options_relay_websocket_errors_total",
        "Total streamer transport errors by type"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a frame received from the streamer.
pub fn record_frame_received() {
    counter!("options_relay_frames_received_total").increment(1);
}

/// Record a frame queued for publishing.
pub fn record_frame_forwarded() {
    counter!("options_relay_frames_forwarded_total").increment(1);
}

/// Record a frame dropped by the classifier.
pub fn record_frame_discarded(reason: DiscardReason) {
    counter!(
        "options_relay_frames_discarded_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record a frame that failed to decode.
pub fn record_frame_malformed() {
    counter!("options_relay_frames_malformed_total").increment(1);
}

/// Record an acknowledged publish and its latency.
pub fn record_publish_success(latency: Duration) {
    counter!("options_relay_events_published_total").increment(1);
    histogram!("options_relay_publish_seconds").record(latency.as_secs_f64());
}

/// Record a failed publish.
pub fn record_publish_failure() {
    counter!("options_relay_publish_failures_total").increment(1);
}

/// Record an event dropped at a full publish queue.
pub fn record_queue_drop() {
    counter!("options_relay_publish_queue_dropped_total").increment(1);
}

/// Update the streamer connection gauge.
pub fn set_streamer_connected(connected: bool) {
    gauge!("options_relay_streamer_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Update the subscription size gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribed_instruments(count: usize) {
    gauge!("options_relay_subscribed_instruments").set(count as f64);
}

/// Record a streamer reconnection attempt.
pub fn record_reconnect() {
    counter!("options_relay_reconnects_total").increment(1);
}

/// Record a streamer transport error.
pub fn record_websocket_error(error_type: &'static str) {
    counter!(
        "options_relay_websocket_errors_total",
        "error_type" => error_type
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================
