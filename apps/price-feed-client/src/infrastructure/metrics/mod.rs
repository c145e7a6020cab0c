//! Prometheus Metrics Module
//!
//! Exposes client metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Messages**: Inbound messages by category, parse errors
//! - **Connection**: Current state, connect attempts, transport errors
//! - **Heartbeat**: Pings sent and missed acknowledgments
//! - **Fallback**: Snapshot fetches by outcome
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::connection::ConnectionState;
use crate::domain::streaming::MessageCategory;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the existing handle.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
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
        "price_feed_messages_received_total",
        "Inbound messages routed, by category"
    );
    describe_counter!(
        "price_feed_parse_errors_total",
        "Inbound payloads that failed envelope validation"
    );

    describe_gauge!(
        "price_feed_connection_state",
        "Connection state (0=idle 1=connecting 2=open 3=closing 4=closed 5=failed)"
    );
    describe_counter!(
        "price_feed_connect_attempts_total",
        "Channel open attempts, by trigger"
    );
    describe_counter!(
        "price_feed_transport_errors_total",
        "Transport failures by kind"
    );

    describe_counter!("price_feed_heartbeats_sent_total", "Heartbeat pings sent");
    describe_counter!(
        "price_feed_heartbeat_timeouts_total",
        "Heartbeat pings left unacknowledged"
    );

    describe_gauge!(
        "price_feed_fallback_active",
        "Whether the fallback data source is active (0/1)"
    );
    describe_counter!(
        "price_feed_fallback_fetches_total",
        "Fallback snapshot fetches by outcome"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a routed inbound message.
pub fn record_message_received(category: MessageCategory) {
    counter!(
        "price_feed_messages_received_total",
        "category" => category.as_str()
    )
    .increment(1);
}

/// Record a payload rejected by the codec.
pub fn record_parse_error() {
    counter!("price_feed_parse_errors_total").increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("price_feed_connection_state").set(state.as_gauge());
}

/// Record a channel open attempt. `trigger` is `initial`, `retry` or `manual`.
pub fn record_connect_attempt(trigger: &'static str) {
    counter!(
        "price_feed_connect_attempts_total",
        "trigger" => trigger
    )
    .increment(1);
}

/// Record a transport failure.
pub fn record_transport_error(kind: &'static str) {
    counter!(
        "price_feed_transport_errors_total",
        "kind" => kind
    )
    .increment(1);
}

/// Record a heartbeat ping.
pub fn record_heartbeat_sent() {
    counter!("price_feed_heartbeats_sent_total").increment(1);
}

/// Record a missed heartbeat acknowledgment.
pub fn record_heartbeat_timeout() {
    counter!("price_feed_heartbeat_timeouts_total").increment(1);
}

/// Update the fallback activity gauge.
pub fn set_fallback_active(active: bool) {
    gauge!("price_feed_fallback_active").set(if active { 1.0 } else { 0.0 });
}

/// Record a fallback fetch.
pub fn record_fallback_fetch(success: bool) {
    counter!(
        "price_feed_fallback_fetches_total",
        "outcome" => if success { "success" } else { "error" }
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================
