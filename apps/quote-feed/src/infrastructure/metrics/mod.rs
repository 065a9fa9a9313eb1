//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Ticks**: Counts of ticks received from the upstream feed
//! - **Connection**: Upstream connection state, reconnects, stalls and
//!   adapter errors
//! - **Subscriptions**: Desired subscription count
//! - **Cache**: Write failures and retention sweeps
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::connection::ConnectionState;

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
            let builder = PrometheusBuilder::new();
            let handle = builder
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
    // Tick counters
    describe_counter!(
        "quote_feed_ticks_received_total",
        "Total ticks received from the upstream feed"
    );

    // Connection
    describe_gauge!(
        "quote_feed_connection_state",
        "Upstream connection state (0=disconnected, 1=connecting, 2=connected, 3=reconnecting)"
    );
    describe_counter!(
        "quote_feed_reconnect_attempts_total",
        "Total upstream reconnection attempts"
    );
    describe_counter!(
        "quote_feed_stalls_detected_total",
        "Total stalls detected by the heartbeat watchdog"
    );
    describe_counter!(
        "quote_feed_adapter_errors_total",
        "Total failed or panicked adapter calls by operation"
    );

    // Subscriptions
    describe_gauge!(
        "quote_feed_subscriptions",
        "Number of symbols in the desired subscription set"
    );

    // Cache
    describe_counter!(
        "quote_feed_cache_write_failures_total",
        "Total failed quote cache writes"
    );
    describe_counter!(
        "quote_feed_cache_writes_dropped_total",
        "Total ticks not written to the cache because the writer queue was full"
    );
    describe_counter!(
        "quote_feed_cache_rows_swept_total",
        "Total cache rows deleted by the retention sweep"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a tick received from the feed.
pub fn record_tick_received(source: &str) {
    counter!(
        "quote_feed_ticks_received_total",
        "source" => source.to_string()
    )
    .increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("quote_feed_connection_state").set(state.as_gauge());
}

/// Record a reconnection attempt.
pub fn record_reconnect_attempt() {
    counter!("quote_feed_reconnect_attempts_total").increment(1);
}

/// Record a detected stall.
pub fn record_stall_detected() {
    counter!("quote_feed_stalls_detected_total").increment(1);
}

/// Record a failed adapter call (`connect`, `subscribe` or `disconnect`).
pub fn record_adapter_error(operation: &'static str) {
    counter!("quote_feed_adapter_errors_total", "operation" => operation).increment(1);
}

/// Update the subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(count: usize) {
    gauge!("quote_feed_subscriptions").set(count as f64);
}

/// Record a failed cache write.
pub fn record_cache_write_failure() {
    counter!("quote_feed_cache_write_failures_total").increment(1);
}

/// Record a tick skipped by the cache writer.
pub fn record_cache_write_dropped() {
    counter!("quote_feed_cache_writes_dropped_total").increment(1);
}

/// Record rows removed by a retention sweep.
pub fn record_rows_swept(count: usize) {
    counter!("quote_feed_cache_rows_swept_total").increment(count as u64);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_tick_received("sim");
        set_connection_state(ConnectionState::Connected);
        record_reconnect_attempt();
        record_stall_detected();
        set_subscriptions(3);
        record_adapter_error("connect");
        record_cache_write_failure();
        record_cache_write_dropped();
        record_rows_swept(2);
    }

    #[test]
    fn handle_absent_before_init() {
        // Other tests in this binary never install a recorder.
        assert!(get_metrics_handle().is_none());
    }
}
