//! Prometheus Metrics Module
//!
//! Exposes server metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Connections**: open WebSocket connections and handshake outcomes
//! - **Requests**: subscribe/snapshot/unsubscribe counts by generic result
//! - **Updates**: pushes sent and dropped
//! - **Errors**: frames that failed to decode
//! - **Latency**: request handling time
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::results::GenericResult;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Later calls return the handle installed by the first.
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
    describe_gauge!(
        "cogda_connections",
        "Number of open Cogda WebSocket connections"
    );
    describe_counter!(
        "cogda_handshakes_total",
        "Connection handshakes by outcome"
    );

    describe_counter!(
        "cogda_requests_total",
        "Subscribe, snapshot and unsubscribe requests by generic result"
    );

    describe_counter!(
        "cogda_updates_sent_total",
        "Push updates written to connections"
    );
    describe_counter!(
        "cogda_updates_dropped_total",
        "Push updates dropped by lagging dispatchers"
    );

    describe_counter!(
        "cogda_decode_failures_total",
        "Inbound frames that failed to decode"
    );

    describe_histogram!(
        "cogda_request_duration_seconds",
        "Time to answer subscribe and snapshot requests"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for request kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Subscription request.
    Subscribe,
    /// Snapshot request.
    Snapshot,
    /// Unsubscribe.
    Unsubscribe,
}

impl RequestKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Snapshot => "snapshot",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// Update the open connection count.
pub fn set_connections(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("cogda_connections").set(count as f64);
}

/// Record a handshake outcome.
pub fn record_handshake(outcome: &'static str) {
    counter!("cogda_handshakes_total", "outcome" => outcome).increment(1);
}

/// Record an answered request.
pub fn record_request(kind: RequestKind, result: GenericResult) {
    counter!(
        "cogda_requests_total",
        "kind" => kind.as_str(),
        "result" => result.as_str()
    )
    .increment(1);
}

/// Record push updates written to a connection.
pub fn record_updates_sent(count: u64) {
    counter!("cogda_updates_sent_total").increment(count);
}

/// Record push updates lost to lag.
pub fn record_updates_dropped(count: u64) {
    counter!("cogda_updates_dropped_total").increment(count);
}

/// Record a frame that failed to decode.
pub fn record_decode_failure() {
    counter!("cogda_decode_failures_total").increment(1);
}

/// Record request handling duration.
pub fn record_request_duration(kind: RequestKind, duration: Duration) {
    histogram!(
        "cogda_request_duration_seconds",
        "kind" => kind.as_str()
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_kind_as_str() {
        assert_eq!(RequestKind::Subscribe.as_str(), "subscribe");
        assert_eq!(RequestKind::Snapshot.as_str(), "snapshot");
        assert_eq!(RequestKind::Unsubscribe.as_str(), "unsubscribe");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_request(RequestKind::Snapshot, GenericResult::Successful);
        record_updates_sent(3);
        record_decode_failure();
        set_connections(2);
    }
}
