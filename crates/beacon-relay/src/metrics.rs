//! Prometheus metrics recorder and relay metric names.

use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::registry::FanOutOutcome;

/// Install the Prometheus recorder (global).
///
/// The returned handle renders the text exposition served by the console's
/// `metrics` command. Call once at startup before anything is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Connections accepted (counter).
pub const RELAY_CONNECTIONS_TOTAL: &str = "relay_connections_total";
/// Connections closed (counter).
pub const RELAY_DISCONNECTIONS_TOTAL: &str = "relay_disconnections_total";
/// Currently registered connections (gauge).
pub const RELAY_CONNECTIONS_ACTIVE: &str = "relay_connections_active";
/// Connection lifetime in seconds (histogram).
pub const RELAY_CONNECTION_DURATION_SECONDS: &str = "relay_connection_duration_seconds";
/// Frames received from clients (counter).
pub const RELAY_FRAMES_IN_TOTAL: &str = "relay_frames_in_total";
/// Payload bytes received from clients (counter).
pub const RELAY_BYTES_IN_TOTAL: &str = "relay_bytes_in_total";
/// Frames queued for delivery (counter).
pub const RELAY_FRAMES_QUEUED_TOTAL: &str = "relay_frames_queued_total";
/// Frames dropped on a full outbound queue (counter).
pub const RELAY_FRAMES_DROPPED_TOTAL: &str = "relay_frames_dropped_total";

pub(crate) fn connection_opened() {
    counter!(RELAY_CONNECTIONS_TOTAL).increment(1);
    gauge!(RELAY_CONNECTIONS_ACTIVE).increment(1.0);
}

pub(crate) fn connection_closed(lifetime: Duration) {
    counter!(RELAY_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(RELAY_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(RELAY_CONNECTION_DURATION_SECONDS).record(lifetime.as_secs_f64());
}

pub(crate) fn frame_received(len: usize) {
    counter!(RELAY_FRAMES_IN_TOTAL).increment(1);
    counter!(RELAY_BYTES_IN_TOTAL).increment(len as u64);
}

pub(crate) fn fanned_out(outcome: &FanOutOutcome) {
    if outcome.queued > 0 {
        counter!(RELAY_FRAMES_QUEUED_TOTAL).increment(outcome.queued as u64);
    }
    if outcome.dropped > 0 {
        counter!(RELAY_FRAMES_DROPPED_TOTAL).increment(outcome.dropped as u64);
    }
}
