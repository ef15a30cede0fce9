//! Read-only connection statistics and the periodic status reporter.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::connection::Connection;
use crate::registry::Registry;

/// Point-in-time counters for one connection.
#[derive(Clone, Debug, Serialize)]
pub struct ConnectionStats {
    /// Registry-assigned ID.
    pub conn_id: u64,
    /// Remote endpoint.
    pub peer: String,
    /// When the connection was accepted.
    pub connected_since: DateTime<Utc>,
    /// Time since accept.
    pub duration_secs: f64,
    /// Frames received.
    pub packets_in: u64,
    /// Payload bytes received.
    pub bytes_in: u64,
    /// Average ingress rate since accept.
    pub bytes_per_sec: f64,
    /// Frames dropped because this client's queue was full.
    pub dropped: u64,
    /// Frames waiting in the outbound queue.
    pub queue_depth: usize,
    /// Outbound queue capacity.
    pub queue_capacity: usize,
    /// Whether both loops are still running.
    pub connected: bool,
}

impl ConnectionStats {
    /// Snapshot one connection's counters.
    pub fn capture(conn: &Connection) -> Self {
        let age = conn.age();
        let bytes_in = conn.bytes_in();
        Self {
            conn_id: conn.id.0,
            peer: conn.peer.clone(),
            connected_since: conn.connected_since,
            duration_secs: age.as_secs_f64(),
            packets_in: conn.packets_in(),
            bytes_in,
            bytes_per_sec: rate(bytes_in, age),
            dropped: conn.dropped_count(),
            queue_depth: conn.queue_depth(),
            queue_capacity: conn.queue_capacity(),
            connected: conn.is_connected(),
        }
    }

    fn render_into(&self, out: &mut String, with_connected_flag: bool) {
        let _ = writeln!(out, "Client: {}", self.peer);
        let _ = writeln!(
            out,
            "Connection duration: {}",
            format_duration(Duration::from_secs_f64(self.duration_secs))
        );
        let _ = writeln!(out, "Total packets: {}", self.packets_in);
        #[allow(clippy::cast_precision_loss)]
        let bytes = self.bytes_in as f64;
        let _ = writeln!(out, "Total bytes: {}", format_bytes(bytes));
        let _ = writeln!(out, "Total bytes per second: {}/s", format_bytes(self.bytes_per_sec));
        let _ = writeln!(out, "Dropped packets: {}", self.dropped);
        let _ = writeln!(out, "Queue size: {}/{}", self.queue_depth, self.queue_capacity);
        if with_connected_flag {
            let _ = writeln!(out, "Client connected: {}", self.connected);
        }
    }
}

/// Snapshot of every registered connection.
#[derive(Clone, Debug, Serialize)]
pub struct StatusReport {
    /// When the snapshot was taken.
    pub generated_at: DateTime<Utc>,
    /// Per-connection stats in registration order.
    pub connections: Vec<ConnectionStats>,
}

impl StatusReport {
    /// Capture the registry without mutating it.
    pub fn capture(registry: &Registry) -> Self {
        Self {
            generated_at: Utc::now(),
            connections: registry
                .snapshot()
                .iter()
                .map(|c| ConnectionStats::capture(c))
                .collect(),
        }
    }

    /// Entries that are still connected.
    pub fn connected(&self) -> impl Iterator<Item = &ConnectionStats> {
        self.connections.iter().filter(|c| c.connected)
    }

    /// Render as operator text.
    ///
    /// The periodic report omits disconnected entries; the on-demand report
    /// lists everything with its connected flag.
    pub fn render(&self, include_disconnected: bool) -> String {
        let mut out = String::new();
        for stats in &self.connections {
            if !include_disconnected && !stats.connected {
                continue;
            }
            if !out.is_empty() {
                out.push('\n');
            }
            stats.render_into(&mut out, include_disconnected);
        }
        if out.is_empty() {
            out.push_str("No clients connected.\n");
        }
        out
    }
}

/// Log a status report every `interval` until `cancel` fires.
pub async fn run_status_reporter(
    registry: Arc<Registry>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // Skip the immediate first tick
    let _ = ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let report = StatusReport::capture(&registry);
        let mut connected = 0usize;
        for stats in report.connected() {
            connected += 1;
            info!(
                conn_id = stats.conn_id,
                peer = %stats.peer,
                duration = %format_duration(Duration::from_secs_f64(stats.duration_secs)),
                packets_in = stats.packets_in,
                bytes_in = stats.bytes_in,
                bytes_per_sec = stats.bytes_per_sec,
                dropped = stats.dropped,
                queue_depth = stats.queue_depth,
                "client status"
            );
        }
        info!(connected, registered = report.connections.len(), "status report");
    }
}

#[allow(clippy::cast_precision_loss)]
fn rate(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { bytes as f64 / secs } else { 0.0 }
}

/// Human-readable byte count with binary units (`B`, `KB`, `MB`, `GB`, `TB`).
pub fn format_bytes(bytes: f64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{value:.0} {}", UNITS[unit])
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

/// `HH:MM:SS.mmm`, prefixed with `Nd ` once a day has passed.
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    let millis = d.subsec_millis();
    if days > 0 {
        format!("{days}d {hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
    }
}
