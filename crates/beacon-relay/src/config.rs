//! Relay configuration.
//!
//! Loading flow:
//! 1. Start with compiled [`RelayConfig::default()`]
//! 2. Apply `BEACON_*` environment overrides
//! 3. The binary merges the two positional CLI arguments (address, port) on top
//!
//! Env values are parsed strictly; invalid or out-of-range values are ignored
//! and handed back as [`InvalidEnvVar`] for the caller to log.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use beacon_core::DEFAULT_MAX_FRAME_SIZE;

/// Configuration for the relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayConfig {
    /// IPv4 address to bind.
    pub host: Ipv4Addr,
    /// TCP port to bind (`0` lets the OS pick one).
    pub port: u16,
    /// Outbound queue capacity per connection.
    pub queue_capacity: usize,
    /// Largest accepted payload in bytes.
    pub max_frame_size: usize,
    /// Pause after a failed `accept` before retrying, in milliseconds.
    pub accept_backoff_ms: u64,
    /// Periodic status report interval in seconds (`0` disables it).
    pub status_interval_secs: u64,
    /// Entries kept by the diagnostic ring.
    pub diagnostic_capacity: usize,
    /// Emit JSON log lines instead of text.
    pub log_json: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::LOCALHOST,
            port: 0,
            queue_capacity: 100,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            accept_backoff_ms: 1000,
            status_interval_secs: 5,
            diagnostic_capacity: beacon_logging::DEFAULT_DIAGNOSTIC_CAPACITY,
            log_json: false,
        }
    }
}

impl RelayConfig {
    /// Defaults with environment overrides applied.
    ///
    /// Rejected values are returned rather than logged so the caller can
    /// report them once logging is up.
    pub fn from_env() -> (Self, Vec<InvalidEnvVar>) {
        let mut config = Self::default();
        let invalid = apply_env_overrides(&mut config);
        (config, invalid)
    }

    /// Socket address to bind.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.host, self.port))
    }

    /// Accept retry backoff.
    pub fn accept_backoff(&self) -> Duration {
        Duration::from_millis(self.accept_backoff_ms)
    }

    /// Periodic status interval, `None` when disabled.
    pub fn status_interval(&self) -> Option<Duration> {
        (self.status_interval_secs > 0).then(|| Duration::from_secs(self.status_interval_secs))
    }
}

/// An environment override that failed to parse and was ignored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidEnvVar {
    /// Variable name.
    pub key: &'static str,
    /// Raw value as found.
    pub value: String,
}

impl InvalidEnvVar {
    /// Emit the warning for this value.
    pub fn log(&self) {
        tracing::warn!(key = self.key, value = %self.value, "invalid env var, ignoring");
    }
}

/// Apply `BEACON_*` environment overrides.
pub fn apply_env_overrides(config: &mut RelayConfig) -> Vec<InvalidEnvVar> {
    apply_overrides(config, |key| std::env::var(key).ok())
}

/// Apply overrides from an arbitrary key lookup.
pub fn apply_overrides<F>(config: &mut RelayConfig, lookup: F) -> Vec<InvalidEnvVar>
where
    F: Fn(&str) -> Option<String>,
{
    let mut env = EnvReader {
        lookup,
        invalid: Vec::new(),
    };
    if let Some(v) = env.usize("BEACON_QUEUE_CAPACITY", 1, 100_000) {
        config.queue_capacity = v;
    }
    if let Some(v) = env.usize("BEACON_MAX_FRAME_SIZE", 1, 16 * 1024 * 1024) {
        config.max_frame_size = v;
    }
    if let Some(v) = env.u64("BEACON_ACCEPT_BACKOFF_MS", 1, 60_000) {
        config.accept_backoff_ms = v;
    }
    if let Some(v) = env.u64("BEACON_STATUS_INTERVAL_SECS", 0, 3600) {
        config.status_interval_secs = v;
    }
    if let Some(v) = env.usize("BEACON_DIAGNOSTIC_CAPACITY", 1, 10_000) {
        config.diagnostic_capacity = v;
    }
    if let Some(v) = env.bool("BEACON_LOG_JSON") {
        config.log_json = v;
    }
    env.invalid
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
    invalid: Vec<InvalidEnvVar>,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn read<T>(&mut self, key: &'static str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let value = (self.lookup)(key)?;
        let parsed = parse(&value);
        if parsed.is_none() {
            self.invalid.push(InvalidEnvVar { key, value });
        }
        parsed
    }

    fn u64(&mut self, key: &'static str, min: u64, max: u64) -> Option<u64> {
        self.read(key, |v| parse_u64_range(v, min, max))
    }

    fn usize(&mut self, key: &'static str, min: usize, max: usize) -> Option<usize> {
        self.read(key, |v| parse_usize_range(v, min, max))
    }

    fn bool(&mut self, key: &'static str) -> Option<bool> {
        self.read(key, parse_bool)
    }
}
