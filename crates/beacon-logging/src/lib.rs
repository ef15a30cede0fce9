//! # beacon-logging
//!
//! Structured logging with `tracing` for the beacon relay.
//!
//! - [`init_logging`] installs a `tracing_subscriber` registry with an
//!   `EnvFilter`-controlled fmt layer on stderr (text or JSON)
//! - [`DiagnosticRing`] + [`DiagnosticLayer`] keep the most recent trace
//!   events in memory so an operator can dump them on demand

#![deny(unsafe_code)]

mod ring;

pub use ring::{DEFAULT_DIAGNOSTIC_CAPACITY, DiagnosticLayer, DiagnosticRing};

use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

/// Errors raised while installing the global subscriber.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// A global subscriber was already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Init(#[from] TryInitError),
}

/// Logging configuration.
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// Default level for the stderr layer. Overridden by `RUST_LOG`.
    pub level: Level,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
    /// Targets captured by the diagnostic ring (at every level).
    pub diagnostic_targets: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json: false,
            diagnostic_targets: vec!["beacon_relay".to_string()],
        }
    }
}

impl LoggingConfig {
    /// Filter string handed to `EnvFilter` when `RUST_LOG` is unset.
    pub fn default_directive(&self) -> String {
        self.level.to_string().to_lowercase()
    }

    /// Per-layer filter for the diagnostic ring.
    pub fn diagnostic_filter(&self) -> Targets {
        self.diagnostic_targets
            .iter()
            .fold(Targets::new(), |targets, target| {
                targets.with_target(target.clone(), Level::TRACE)
            })
    }
}

/// Install the global subscriber. Call once at startup.
///
/// When `ring` is given, events from `config.diagnostic_targets` are also
/// recorded there regardless of the stderr filter.
pub fn init_logging(
    config: &LoggingConfig,
    ring: Option<Arc<DiagnosticRing>>,
) -> Result<(), LoggingError> {
    let env_filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.default_directive()))
    };

    let ring_layer =
        ring.map(|ring| DiagnosticLayer::new(ring).with_filter(config.diagnostic_filter()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter())
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter())
            .boxed()
    };

    tracing_subscriber::registry()
        .with(ring_layer)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}
