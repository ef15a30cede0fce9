//! # beacon-relay
//!
//! Relay binary: parses the listen address, starts the server, the periodic
//! status reporter and the stdin operator console, then waits for ctrl-c.

#![deny(unsafe_code)]

use std::net::Ipv4Addr;
use std::sync::Arc;

use anyhow::{Context, Result};
use beacon_logging::{DiagnosticRing, LoggingConfig};
use beacon_relay::config::RelayConfig;
use beacon_relay::console::{ConsoleState, run_console};
use beacon_relay::RelayServer;
use clap::Parser;
use tokio::io::BufReader;

/// Targets recorded by the diagnostic ring.
const DIAGNOSTIC_TARGETS: [&str; 3] = [
    "beacon_relay::session",
    "beacon_relay::registry",
    "beacon_relay::listener",
];

/// TCP broadcast relay for length-framed beacon traffic.
#[derive(Parser, Debug)]
#[command(name = "beacon-relay", about = "TCP broadcast relay for beacon frames")]
struct Cli {
    /// IPv4 address to listen on.
    address: Ipv4Addr,

    /// TCP port to listen on.
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")?;
    let result = runtime.block_on(run(args));
    // A pending stdin read parks a blocking thread until the next line.
    runtime.shutdown_background();
    result
}

async fn run(args: Cli) -> Result<()> {
    // Env is read before logging starts; rejected values are logged below.
    let (env_config, invalid_env) = RelayConfig::from_env();
    let ring = Arc::new(DiagnosticRing::new(env_config.diagnostic_capacity));
    let logging = LoggingConfig {
        json: env_config.log_json,
        diagnostic_targets: DIAGNOSTIC_TARGETS.iter().map(ToString::to_string).collect(),
        ..LoggingConfig::default()
    };
    beacon_logging::init_logging(&logging, Some(Arc::clone(&ring)))
        .context("Failed to initialize logging")?;
    for invalid in &invalid_env {
        invalid.log();
    }

    let metrics = beacon_relay::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let server = RelayServer::new(RelayConfig {
        host: args.address,
        port: args.port,
        ..env_config
    });
    tracing::debug!(config = ?server.config(), "loaded configuration");

    let (addr, _listener) = server
        .listen()
        .await
        .context("Failed to bind relay")?;
    tracing::info!("beacon relay listening on {addr}");
    let _reporter = server.spawn_status_reporter();

    // Not tracked: a pending stdin read never observes cancellation.
    let console = ConsoleState {
        registry: Arc::clone(server.registry()),
        ring,
        metrics: Some(metrics),
    };
    let console_cancel = server.shutdown().token();
    let _console = tokio::spawn(async move {
        let stdin = BufReader::new(tokio::io::stdin());
        if let Err(e) = run_console(stdin, tokio::io::stdout(), console, console_cancel).await {
            tracing::warn!(error = %e, "operator console failed");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    let _ = server.shutdown().shutdown_and_wait(None).await;
    tracing::info!("shutdown complete");
    Ok(())
}
