//! # beacon-relay
//!
//! TCP broadcast relay for length-framed beacon frames.
//!
//! - Every frame received from one client is offered to every other client
//! - Each client has a bounded outbound queue; when it is full the newest frame
//!   is dropped and counted, so one stalled consumer never slows the rest
//! - Per-connection receive and send loops share a cancellation token, and a
//!   supervisor removes the connection once both have stopped
//! - Status reports, Prometheus metrics and an operator console expose
//!   per-connection counters

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod connection;
pub mod console;
pub mod errors;
pub mod listener;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod status;

pub use client::RelayClient;
pub use config::RelayConfig;
pub use errors::{RelayError, Result};
pub use registry::{FanOutOutcome, Registry};
pub use server::RelayServer;
