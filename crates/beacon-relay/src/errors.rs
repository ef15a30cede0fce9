//! Relay error types.

use std::net::SocketAddr;

use beacon_core::FrameError;
use thiserror::Error;

/// Errors surfaced by the relay server.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The listening socket could not be bound. Fatal.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested bind address.
        addr: SocketAddr,
        /// OS error.
        #[source]
        source: std::io::Error,
    },
    /// Socket-level failure outside of framing.
    #[error("relay i/o failed: {0}")]
    Io(#[from] std::io::Error),
    /// Framing failure on one connection.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
