//! TCP listener and accept loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{RelayError, Result};
use crate::registry::Registry;
use crate::session::spawn_connection;
use crate::shutdown::ShutdownCoordinator;

/// Bind the listening socket. Failure here is fatal to the server.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| RelayError::Bind { addr, source })?;
    let local = listener.local_addr()?;
    info!(addr = %local, "relay listening");
    Ok(listener)
}

/// Accept connections until `shutdown` is cancelled.
///
/// Each accepted socket gets a registered connection with its two loops.
/// Accept errors are logged and retried after `backoff`.
pub async fn accept_loop(
    listener: TcpListener,
    registry: Arc<Registry>,
    max_frame_size: usize,
    backoff: Duration,
    shutdown: Arc<ShutdownCoordinator>,
) {
    let cancel = shutdown.token();
    loop {
        let accepted = tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(peer = %peer, error = %e, "failed to set TCP_NODELAY");
                }
                let (reader, writer) = stream.into_split();
                let _ = spawn_connection(
                    reader,
                    writer,
                    peer.to_string(),
                    &registry,
                    max_frame_size,
                    &shutdown,
                );
            }
            Err(e) => {
                warn!(error = %e, backoff = ?backoff, "accept failed, retrying");
                if !back_off(backoff, &cancel).await {
                    break;
                }
            }
        }
    }
    info!("listener stopped");
}

/// Sleep for `backoff` unless cancelled first. Returns `false` on cancel.
async fn back_off(backoff: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(backoff) => true,
    }
}
