//! Connection lifecycle: one receive loop, one send loop, one supervisor.
//!
//! 1. Registers the connection (its token is a child of the server token);
//!    all three tasks are tracked by the [`ShutdownCoordinator`]
//! 2. Spawns the receive loop: `ReadLength -> ReadPayload -> Dispatch`
//! 3. Spawns the send loop: `Idle -> Drain -> Idle`
//! 4. Whichever loop ends first cancels the token; the other one follows
//! 5. The supervisor removes the connection from the registry

use std::sync::Arc;

use beacon_core::{
    Fill, FrameError, LENGTH_PREFIX_LEN, decode_length, read_full, read_payload, write_frame,
};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::connection::Connection;
use crate::metrics;
use crate::registry::Registry;
use crate::shutdown::ShutdownCoordinator;

/// Register a connection over `reader`/`writer` and run both of its loops.
///
/// The returned handle completes once both loops have ended and the
/// connection has been removed from `registry`.
pub fn spawn_connection<R, W>(
    reader: R,
    writer: W,
    peer: impl Into<String>,
    registry: &Arc<Registry>,
    max_frame_size: usize,
    shutdown: &ShutdownCoordinator,
) -> (Arc<Connection>, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let cancel = shutdown.token().child_token();
    let (connection, rx) = registry.register(peer, cancel);
    metrics::connection_opened();
    info!(conn_id = %connection.id, peer = %connection.peer, "client connected");

    let receive = shutdown.spawn(run_receive(
        reader,
        Arc::clone(&connection),
        Arc::clone(registry),
        max_frame_size,
    ));
    let send = shutdown.spawn(run_send(writer, rx, Arc::clone(&connection)));

    let registry = Arc::clone(registry);
    let supervised = Arc::clone(&connection);
    let handle = shutdown.spawn(async move {
        let (receive, send) = tokio::join!(receive, send);
        if let Err(e) = receive {
            warn!(peer = %supervised.peer, error = %e, "receive task failed");
        }
        if let Err(e) = send {
            warn!(peer = %supervised.peer, error = %e, "send task failed");
        }
        let _ = registry.remove(supervised.id);
        let lifetime = supervised.age();
        metrics::connection_closed(lifetime);
        info!(
            conn_id = %supervised.id,
            peer = %supervised.peer,
            packets_in = supervised.packets_in(),
            bytes_in = supervised.bytes_in(),
            dropped = supervised.dropped_count(),
            duration_ms = u64::try_from(lifetime.as_millis()).unwrap_or(u64::MAX),
            "client disconnected"
        );
    });

    (connection, handle)
}

async fn run_receive<R>(
    mut reader: R,
    connection: Arc<Connection>,
    registry: Arc<Registry>,
    max_frame_size: usize,
) where
    R: AsyncRead + Unpin,
{
    let cancel = connection.cancel_token();
    let result = tokio::select! {
        () = cancel.cancelled() => Ok(()),
        r = receive_loop(&mut reader, &connection, &registry, max_frame_size) => r,
    };
    log_loop_exit("receive", &connection, result);
    cancel.cancel();
}

async fn run_send<W>(writer: W, rx: mpsc::Receiver<Bytes>, connection: Arc<Connection>)
where
    W: AsyncWrite + Unpin,
{
    let cancel = connection.cancel_token();
    let result = send_loop(writer, rx, &cancel, &connection.peer).await;
    log_loop_exit("send", &connection, result);
    cancel.cancel();
}

fn log_loop_exit(side: &str, connection: &Connection, result: Result<(), FrameError>) {
    match result {
        Ok(()) => debug!(peer = %connection.peer, side, "loop finished"),
        Err(e) if e.is_disconnect() => {
            debug!(peer = %connection.peer, side, kind = e.error_kind(), error = %e, "peer went away");
        }
        Err(e) => warn!(
            peer = %connection.peer,
            side,
            kind = e.error_kind(),
            error = %e,
            "closing connection"
        ),
    }
}

/// Read frames until the peer closes cleanly or an error occurs, fanning each
/// one out to every other registered connection.
pub async fn receive_loop<R>(
    reader: &mut R,
    connection: &Connection,
    registry: &Registry,
    max_frame_size: usize,
) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let peer = connection.peer.as_str();
    loop {
        trace!(peer, "read length");
        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        match read_full(reader, &mut prefix).await? {
            Fill::Complete => {}
            Fill::Eof { read: 0 } => {
                trace!(peer, "closed");
                return Ok(());
            }
            Fill::Eof { read } => {
                return Err(FrameError::Truncated {
                    expected: LENGTH_PREFIX_LEN,
                    read,
                });
            }
        }
        let len = decode_length(prefix, max_frame_size)?;

        trace!(peer, len, "read payload");
        let frame = read_payload(reader, len).await?;

        trace!(peer, len, "dispatch");
        connection.record_ingress(len);
        metrics::frame_received(len);
        let _ = registry.fan_out(connection.id, &frame);
    }
}

/// Drain the outbound queue onto `writer` until cancelled, the queue closes,
/// or a write fails. Frames still queued at exit are discarded.
pub async fn send_loop<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<Bytes>,
    cancel: &CancellationToken,
    peer: &str,
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => return Ok(()),
            },
        };
        trace!(peer, len = frame.len(), "drain");
        tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            written = write_frame(&mut writer, &frame) => written?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use beacon_core::{DEFAULT_MAX_FRAME_SIZE, read_frame};
    use tokio::io::{AsyncWriteExt, DuplexStream};

    struct Peer {
        stream: DuplexStream,
        connection: Arc<Connection>,
        handle: JoinHandle<()>,
    }

    fn attach(registry: &Arc<Registry>, shutdown: &ShutdownCoordinator, name: &str) -> Peer {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(server);
        let (connection, handle) =
            spawn_connection(reader, writer, name, registry, DEFAULT_MAX_FRAME_SIZE, shutdown);
        Peer {
            stream: client,
            connection,
            handle,
        }
    }

    async fn finished(handle: JoinHandle<()>) {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("connection did not shut down")
            .unwrap();
    }

    #[tokio::test]
    async fn frame_relayed_to_other_peer_only() {
        let registry = Arc::new(Registry::new(100));
        let shutdown = ShutdownCoordinator::new();
        let mut a = attach(&registry, &shutdown, "a");
        let mut b = attach(&registry, &shutdown, "b");

        let payload = vec![0xAB; 42];
        write_frame(&mut a.stream, &payload).await.unwrap();

        let got = tokio::time::timeout(
            Duration::from_secs(5),
            read_frame(&mut b.stream, DEFAULT_MAX_FRAME_SIZE),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(got.as_deref(), Some(&payload[..]));
        assert_eq!(a.connection.packets_in(), 1);
        assert_eq!(a.connection.bytes_in(), 42);

        let nothing = tokio::time::timeout(
            Duration::from_millis(100),
            read_frame(&mut a.stream, DEFAULT_MAX_FRAME_SIZE),
        )
        .await;
        assert!(nothing.is_err(), "sender must not receive its own frame");

        shutdown.shutdown();
        finished(a.handle).await;
        finished(b.handle).await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn shutdown_waits_for_every_connection_task() {
        let registry = Arc::new(Registry::new(100));
        let shutdown = ShutdownCoordinator::new();
        let a = attach(&registry, &shutdown, "a");
        let b = attach(&registry, &shutdown, "b");
        // receive, send and supervisor per connection
        assert_eq!(shutdown.task_count(), 6);

        assert!(shutdown.shutdown_and_wait(Some(Duration::from_secs(5))).await);
        assert_eq!(shutdown.task_count(), 0);
        assert!(registry.is_empty());
        assert!(a.handle.is_finished() && b.handle.is_finished());
    }

    #[tokio::test]
    async fn negative_prefix_closes_only_offender() {
        let registry = Arc::new(Registry::new(100));
        let shutdown = ShutdownCoordinator::new();
        let mut bad = attach(&registry, &shutdown, "bad");
        let mut good = attach(&registry, &shutdown, "good");
        let mut other = attach(&registry, &shutdown, "other");

        bad.stream.write_all(&(-5i32).to_le_bytes()).await.unwrap();
        finished(bad.handle).await;
        assert!(!registry.contains(bad.connection.id));
        assert_eq!(registry.len(), 2);

        write_frame(&mut good.stream, b"still flowing").await.unwrap();
        let got = read_frame(&mut other.stream, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap();
        assert_eq!(got.as_deref(), Some(&b"still flowing"[..]));

        shutdown.shutdown();
        finished(good.handle).await;
        finished(other.handle).await;
    }

    #[tokio::test]
    async fn oversized_prefix_closes_connection() {
        let registry = Arc::new(Registry::new(100));
        let shutdown = ShutdownCoordinator::new();
        let mut peer = attach(&registry, &shutdown, "big");

        let len = i32::try_from(DEFAULT_MAX_FRAME_SIZE + 1).unwrap();
        peer.stream.write_all(&len.to_le_bytes()).await.unwrap();
        finished(peer.handle).await;
        assert!(registry.is_empty());
        assert_eq!(peer.connection.packets_in(), 0);
    }

    #[tokio::test]
    async fn peer_close_removes_connection() {
        let registry = Arc::new(Registry::new(100));
        let shutdown = ShutdownCoordinator::new();
        let peer = attach(&registry, &shutdown, "leaver");
        assert_eq!(registry.len(), 1);

        drop(peer.stream);
        finished(peer.handle).await;
        assert!(registry.is_empty());
        assert!(!peer.connection.is_connected());
    }

    #[tokio::test]
    async fn disconnect_stops_both_loops() {
        let registry = Arc::new(Registry::new(100));
        let shutdown = ShutdownCoordinator::new();
        let peer = attach(&registry, &shutdown, "kicked");

        peer.connection.disconnect();
        finished(peer.handle).await;
        assert!(registry.is_empty());
        drop(peer.stream);
    }

    #[tokio::test]
    async fn truncated_payload_is_an_error() {
        let registry = Registry::new(10);
        let (tx, _rx) = mpsc::channel(1);
        let connection = Connection::new(
            crate::connection::ConnectionId(1),
            "t",
            tx,
            CancellationToken::new(),
        );
        let mut input: &[u8] = &[10, 0, 0, 0, 1, 2, 3];
        let result = receive_loop(&mut input, &connection, &registry, 100).await;
        assert_matches!(result, Err(FrameError::Truncated { expected: 10, read: 3 }));
        assert_eq!(connection.packets_in(), 0);
    }

    #[tokio::test]
    async fn clean_eof_between_frames() {
        let registry = Registry::new(10);
        let (tx, _rx) = mpsc::channel(1);
        let connection = Connection::new(
            crate::connection::ConnectionId(1),
            "t",
            tx,
            CancellationToken::new(),
        );
        let mut input: &[u8] = &[2, 0, 0, 0, 7, 7, 0, 0, 0, 0];
        receive_loop(&mut input, &connection, &registry, 100)
            .await
            .unwrap();
        assert_eq!(connection.packets_in(), 2);
        assert_eq!(connection.bytes_in(), 2);
    }

    #[tokio::test]
    async fn send_loop_writes_frames_in_order() {
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let (mut client, server) = tokio::io::duplex(1024);

        tx.send(Bytes::from_static(b"first")).await.unwrap();
        tx.send(Bytes::from_static(b"second")).await.unwrap();
        drop(tx);

        send_loop(server, rx, &cancel, "p").await.unwrap();
        let one = read_frame(&mut client, 100).await.unwrap();
        let two = read_frame(&mut client, 100).await.unwrap();
        assert_eq!(one.as_deref(), Some(&b"first"[..]));
        assert_eq!(two.as_deref(), Some(&b"second"[..]));
    }

    #[tokio::test]
    async fn send_loop_exits_on_cancel() {
        let (_tx, rx) = mpsc::channel::<Bytes>(8);
        let cancel = CancellationToken::new();
        let (_client, server) = tokio::io::duplex(1024);

        let token = cancel.clone();
        let task = tokio::spawn(async move { send_loop(server, rx, &token, "p").await });
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn send_loop_fails_when_peer_gone() {
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let (client, server) = tokio::io::duplex(16);
        drop(client);

        tx.send(Bytes::from_static(b"nobody listening")).await.unwrap();
        let result = send_loop(server, rx, &cancel, "p").await;
        let err = result.unwrap_err();
        assert!(err.is_disconnect(), "{err}");
    }
}
