//! Per-client connection state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Registry-assigned connection identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// Result of offering a frame to a connection's outbound queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Offer {
    /// The frame was appended; the send loop is woken by the channel.
    Queued,
    /// The queue was at capacity; the frame was dropped and counted.
    Full,
    /// The send loop is gone; the connection is dead.
    Closed,
}

/// A connected relay client.
///
/// Counters are atomics so the receive loop, fan-out, and status reporter can
/// touch them without sharing a lock.
pub struct Connection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Remote endpoint, rendered as `ip:port`.
    pub peer: String,
    /// Bounded outbound queue feeding the send loop.
    tx: mpsc::Sender<Bytes>,
    /// Frames received from this client.
    packets_in: AtomicU64,
    /// Payload bytes received from this client.
    bytes_in: AtomicU64,
    /// Frames not queued for this client because its queue was full.
    dropped: AtomicU64,
    /// When this connection was accepted (monotonic).
    pub connected_at: Instant,
    /// When this connection was accepted (wall clock).
    pub connected_since: DateTime<Utc>,
    /// Shared by the receive and send loops; cancelled when either ends.
    cancel: CancellationToken,
}

impl Connection {
    /// Create a new connection.
    pub fn new(
        id: ConnectionId,
        peer: impl Into<String>,
        tx: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            peer: peer.into(),
            tx,
            packets_in: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            connected_at: Instant::now(),
            connected_since: Utc::now(),
            cancel,
        }
    }

    /// Push a frame without waiting (drop-newest when full).
    pub fn offer(&self, frame: Bytes) -> Offer {
        match self.tx.try_send(frame) {
            Ok(()) => Offer::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                Offer::Full
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Offer::Closed,
        }
    }

    /// Count one inbound frame of `len` payload bytes.
    pub fn record_ingress(&self, len: usize) {
        let _ = self.packets_in.fetch_add(1, Ordering::Relaxed);
        let _ = self.bytes_in.fetch_add(len as u64, Ordering::Relaxed);
    }

    /// Total frames received.
    pub fn packets_in(&self) -> u64 {
        self.packets_in.load(Ordering::Relaxed)
    }

    /// Total payload bytes received.
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed)
    }

    /// Total frames dropped for this consumer.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Frames currently waiting in the outbound queue.
    pub fn queue_depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Outbound queue capacity.
    pub fn queue_capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Whether both loops are still running.
    pub fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tx.is_closed()
    }

    /// Stop both loops of this connection.
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    /// Token observed by this connection's loops.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
