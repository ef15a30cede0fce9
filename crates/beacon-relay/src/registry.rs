//! Shared registry of live connections and the fan-out pass.
//!
//! One coarse `parking_lot::Mutex` guards membership. Fan-out runs entirely
//! under that lock and never awaits, so a pass is atomic with respect to
//! `register`/`remove` and a stalled consumer can never block it: each
//! consumer gets a non-blocking push into its own bounded queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::connection::{Connection, ConnectionId, Offer};

/// Per-pass accounting returned by [`Registry::fan_out`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FanOutOutcome {
    /// Consumers that got the frame queued.
    pub queued: usize,
    /// Consumers whose queue was full.
    pub dropped: usize,
    /// Dead connections pruned during the pass.
    pub removed: usize,
}

/// Ordered set of live connections.
pub struct Registry {
    connections: Mutex<Vec<Arc<Connection>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl Registry {
    /// Create a registry whose connections get `queue_capacity` slots each.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            connections: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a new connection and return it with its outbound receiver.
    pub fn register(
        &self,
        peer: impl Into<String>,
        cancel: CancellationToken,
    ) -> (Arc<Connection>, mpsc::Receiver<Bytes>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let connection = Arc::new(Connection::new(id, peer, tx, cancel));
        self.connections.lock().push(Arc::clone(&connection));
        debug!(conn_id = %id, peer = %connection.peer, "connection registered");
        (connection, rx)
    }

    /// Remove a connection by ID. Returns whether it was present.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let mut conns = self.connections.lock();
        let before = conns.len();
        conns.retain(|c| c.id != id);
        before != conns.len()
    }

    /// Offer `frame` to every connection except `sender`.
    ///
    /// Connections found disconnected (or whose queue is closed) are removed
    /// in the same pass and receive nothing from it.
    pub fn fan_out(&self, sender: ConnectionId, frame: &Bytes) -> FanOutOutcome {
        let mut outcome = FanOutOutcome::default();
        let mut conns = self.connections.lock();
        conns.retain(|conn| {
            if !conn.is_connected() {
                debug!(conn_id = %conn.id, peer = %conn.peer, "pruning disconnected connection");
                outcome.removed += 1;
                return false;
            }
            if conn.id == sender {
                return true;
            }
            match conn.offer(frame.clone()) {
                Offer::Queued => outcome.queued += 1,
                Offer::Full => outcome.dropped += 1,
                Offer::Closed => {
                    debug!(conn_id = %conn.id, peer = %conn.peer, "pruning connection with closed queue");
                    outcome.removed += 1;
                    return false;
                }
            }
            true
        });
        drop(conns);
        crate::metrics::fanned_out(&outcome);
        trace!(
            sender = %sender,
            len = frame.len(),
            queued = outcome.queued,
            dropped = outcome.dropped,
            removed = outcome.removed,
            "fan-out pass"
        );
        outcome
    }

    /// Copy of the current membership, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().clone()
    }

    /// Whether a connection is registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.lock().iter().any(|c| c.id == id)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Per-connection queue capacity.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(
        registry: &Registry,
        peer: &str,
    ) -> (Arc<Connection>, mpsc::Receiver<Bytes>) {
        registry.register(peer, CancellationToken::new())
    }

    fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(frame);
        }
        out
    }

    #[test]
    fn register_assigns_unique_ids() {
        let registry = Registry::new(100);
        let (a, _rx_a) = register(&registry, "a");
        let (b, _rx_b) = register(&registry, "b");
        assert_ne!(a.id, b.id);
        assert_eq!(registry.len(), 2);
        assert_eq!(a.queue_capacity(), 100);
    }

    #[test]
    fn remove_connection() {
        let registry = Registry::new(100);
        let (a, _rx_a) = register(&registry, "a");
        assert!(registry.remove(a.id));
        assert!(!registry.remove(a.id));
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_preserves_registration_order() {
        let registry = Registry::new(10);
        let (_a, _ra) = register(&registry, "a");
        let (_b, _rb) = register(&registry, "b");
        let (_c, _rc) = register(&registry, "c");
        let peers: Vec<_> = registry.snapshot().iter().map(|c| c.peer.clone()).collect();
        assert_eq!(peers, vec!["a", "b", "c"]);
    }

    #[test]
    fn zero_capacity_clamped() {
        let registry = Registry::new(0);
        assert_eq!(registry.queue_capacity(), 1);
    }

    #[test]
    fn fan_out_skips_sender() {
        let registry = Registry::new(100);
        let (a, mut rx_a) = register(&registry, "a");
        let (_b, mut rx_b) = register(&registry, "b");

        let frame = Bytes::from(vec![0x5A; 42]);
        let outcome = registry.fan_out(a.id, &frame);

        assert_eq!(outcome, FanOutOutcome { queued: 1, dropped: 0, removed: 0 });
        let got = drain(&mut rx_b);
        assert_eq!(got, vec![frame]);
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(a.queue_depth(), 0);
    }

    #[test]
    fn fan_out_reaches_every_other_connection_once() {
        let registry = Registry::new(100);
        let (sender, mut rx_sender) = register(&registry, "s");
        let mut receivers: Vec<_> = (0..5)
            .map(|i| register(&registry, &format!("c{i}")).1)
            .collect();

        let outcome = registry.fan_out(sender.id, &Bytes::from_static(b"hello"));
        assert_eq!(outcome.queued, 5);

        for rx in &mut receivers {
            assert_eq!(drain(rx).len(), 1);
        }
        assert!(drain(&mut rx_sender).is_empty());
    }

    #[test]
    fn stalled_consumer_drops_newest_and_others_keep_flowing() {
        let registry = Registry::new(100);
        let (a, _rx_a) = register(&registry, "a");
        let (b, _rx_b_stalled) = register(&registry, "b");
        let (_c, mut rx_c) = register(&registry, "c");

        let mut delivered_to_c = Vec::new();
        for i in 0..150u32 {
            let frame = Bytes::from(i.to_le_bytes().to_vec());
            let _ = registry.fan_out(a.id, &frame);
            delivered_to_c.extend(drain(&mut rx_c));
        }

        assert_eq!(b.dropped_count(), 50);
        assert_eq!(b.queue_depth(), 100);
        assert_eq!(delivered_to_c.len(), 150);
        for (i, frame) in delivered_to_c.iter().enumerate() {
            let i = u32::try_from(i).unwrap();
            assert_eq!(&frame[..], &i.to_le_bytes()[..]);
        }
    }

    #[test]
    fn queue_never_exceeds_capacity() {
        let registry = Registry::new(3);
        let (a, _rx_a) = register(&registry, "a");
        let (b, mut rx_b) = register(&registry, "b");

        let mut outcomes = Vec::new();
        for i in 0..10u8 {
            outcomes.push(registry.fan_out(a.id, &Bytes::from(vec![i])));
            assert!(b.queue_depth() <= 3);
        }

        let dropped: usize = outcomes.iter().map(|o| o.dropped).sum();
        assert_eq!(dropped, 7);
        assert_eq!(b.dropped_count(), 7);
        // Drop-newest: the first three frames are the ones kept.
        let kept: Vec<u8> = drain(&mut rx_b).iter().map(|f| f[0]).collect();
        assert_eq!(kept, vec![0, 1, 2]);
    }

    #[test]
    fn disconnected_connection_removed_within_one_pass() {
        let registry = Registry::new(10);
        let (a, _rx_a) = register(&registry, "a");
        let (b, mut rx_b) = register(&registry, "b");
        let (_c, mut rx_c) = register(&registry, "c");

        b.disconnect();
        assert!(registry.contains(b.id));

        let outcome = registry.fan_out(a.id, &Bytes::from_static(b"x"));
        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.queued, 1);
        assert!(!registry.contains(b.id));
        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(drain(&mut rx_c).len(), 1);

        let _ = registry.fan_out(a.id, &Bytes::from_static(b"y"));
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn closed_queue_removed_during_pass() {
        let registry = Registry::new(10);
        let (a, _rx_a) = register(&registry, "a");
        let (b, rx_b) = register(&registry, "b");
        drop(rx_b);

        let outcome = registry.fan_out(a.id, &Bytes::from_static(b"x"));
        assert_eq!(outcome.removed, 1);
        assert!(!registry.contains(b.id));
    }

    #[test]
    fn disconnected_sender_is_pruned_too() {
        let registry = Registry::new(10);
        let (a, _rx_a) = register(&registry, "a");
        let (_b, mut rx_b) = register(&registry, "b");
        a.disconnect();

        let outcome = registry.fan_out(a.id, &Bytes::from_static(b"late"));
        assert_eq!(outcome.removed, 1);
        assert_eq!(drain(&mut rx_b).len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn fan_out_on_empty_registry() {
        let registry = Registry::new(10);
        let outcome = registry.fan_out(ConnectionId(99), &Bytes::new());
        assert_eq!(outcome, FanOutOutcome::default());
    }

    #[tokio::test]
    async fn concurrent_senders_each_frame_accounted_once() {
        let registry = Arc::new(Registry::new(1000));
        let mut senders = Vec::new();
        for i in 0..4 {
            senders.push(register(&registry, &format!("s{i}")));
        }
        let (_sink, mut rx_sink) = register(&registry, "sink");

        let mut tasks = Vec::new();
        for (conn, _rx) in &senders {
            let registry = Arc::clone(&registry);
            let id = conn.id;
            tasks.push(tokio::spawn(async move {
                for n in 0..50u8 {
                    let _ = registry.fan_out(id, &Bytes::from(vec![n]));
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // Every sender also receives the other three senders' frames.
        assert_eq!(drain(&mut rx_sink).len(), 200);
        for (conn, rx) in &mut senders {
            assert_eq!(drain(rx).len(), 150, "{}", conn.peer);
        }
    }
}
