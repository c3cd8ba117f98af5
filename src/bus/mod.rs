//! Broadcast bus.
//!
//! Owns the set of connected WebSocket peers, across both transport
//! listeners, and delivers a serialized event string to each with
//! best-effort semantics: a peer whose channel is closed or full is dropped
//! silently, the rest of the fan-out continues unaffected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::debug;

/// Opaque identifier for a connected peer, unique for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

/// A registered peer's outbound channel. Each peer owns an unbounded mpsc
/// sender; the transport task that accepted the connection reads the paired
/// receiver and forwards frames to the socket.
struct Peer {
    tx: mpsc::UnboundedSender<String>,
}

/// Broadcast bus handle.
pub struct BroadcastBus {
    peers: RwLock<HashMap<PeerId, Peer>>,
    next_id: AtomicU64,
}

impl BroadcastBus {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new peer, returning its id and the receiving half of its
    /// outbound channel. The caller is responsible for forwarding messages
    /// from the receiver to the underlying transport and for calling
    /// `unregister` when the connection closes.
    pub async fn register(&self) -> (PeerId, mpsc::UnboundedReceiver<String>) {
        let id = PeerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.write().await.insert(id, Peer { tx });
        debug!(peer = id.0, "peer registered");
        (id, rx)
    }

    /// Remove a peer. Idempotent — unregistering an already-gone peer is a
    /// no-op.
    pub async fn unregister(&self, id: PeerId) {
        if self.peers.write().await.remove(&id).is_some() {
            debug!(peer = id.0, "peer unregistered");
        }
    }

    /// Best-effort fan-out of a pre-serialized event line to every connected
    /// peer. Message ordering is preserved per-peer (each peer has its own
    /// channel) but not across peers. Peers whose channel is closed are
    /// dropped from the registry; no other peer is affected.
    pub async fn broadcast(&self, message: String) {
        let stale: Vec<PeerId> = {
            let peers = self.peers.read().await;
            let mut stale = Vec::new();
            for (id, peer) in peers.iter() {
                if peer.tx.send(message.clone()).is_err() {
                    stale.push(*id);
                }
            }
            stale
        };
        if !stale.is_empty() {
            let mut peers = self.peers.write().await;
            for id in stale {
                peers.remove(&id);
            }
        }
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedBus = Arc<BroadcastBus>;

pub fn create_bus() -> SharedBus {
    Arc::new(BroadcastBus::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_all_peers_in_order() {
        let bus = create_bus();
        let (id_a, mut rx_a) = bus.register().await;
        let (_id_b, mut rx_b) = bus.register().await;

        bus.broadcast("one".to_string()).await;
        bus.broadcast("two".to_string()).await;

        assert_eq!(rx_a.recv().await.unwrap(), "one");
        assert_eq!(rx_a.recv().await.unwrap(), "two");
        assert_eq!(rx_b.recv().await.unwrap(), "one");
        assert_eq!(rx_b.recv().await.unwrap(), "two");

        bus.unregister(id_a).await;
        assert_eq!(bus.peer_count().await, 1);
    }

    #[tokio::test]
    async fn dropped_receiver_is_pruned_without_affecting_others() {
        let bus = create_bus();
        let (_id_a, rx_a) = bus.register().await;
        let (_id_b, mut rx_b) = bus.register().await;

        drop(rx_a);
        bus.broadcast("hello".to_string()).await;
        assert_eq!(rx_b.recv().await.unwrap(), "hello");

        // the closed peer's channel send failed, so it should be pruned
        assert_eq!(bus.peer_count().await, 1);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let bus = create_bus();
        let (id, _rx) = bus.register().await;
        bus.unregister(id).await;
        bus.unregister(id).await;
        assert_eq!(bus.peer_count().await, 0);
    }
}
