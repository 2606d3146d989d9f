//! The set of currently open peer connections. See SPEC_FULL.md §4.8.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::debug;

/// One outbound gossip connection. Writes are serialized per peer via the
/// shared `Mutex`, which also gives FIFO per-peer delivery order "for
/// free" since `Gossip` never holds more than one write in flight per
/// peer at a time.
#[derive(Clone)]
pub struct Peer {
    pub addr: SocketAddr,
    pub connected_at_ms: i64,
    stream: Arc<AsyncMutex<TcpStream>>,
}

impl Peer {
    pub fn new(addr: SocketAddr, stream: TcpStream) -> Self {
        Self {
            addr,
            connected_at_ms: crate::types::now_ms(),
            stream: Arc::new(AsyncMutex::new(stream)),
        }
    }

    pub(crate) fn stream(&self) -> Arc<AsyncMutex<TcpStream>> {
        Arc::clone(&self.stream)
    }

    async fn close(&self) {
        let mut guard = self.stream.lock().await;
        let _ = guard.shutdown().await;
    }
}

/// `address -> connection` mapping. `snapshot` returns an independent
/// list safe to iterate without holding the registry lock — concurrent
/// readers, single-writer discipline for mutation. `count_tx` mirrors
/// the map's size into a `watch` channel so the status surface can read
/// the current peer count without taking the registry lock.
pub struct PeerRegistry {
    inner: AsyncMutex<HashMap<SocketAddr, Peer>>,
    count_tx: watch::Sender<usize>,
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerRegistry {
    pub fn new() -> Self {
        let (count_tx, _rx) = watch::channel(0);
        Self { inner: AsyncMutex::new(HashMap::new()), count_tx }
    }

    /// A lock-free, always-current view of the peer count.
    pub fn count_handle(&self) -> watch::Receiver<usize> {
        self.count_tx.subscribe()
    }

    pub async fn add(&self, peer: Peer) {
        let mut guard = self.inner.lock().await;
        guard.insert(peer.addr, peer);
        let _ = self.count_tx.send(guard.len());
    }

    /// Idempotent: removing an address that is already absent is a no-op.
    pub async fn remove(&self, addr: &SocketAddr) -> bool {
        let mut guard = self.inner.lock().await;
        let removed = guard.remove(addr).is_some();
        if removed {
            let _ = self.count_tx.send(guard.len());
        }
        removed
    }

    pub async fn snapshot(&self) -> Vec<Peer> {
        let guard = self.inner.lock().await;
        guard.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn contains(&self, addr: &SocketAddr) -> bool {
        self.inner.lock().await.contains_key(addr)
    }

    /// Closes and drops every connection. Used at shutdown.
    pub async fn clear(&self) {
        let peers: Vec<Peer> = {
            let mut guard = self.inner.lock().await;
            let drained = guard.drain().map(|(_, p)| p).collect();
            let _ = self.count_tx.send(guard.len());
            drained
        };
        for peer in peers {
            debug!(addr = %peer.addr, "closing peer connection on shutdown");
            peer.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_registry_snapshot_is_empty() {
        let registry = PeerRegistry::new();
        assert_eq!(registry.snapshot().await.len(), 0);
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = PeerRegistry::new();
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        assert!(!registry.remove(&addr).await);
        assert!(!registry.remove(&addr).await);
    }
}
