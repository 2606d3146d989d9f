//! Background dialer maintaining connections to a declared peer list
//! with per-peer retry backoff. See SPEC_FULL.md §4.8.

use super::registry::{Peer, PeerRegistry};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DIAL_CADENCE: Duration = Duration::from_secs(1);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DIAL_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Clone, Copy)]
struct RetryState {
    next_attempt: Instant,
}

pub struct PeerDialer {
    configured: Vec<SocketAddr>,
    registry: Arc<PeerRegistry>,
}

impl PeerDialer {
    pub fn new(configured: Vec<SocketAddr>, registry: Arc<PeerRegistry>) -> Self {
        Self { configured, registry }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut retry: HashMap<SocketAddr, RetryState> = HashMap::new();
        let mut ticker = tokio::time::interval(DIAL_CADENCE);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.registry.clear().await;
                    return;
                }
                _ = ticker.tick() => {}
            }

            let connected: HashSet<SocketAddr> =
                self.registry.snapshot().await.into_iter().map(|p| p.addr).collect();

            for addr in &self.configured {
                if connected.contains(addr) {
                    continue;
                }
                if let Some(state) = retry.get(addr) {
                    if Instant::now() < state.next_attempt {
                        continue;
                    }
                }
                self.dial_one(*addr, &mut retry).await;
            }
        }
    }

    async fn dial_one(&self, addr: SocketAddr, retry: &mut HashMap<SocketAddr, RetryState>) {
        match timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!(%addr, error = %e, "failed to set TCP_NODELAY on new peer connection");
                }
                info!(%addr, "peer connected");
                self.registry.add(Peer::new(addr, stream)).await;
                retry.remove(&addr);
            }
            Ok(Err(e)) => {
                warn!(%addr, error = %e, "peer dial failed");
                retry.insert(addr, RetryState { next_attempt: Instant::now() + DIAL_BACKOFF });
            }
            Err(_) => {
                warn!(%addr, "peer dial timed out");
                retry.insert(addr, RetryState { next_attempt: Instant::now() + DIAL_BACKOFF });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn dial_connects_to_a_live_listener_and_registers_it() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let registry = Arc::new(PeerRegistry::new());
        let dialer = PeerDialer::new(vec![addr], Arc::clone(&registry));
        let mut retry = HashMap::new();
        dialer.dial_one(addr, &mut retry).await;

        assert!(registry.contains(&addr).await);
        assert!(retry.get(&addr).is_none());
    }

    #[tokio::test]
    async fn failed_dial_installs_backoff() {
        // Nothing listens on this address.
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let registry = Arc::new(PeerRegistry::new());
        let dialer = PeerDialer::new(vec![addr], Arc::clone(&registry));
        let mut retry = HashMap::new();
        dialer.dial_one(addr, &mut retry).await;

        assert!(!registry.contains(&addr).await);
        assert!(retry.get(&addr).unwrap().next_attempt > Instant::now());
    }
}
