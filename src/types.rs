//! Shared data types for the relay core.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Identifies one upstream RPC endpoint by its configured URL.
pub type SourceId = String;

/// A block hash as reported by an upstream RPC, kept as the hex string the
/// wire format uses rather than decoded bytes — the core never needs to
/// interpret the hash, only compare and relay it.
pub type BlockHash = String;

/// Most recent confirmed tip observed by the poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSnapshot {
    pub hash: BlockHash,
    pub height: u64,
    pub source: SourceId,
    pub observed_at_ms: i64,
}

/// A newly detected tip, emitted at most once per distinct hash.
///
/// Field names diverge from their in-process meaning on the wire
/// (SPEC_FULL.md §4.9's metrics payload): `hash` -> `block_hash`,
/// `source` -> `rpc_node`, `detection_latency_ms` -> `latency_ms`,
/// `timestamp_ms` -> `timestamp`. `license_key` is deliberately not a
/// field here (see DESIGN.md's Open Question decision) — it is not
/// per-event data, so a sink that needs it attaches it to the POST
/// separately rather than carrying it on every `BlockEvent`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BlockEvent {
    #[serde(rename = "block_hash")]
    pub hash: BlockHash,
    pub height: u64,
    #[serde(rename = "rpc_node")]
    pub source: SourceId,
    #[serde(rename = "latency_ms")]
    pub detection_latency_ms: u64,
    pub peer_count: usize,
    #[serde(rename = "timestamp")]
    pub timestamp_ms: i64,
}

impl BlockEvent {
    pub fn new(snapshot: &PollSnapshot, detection_latency_ms: u64) -> Self {
        Self {
            hash: snapshot.hash.clone(),
            height: snapshot.height,
            source: snapshot.source.clone(),
            detection_latency_ms,
            peer_count: 0,
            timestamp_ms: snapshot.observed_at_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_positive_and_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(a > 0);
        assert!(b >= a);
    }

    #[test]
    fn block_event_carries_snapshot_fields() {
        let snap = PollSnapshot {
            hash: "aa01".into(),
            height: 100,
            source: "http://rpc:8332".into(),
            observed_at_ms: 42,
        };
        let ev = BlockEvent::new(&snap, 17);
        assert_eq!(ev.hash, "aa01");
        assert_eq!(ev.height, 100);
        assert_eq!(ev.detection_latency_ms, 17);
        assert_eq!(ev.peer_count, 0);
    }
}
