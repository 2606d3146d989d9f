//! Bounded, best-effort metrics export. A full sink never blocks block
//! detection or gossip: events are dropped-newest and the drop is logged.
//! See SPEC_FULL.md §4.9.

use crate::types::BlockEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 500;
const FLUSH_INTERVAL: Duration = Duration::from_secs(2);
const FLUSH_BATCH_SIZE: usize = 25;
const POST_DEADLINE: Duration = Duration::from_secs(5);

/// Producer handle. Cloned into every task that emits `BlockEvent`s.
#[derive(Clone)]
pub struct MetricsSink {
    tx: mpsc::Sender<BlockEvent>,
}

impl MetricsSink {
    /// Enqueues `event`. If the bounded channel is full the event is
    /// dropped and a warning is logged; callers never await backpressure
    /// from the metrics path.
    pub fn record(&self, event: BlockEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("metrics channel full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("metrics reporter has shut down, dropping event");
            }
        }
    }
}

/// Background task that batches events and POSTs them to `metrics_url`.
/// Owns its own `reqwest::Client`, deliberately not shared with the RPC
/// client (SPEC_FULL.md §9) so a slow metrics endpoint never contends
/// with the poll hot path's connection pool.
pub struct MetricsReporter {
    rx: mpsc::Receiver<BlockEvent>,
    http: reqwest::Client,
    url: reqwest::Url,
}

pub fn channel(url: reqwest::Url) -> (MetricsSink, MetricsReporter) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let http = reqwest::Client::builder()
        .build()
        .expect("reqwest client builds with static configuration");
    (MetricsSink { tx }, MetricsReporter { rx, http, url })
}

impl MetricsReporter {
    /// Drains in batches of `FLUSH_BATCH_SIZE` or every `FLUSH_INTERVAL`,
    /// whichever comes first. POST failures are logged and dropped, never
    /// retried — a missed metrics batch is not worth re-queuing against
    /// fresher events.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut batch = Vec::with_capacity(FLUSH_BATCH_SIZE);
        let mut ticker = tokio::time::interval(FLUSH_INTERVAL);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.drain_remaining(&mut batch).await;
                    self.flush(&mut batch).await;
                    return;
                }
                _ = ticker.tick() => {
                    self.flush(&mut batch).await;
                }
                maybe_event = self.rx.recv() => {
                    match maybe_event {
                        Some(event) => {
                            batch.push(event);
                            if batch.len() >= FLUSH_BATCH_SIZE {
                                self.flush(&mut batch).await;
                            }
                        }
                        None => {
                            self.flush(&mut batch).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn drain_remaining(&mut self, batch: &mut Vec<BlockEvent>) {
        while let Ok(event) = self.rx.try_recv() {
            batch.push(event);
        }
    }

    async fn flush(&self, batch: &mut Vec<BlockEvent>) {
        if batch.is_empty() {
            return;
        }
        let payload = std::mem::take(batch);
        let count = payload.len();
        let result = self
            .http
            .post(self.url.clone())
            .json(&payload)
            .timeout(POST_DEADLINE)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                debug!(count, "flushed metrics batch");
            }
            Ok(resp) => {
                warn!(count, status = resp.status().as_u16(), "metrics endpoint rejected batch");
            }
            Err(e) => {
                warn!(count, error = %e, "metrics batch POST failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> BlockEvent {
        BlockEvent {
            hash: "h".repeat(64),
            height: 1,
            source: "http://rpc:8332".into(),
            detection_latency_ms: 5,
            peer_count: 0,
            timestamp_ms: 1_700_000_000_000,
        }
    }

    #[tokio::test]
    async fn record_drops_newest_when_channel_is_full() {
        let url: reqwest::Url = "http://127.0.0.1:9/metrics".parse().unwrap();
        let (sink, mut reporter) = channel(url);
        // Fill the channel without a reporter draining it.
        for _ in 0..CHANNEL_CAPACITY {
            sink.record(sample_event());
        }
        sink.record(sample_event());

        let mut drained = 0;
        while reporter.rx.try_recv().is_ok() {
            drained += 1;
        }
        assert_eq!(drained, CHANNEL_CAPACITY);
    }

    #[test]
    fn wire_format_uses_documented_field_names() {
        let value = serde_json::to_value(sample_event()).unwrap();
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("block_hash"), "missing block_hash: {obj:?}");
        assert!(obj.contains_key("rpc_node"), "missing rpc_node: {obj:?}");
        assert!(obj.contains_key("latency_ms"), "missing latency_ms: {obj:?}");
        assert!(obj.contains_key("timestamp"), "missing timestamp: {obj:?}");
        assert!(obj.contains_key("height"));
        assert!(obj.contains_key("peer_count"));
        assert!(!obj.contains_key("hash"));
        assert!(!obj.contains_key("source"));
        assert!(!obj.contains_key("detection_latency_ms"));
        assert!(!obj.contains_key("timestamp_ms"));
    }

    #[tokio::test]
    async fn reporter_shuts_down_when_sink_is_dropped() {
        let url: reqwest::Url = "http://127.0.0.1:9/metrics".parse().unwrap();
        let (sink, reporter) = channel(url);
        drop(sink);
        let cancel = CancellationToken::new();
        // Should return promptly once the channel closes, not hang.
        tokio::time::timeout(Duration::from_secs(1), reporter.run(cancel))
            .await
            .expect("reporter must exit when the sink is dropped");
    }
}
