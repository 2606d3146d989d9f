//! Owns polling cadence, detects new blocks, and drives the burst probe,
//! parallel monitor and predictive override. See SPEC_FULL.md §4.4.

pub mod cadence;
pub mod monitor;
pub mod predictive;
pub mod probe;

pub use cadence::{CadenceReason, CadenceState, PollState};
pub use predictive::{OverrideRequest, PredictiveMonitor};
pub use probe::{build_probe, BlockProbe, SafeProbe, TurboProbe};

use crate::rpc::{BackoffTable, Source, Tip};
use crate::status::{seconds_since, HealthState, StatusSnapshot, StatusWriter};
use crate::types::{now_ms, BlockEvent, PollSnapshot};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const HOT_PATH_DEADLINE: Duration = Duration::from_secs(1);
const HEADER_PREFETCH_DEADLINE: Duration = Duration::from_secs(3);

/// One candidate tip plus how long it took to obtain, reported back to
/// the Poller's single serialized task by the tick loop itself or by a
/// background burst-probe / parallel-monitor task.
type Candidate = (Source, Tip, u64);

pub struct Poller {
    sources: Vec<Source>,
    probe: Arc<dyn BlockProbe>,
    backoff: BackoffTable,
    cadence: CadenceState,
    last_snapshot: Option<PollSnapshot>,
    last_block_at: Option<Instant>,
    events_tx: mpsc::UnboundedSender<BlockEvent>,
    status: StatusWriter,
    peer_count: watch::Receiver<usize>,
}

impl Poller {
    /// `normal_interval` is `Config::poll_interval_seconds` converted to
    /// a `Duration` and becomes the cadence used in `PollState::Normal`.
    pub fn new(
        sources: Vec<Source>,
        probe: Arc<dyn BlockProbe>,
        events_tx: mpsc::UnboundedSender<BlockEvent>,
        status: StatusWriter,
        peer_count: watch::Receiver<usize>,
        normal_interval: Duration,
    ) -> Self {
        Self {
            sources,
            probe,
            backoff: BackoffTable::new(),
            cadence: CadenceState::boot(normal_interval),
            last_snapshot: None,
            last_block_at: None,
            events_tx,
            status,
            peer_count,
        }
    }

    /// Runs until `cancel` fires. No background work is spawned until
    /// `run` is called — construction alone does nothing (SPEC_FULL.md
    /// §9 design note on explicit lifecycle).
    pub async fn run(mut self, mut overrides_rx: mpsc::Receiver<OverrideRequest>, cancel: CancellationToken) {
        let (detections_tx, mut detections_rx) = mpsc::channel::<Candidate>(16);

        loop {
            self.cadence.recompute(Instant::now(), self.last_block_at);
            self.publish_status();
            let sleep = tokio::time::sleep(self.cadence.interval);

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("poller shutting down");
                    return;
                }
                _ = sleep => {
                    self.tick(&detections_tx).await;
                }
                Some(req) = overrides_rx.recv() => {
                    self.cadence.install_predictive_override(Instant::now(), req.duration);
                }
                Some((source, tip, latency_ms)) = detections_rx.recv() => {
                    self.handle_candidate(source, tip, latency_ms, &detections_tx);
                }
            }
        }
    }

    async fn tick(&mut self, detections_tx: &mpsc::Sender<Candidate>) {
        let started = Instant::now();
        match self.probe.poll_once(&self.sources, &mut self.backoff, HOT_PATH_DEADLINE).await {
            Ok((source, tip)) => {
                self.cadence.record_success();
                let latency_ms = started.elapsed().as_millis() as u64;
                self.handle_candidate(source, tip, latency_ms, detections_tx);
            }
            Err(e) => {
                warn!(error = %e, "poll tick failed, relying on backoff/cadence to recover");
                self.cadence.record_failure();
            }
        }
    }

    fn handle_candidate(&mut self, source: Source, tip: Tip, latency_ms: u64, detections_tx: &mpsc::Sender<Candidate>) {
        let is_new = self.last_snapshot.as_ref().map_or(true, |last| last.hash != tip.hash);
        if !is_new {
            return;
        }

        let now = Instant::now();
        let snapshot = PollSnapshot {
            hash: tip.hash.clone(),
            height: tip.height,
            source: source.id.clone(),
            observed_at_ms: now_ms(),
        };
        self.last_snapshot = Some(snapshot.clone());
        self.last_block_at = Some(now);
        self.cadence.force_hot();

        let event = BlockEvent::new(&snapshot, latency_ms);
        info!(hash = %event.hash, height = event.height, source = %event.source, latency_ms, "new block detected");
        let _ = self.events_tx.send(event);

        self.publish_status();
        self.spawn_post_detection(source, snapshot, detections_tx.clone());
    }

    /// Fires the burst probe, parallel monitor, and header prefetch as
    /// independent background tasks. None of these may extend the
    /// poller's own tick latency.
    fn spawn_post_detection(&self, source: Source, snapshot: PollSnapshot, detections_tx: mpsc::Sender<Candidate>) {
        let probe = Arc::clone(&self.probe);
        let client = probe.client().clone();
        let sources = self.sources.clone();
        let last_hash = snapshot.hash.clone();
        let current_height = snapshot.height;

        {
            let probe = Arc::clone(&probe);
            let source = source.clone();
            let last_hash = last_hash.clone();
            let tx = detections_tx.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                if let Some(tip) = probe.burst_probe(&source, &last_hash).await {
                    debug!(hash = %tip.hash, "burst probe found a newer tip");
                    let latency_ms = started.elapsed().as_millis() as u64;
                    let _ = tx.send((source, tip, latency_ms)).await;
                }
            });
        }

        {
            let client = client.clone();
            let sources = sources.clone();
            let last_hash = last_hash.clone();
            let tx = detections_tx.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                if let Some((source, tip)) = monitor::run(sources, client, last_hash, current_height).await {
                    debug!(hash = %tip.hash, "parallel monitor bypassed a lagging source");
                    let latency_ms = started.elapsed().as_millis() as u64;
                    let _ = tx.send((source, tip, latency_ms)).await;
                }
            });
        }

        {
            let client = client.clone();
            let source = source.clone();
            let hash = last_hash.clone();
            tokio::spawn(async move {
                let _ = client.get_block_header(&source, &hash, HEADER_PREFETCH_DEADLINE).await;
            });
        }
    }

    fn publish_status(&self) {
        let now = Instant::now();
        let in_backoff = self.backoff.in_backoff_count(
            &self.sources.iter().map(|s| s.id.clone()).collect::<Vec<_>>(),
            now,
        );
        let mut snapshot = StatusSnapshot {
            state: HealthState::Healthy,
            cadence_ms: self.cadence.interval.as_millis() as u64,
            sources_in_backoff: in_backoff,
            sources_total: self.sources.len(),
            peer_count: *self.peer_count.borrow(),
            seconds_since_last_detection: seconds_since(now_ms(), self.last_snapshot.as_ref().map(|s| s.observed_at_ms)),
        };
        snapshot.recompute_state();
        self.status.publish(snapshot);
    }
}
