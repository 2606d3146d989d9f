//! Mempool-driven predictive acceleration. See SPEC_FULL.md §4.6.

use crate::rpc::{RpcClient, Source};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const ACCELERATED_INTERVAL: Duration = Duration::from_millis(500);
const NORMAL_INTERVAL: Duration = Duration::from_secs(2);
const ACCELERATED_THRESHOLD: u64 = 40;
const NORMAL_THRESHOLD: u64 = 50;
pub const OVERRIDE_DURATION: Duration = Duration::from_secs(60);
const MEMPOOL_QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// A non-blocking override request posted to the Poller. The Poller
/// applies it with a compare-and-swap-like update; `PredictiveMonitor`
/// never touches `CadenceState` directly.
#[derive(Debug, Clone, Copy)]
pub struct OverrideRequest {
    pub duration: Duration,
}

/// Polls upstream mempool size and declares a spike when
/// `current > threshold && current > 2 * last`. Query failures are
/// silently ignored — predictive acceleration is advisory only.
pub struct PredictiveMonitor {
    client: RpcClient,
    source: Source,
    accelerated: bool,
    last_size: Option<u64>,
}

impl PredictiveMonitor {
    pub fn new(client: RpcClient, source: Source, accelerated: bool) -> Self {
        Self { client, source, accelerated, last_size: None }
    }

    fn interval(&self) -> Duration {
        if self.accelerated { ACCELERATED_INTERVAL } else { NORMAL_INTERVAL }
    }

    fn threshold(&self) -> u64 {
        if self.accelerated { ACCELERATED_THRESHOLD } else { NORMAL_THRESHOLD }
    }

    fn observe(&mut self, current_size: u64) -> bool {
        let spike = current_size > self.threshold()
            && self.last_size.is_some_and(|last| current_size > 2 * last);
        self.last_size = Some(current_size);
        spike
    }

    pub async fn run(mut self, overrides_tx: mpsc::Sender<OverrideRequest>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.interval()) => {}
            }

            match self.client.get_mempool_size(&self.source, MEMPOOL_QUERY_TIMEOUT).await {
                Ok(size) => {
                    if self.observe(size) {
                        debug!(size, "mempool spike detected, requesting predictive HOT override");
                        let _ = overrides_tx.try_send(OverrideRequest { duration: OVERRIDE_DURATION });
                    }
                }
                Err(e) => {
                    debug!(error = %e, "mempool query failed, ignoring");
                }
            }
        }
    }
}
