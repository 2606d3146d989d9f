//! `BlockProbe` — the single capability the Poller depends on, so the
//! "turbo" (parallel fan-out) and "safe" (single source) code paths are
//! two implementations chosen once at wiring time rather than a boolean
//! threaded through the hot path. See SPEC_FULL.md §4.5 / §9.

use crate::error::FanOutError;
use crate::rpc::{BackoffTable, ParallelFanOut, RpcClient, Source, Tip};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub const BURST_PROBE_ATTEMPTS: u32 = 5;
pub const BURST_PROBE_SPACING: Duration = Duration::from_millis(50);

#[async_trait]
pub trait BlockProbe: Send + Sync {
    /// One hot-path tick: acquire a `(Source, Tip)` from the configured
    /// sources, honoring `backoff`.
    async fn poll_once(
        &self,
        sources: &[Source],
        backoff: &mut BackoffTable,
        deadline: Duration,
    ) -> Result<(Source, Tip), FanOutError>;

    /// Up to `BURST_PROBE_ATTEMPTS` rapid re-polls of `source` spaced
    /// `BURST_PROBE_SPACING` apart, immediately after a detection.
    /// Terminates on the first probe returning a hash different from
    /// `last_hash`; query failures are ignored (the probe is advisory).
    async fn burst_probe(&self, source: &Source, last_hash: &str) -> Option<Tip> {
        for _ in 0..BURST_PROBE_ATTEMPTS {
            tokio::time::sleep(BURST_PROBE_SPACING).await;
            if let Ok(tip) = self.client().get_blockchain_info(source, Duration::from_secs(1)).await {
                if !tip.hash.is_empty() && tip.hash != last_hash {
                    return Some(tip);
                }
            }
        }
        None
    }

    fn client(&self) -> &RpcClient;
}

/// Parallel fan-out across every configured source, gated on
/// `turbo_mode = true`.
pub struct TurboProbe {
    client: RpcClient,
}

impl TurboProbe {
    pub fn new(client: RpcClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BlockProbe for TurboProbe {
    async fn poll_once(
        &self,
        sources: &[Source],
        backoff: &mut BackoffTable,
        deadline: Duration,
    ) -> Result<(Source, Tip), FanOutError> {
        let fanout = ParallelFanOut::new(&self.client);
        fanout.poll(sources, backoff, deadline).await.map(|w| (w.source, w.tip))
    }

    fn client(&self) -> &RpcClient {
        &self.client
    }
}

/// Single-source polling, used when `turbo_mode = false`. Tries sources
/// in order, skipping any currently backed off, and returns the first
/// success — there is no concurrent fan-out.
pub struct SafeProbe {
    client: RpcClient,
}

impl SafeProbe {
    pub fn new(client: RpcClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BlockProbe for SafeProbe {
    async fn poll_once(
        &self,
        sources: &[Source],
        backoff: &mut BackoffTable,
        deadline: Duration,
    ) -> Result<(Source, Tip), FanOutError> {
        let now = std::time::Instant::now();
        let eligible: Vec<&Source> = sources.iter().filter(|s| !backoff.should_skip(&s.id, now)).collect();
        if eligible.is_empty() {
            return Err(FanOutError::NoSourcesAvailable);
        }

        let mut any_attempted = false;
        for source in eligible {
            any_attempted = true;
            match self.client.get_blockchain_info(source, deadline).await {
                Ok(tip) if !tip.hash.is_empty() => {
                    backoff.on_success(&source.id);
                    return Ok((source.clone(), tip));
                }
                _ => {
                    backoff.on_failure(&source.id, std::time::Instant::now());
                }
            }
        }
        if any_attempted {
            Err(FanOutError::AllFailed)
        } else {
            Err(FanOutError::NoSourcesAvailable)
        }
    }

    fn client(&self) -> &RpcClient {
        &self.client
    }
}

/// Chooses the probe implementation once, at wiring time. Returned as
/// an `Arc` because the Poller hands clones of it to the burst-probe and
/// header-prefetch tasks it spawns after every detection.
pub fn build_probe(turbo_mode: bool) -> Arc<dyn BlockProbe> {
    if turbo_mode {
        Arc::new(TurboProbe::new(RpcClient::new()))
    } else {
        Arc::new(SafeProbe::new(RpcClient::new()))
    }
}
