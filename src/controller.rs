//! Wires every component together and owns the root cancellation token
//! and shutdown sequencing. See SPEC_FULL.md §4.2 / §5.

use crate::config::Config;
use crate::gossip::Gossip;
use crate::metrics;
use crate::peers::{PeerDialer, PeerRegistry};
use crate::poller::{build_probe, OverrideRequest, PredictiveMonitor, Poller};
use crate::rpc::{RpcClient, Source};
use crate::status::StatusSnapshot;
use crate::types::BlockEvent;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Builds every component from `Config` and drives them until `cancel`
/// fires, then sequences an orderly shutdown: stop accepting new
/// detections, close peer connections, drain metrics with one final
/// flush attempt, and return.
pub struct Controller {
    config: Config,
}

impl Controller {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<(), crate::error::ConfigError> {
        let sources: Vec<Source> = self
            .config
            .rpc_nodes
            .iter()
            .map(|url| Source::new(url, self.config.rpc_user.clone(), self.config.rpc_pass.clone()))
            .collect::<Result<_, _>>()
            .map_err(|e| crate::error::ConfigError::Invalid(e.to_string()))?;

        let peer_addrs: Vec<SocketAddr> = self
            .config
            .peers
            .iter()
            .filter_map(|p| match p.parse() {
                Ok(addr) => Some(addr),
                Err(e) => {
                    warn!(peer = %p, error = %e, "ignoring unparseable peer address");
                    None
                }
            })
            .collect();

        let registry = Arc::new(PeerRegistry::new());
        let peer_count = registry.count_handle();
        let (status_writer, status_handle) = crate::status::channel(StatusSnapshot::initial(sources.len(), 1000));

        let probe = build_probe(self.config.turbo_mode);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<BlockEvent>();
        let (overrides_tx, overrides_rx) = mpsc::channel::<OverrideRequest>(4);

        let normal_interval = Duration::from_secs(self.config.poll_interval_seconds);
        let poller = Poller::new(sources.clone(), Arc::clone(&probe), events_tx, status_writer, peer_count, normal_interval);

        let dialer = PeerDialer::new(peer_addrs, Arc::clone(&registry));
        let gossip = Gossip::new(Arc::clone(&registry), env!("CARGO_PKG_VERSION"));

        let metrics_sink = match &self.config.metrics_url {
            Some(url) => {
                let url = url
                    .parse::<reqwest::Url>()
                    .map_err(|e| crate::error::ConfigError::Invalid(format!("invalid metrics_url: {e}")))?;
                let (sink, reporter) = metrics::channel(url);
                let reporter_cancel = cancel.clone();
                tokio::spawn(reporter.run(reporter_cancel));
                Some(sink)
            }
            None => None,
        };

        let poller_cancel = cancel.clone();
        let poller_task = tokio::spawn(poller.run(overrides_rx, poller_cancel));

        let dialer_cancel = cancel.clone();
        let dialer_task = tokio::spawn(dialer.run(dialer_cancel));

        let predictive_task = sources.first().cloned().map(|primary| {
            let client = RpcClient::new();
            let monitor = PredictiveMonitor::new(client, primary, self.config.turbo_mode);
            let predictive_cancel = cancel.clone();
            tokio::spawn(monitor.run(overrides_tx, predictive_cancel))
        });

        let status_cancel = cancel.clone();
        let status_log_handle = status_handle.clone();
        let status_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            loop {
                tokio::select! {
                    _ = status_cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        let snap = status_log_handle.current();
                        info!(
                            state = ?snap.state,
                            cadence_ms = snap.cadence_ms,
                            sources_in_backoff = snap.sources_in_backoff,
                            sources_total = snap.sources_total,
                            peer_count = snap.peer_count,
                            "status"
                        );
                    }
                }
            }
        });

        let relay_cancel = cancel.clone();
        let relay_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = relay_cancel.cancelled() => {
                        events_rx.close();
                        while let Some(mut event) = events_rx.recv().await {
                            event.peer_count = registry.len().await;
                            let delivered = gossip.fanout(&event).await;
                            info!(hash = %event.hash, delivered, "gossiped block event during shutdown drain");
                            if let Some(sink) = &metrics_sink {
                                sink.record(event);
                            }
                        }
                        return;
                    }
                    maybe_event = events_rx.recv() => {
                        match maybe_event {
                            Some(mut event) => {
                                event.peer_count = registry.len().await;
                                let delivered = gossip.fanout(&event).await;
                                info!(hash = %event.hash, delivered, "gossiped block event");
                                if let Some(sink) = &metrics_sink {
                                    sink.record(event);
                                }
                            }
                            None => return,
                        }
                    }
                }
            }
        });

        cancel.cancelled().await;
        info!("shutdown signal received, draining in-flight work");

        let drain = async {
            let _ = poller_task.await;
            let _ = dialer_task.await;
            if let Some(task) = predictive_task {
                let _ = task.await;
            }
            let _ = relay_task.await;
            let _ = status_task.await;
        };

        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("shutdown grace period elapsed before all tasks exited");
        }

        Ok(())
    }
}
