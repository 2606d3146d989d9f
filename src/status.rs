//! Operational status surface: a single-writer, many-reader snapshot of
//! current health that an external dashboard (out of scope) can poll
//! without touching the hot path. See SPEC_FULL.md §4.11.

use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub state: HealthState,
    pub cadence_ms: u64,
    pub sources_in_backoff: usize,
    pub sources_total: usize,
    pub peer_count: usize,
    pub seconds_since_last_detection: Option<u64>,
}

impl StatusSnapshot {
    pub fn initial(sources_total: usize, cadence_ms: u64) -> Self {
        Self {
            state: HealthState::Healthy,
            cadence_ms,
            sources_in_backoff: 0,
            sources_total,
            peer_count: 0,
            seconds_since_last_detection: None,
        }
    }

    /// Degraded is reported exactly when every configured source is
    /// currently in backoff (SPEC_FULL.md §4.11).
    pub fn recompute_state(&mut self) {
        self.state = if self.sources_total > 0 && self.sources_in_backoff >= self.sources_total {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };
    }
}

/// Write half, owned by Controller/Poller/Gossip.
#[derive(Clone)]
pub struct StatusWriter {
    tx: watch::Sender<StatusSnapshot>,
}

/// Read half, cloneable and lock-free; handed to anything that wants to
/// observe current health.
#[derive(Clone)]
pub struct StatusHandle {
    rx: watch::Receiver<StatusSnapshot>,
}

pub fn channel(initial: StatusSnapshot) -> (StatusWriter, StatusHandle) {
    let (tx, rx) = watch::channel(initial);
    (StatusWriter { tx }, StatusHandle { rx })
}

impl StatusWriter {
    /// Never blocks: `watch::Sender::send` only fails if every receiver
    /// has been dropped, which we treat as a no-op.
    pub fn publish(&self, snapshot: StatusSnapshot) {
        let _ = self.tx.send(snapshot);
    }
}

impl StatusHandle {
    pub fn current(&self) -> StatusSnapshot {
        self.rx.borrow().clone()
    }
}

pub fn seconds_since(now_ms: i64, detected_at_ms: Option<i64>) -> Option<u64> {
    detected_at_ms.map(|t| {
        let delta_ms = (now_ms - t).max(0);
        Duration::from_millis(delta_ms as u64).as_secs()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_only_when_every_source_is_backed_off() {
        let mut snap = StatusSnapshot::initial(3, 1000);
        snap.sources_in_backoff = 2;
        snap.recompute_state();
        assert_eq!(snap.state, HealthState::Healthy);

        snap.sources_in_backoff = 3;
        snap.recompute_state();
        assert_eq!(snap.state, HealthState::Degraded);
    }

    #[test]
    fn no_sources_configured_is_not_degraded() {
        let mut snap = StatusSnapshot::initial(0, 1000);
        snap.recompute_state();
        assert_eq!(snap.state, HealthState::Healthy);
    }

    #[tokio::test]
    async fn handle_observes_writer_updates() {
        let (writer, handle) = channel(StatusSnapshot::initial(1, 1000));
        assert_eq!(handle.current().cadence_ms, 1000);
        writer.publish(StatusSnapshot::initial(1, 250));
        assert_eq!(handle.current().cadence_ms, 250);
    }
}
