//! Polling cadence state machine. See SPEC_FULL.md §4.4.
//!
//! Owned exclusively by `Poller`; `PredictiveMonitor` never mutates it
//! directly, it only posts override requests that `Poller` applies with
//! a compare-and-swap-like update carrying its own expiry.

use std::time::{Duration, Instant};

pub const HOT_INTERVAL: Duration = Duration::from_millis(250);
pub const WARM_INTERVAL: Duration = Duration::from_millis(500);
/// Fallback used only where no configured value is available (e.g. a
/// bare `PollState` constructed outside a `CadenceState`). Production
/// callers get the Normal interval from `Config::poll_interval_seconds`
/// via `CadenceState::boot`.
pub const DEFAULT_NORMAL_INTERVAL: Duration = Duration::from_secs(1);
pub const COOL_INTERVAL: Duration = Duration::from_secs(2);
pub const IDLE_INTERVAL: Duration = Duration::from_secs(5);

const HOT_WINDOW: Duration = Duration::from_secs(45);
const WARM_WINDOW: Duration = Duration::from_secs(2 * 60);
const NORMAL_WINDOW: Duration = Duration::from_secs(5 * 60);
const COOL_WINDOW: Duration = Duration::from_secs(10 * 60);

pub const ERROR_BACKOFF_CAP: Duration = Duration::from_secs(30);
const ERROR_BACKOFF_THRESHOLD: u32 = 3;
const ERROR_BACKOFF_STEP: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Hot,
    Warm,
    Normal,
    Cool,
    Idle,
}

impl PollState {
    /// `normal_interval` is the configured `Config::poll_interval_seconds`
    /// duration; every other state's interval is fixed.
    fn base_interval(self, normal_interval: Duration) -> Duration {
        match self {
            PollState::Hot => HOT_INTERVAL,
            PollState::Warm => WARM_INTERVAL,
            PollState::Normal => normal_interval,
            PollState::Cool => COOL_INTERVAL,
            PollState::Idle => IDLE_INTERVAL,
        }
    }

    /// Derives the adaptive state purely from time elapsed since the last
    /// detection (SPEC_FULL.md §4.4 state table).
    fn from_elapsed(elapsed: Duration) -> Self {
        if elapsed <= HOT_WINDOW {
            PollState::Hot
        } else if elapsed <= WARM_WINDOW {
            PollState::Warm
        } else if elapsed <= NORMAL_WINDOW {
            PollState::Normal
        } else if elapsed <= COOL_WINDOW {
            PollState::Cool
        } else {
            PollState::Idle
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CadenceReason {
    Adaptive,
    Predictive,
}

/// Current polling interval plus why it is what it is.
#[derive(Debug, Clone, Copy)]
pub struct CadenceState {
    pub interval: Duration,
    pub reason: CadenceReason,
    normal_interval: Duration,
    predictive_expires_at: Option<Instant>,
    consecutive_failures: u32,
}

impl CadenceState {
    /// `normal_interval` is `Config::poll_interval_seconds` converted to
    /// a `Duration` — the interval used while in `PollState::Normal`.
    pub fn boot(normal_interval: Duration) -> Self {
        Self {
            interval: normal_interval,
            reason: CadenceReason::Adaptive,
            normal_interval,
            predictive_expires_at: None,
            consecutive_failures: 0,
        }
    }

    /// Installs (or extends) a temporary HOT override. Cumulative-safe:
    /// repeated spikes extend the expiry but never shorten it.
    pub fn install_predictive_override(&mut self, now: Instant, duration: Duration) {
        let candidate = now + duration;
        self.predictive_expires_at = Some(match self.predictive_expires_at {
            Some(existing) if existing > candidate => existing,
            _ => candidate,
        });
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
    }

    /// Recomputes `interval`/`reason` for the next tick. A predictive
    /// override, while live, preempts the adaptive time-since-last-block
    /// cadence unconditionally (SPEC_FULL.md §9 decision).
    pub fn recompute(&mut self, now: Instant, last_block_at: Option<Instant>) {
        if let Some(expiry) = self.predictive_expires_at {
            if now < expiry {
                self.interval = HOT_INTERVAL;
                self.reason = CadenceReason::Predictive;
                return;
            }
            self.predictive_expires_at = None;
        }

        let elapsed = last_block_at.map(|t| now.saturating_duration_since(t)).unwrap_or(COOL_WINDOW + Duration::from_secs(1));
        let state = PollState::from_elapsed(elapsed);
        let mut interval = state.base_interval(self.normal_interval);

        if self.consecutive_failures > ERROR_BACKOFF_THRESHOLD {
            let extra_steps = self.consecutive_failures - ERROR_BACKOFF_THRESHOLD;
            let jitter = Duration::from_millis(rand::random::<u64>() % 1000);
            let error_backoff = (ERROR_BACKOFF_STEP * extra_steps).min(ERROR_BACKOFF_CAP) + jitter;
            interval += error_backoff;
        }

        self.interval = interval;
        self.reason = CadenceReason::Adaptive;
    }

    /// Forces HOT state immediately after a detection, resetting the
    /// "time since last block" clock implicitly via the caller updating
    /// `last_block_at` before the next `recompute`.
    pub fn force_hot(&mut self) {
        self.interval = HOT_INTERVAL;
        self.reason = CadenceReason::Adaptive;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boots_in_normal_state() {
        let cadence = CadenceState::boot(DEFAULT_NORMAL_INTERVAL);
        assert_eq!(cadence.interval, DEFAULT_NORMAL_INTERVAL);
    }

    #[test]
    fn normal_interval_is_configurable() {
        let configured = Duration::from_secs(7);
        let mut cadence = CadenceState::boot(configured);
        assert_eq!(cadence.interval, configured);

        // Re-enter Normal state (outside the Hot/Warm windows, inside
        // the Normal window) and confirm recompute keeps honoring it.
        let t0 = Instant::now();
        let last_block = t0 - (WARM_WINDOW + Duration::from_secs(1));
        cadence.recompute(t0, Some(last_block));
        assert_eq!(cadence.interval, configured);
    }

    #[test]
    fn stays_hot_for_at_least_two_minutes_of_continuous_detection() {
        let mut cadence = CadenceState::boot(DEFAULT_NORMAL_INTERVAL);
        let t0 = Instant::now();
        cadence.recompute(t0, Some(t0));
        assert_eq!(cadence.interval, HOT_INTERVAL);
        cadence.recompute(t0 + Duration::from_secs(120), Some(t0));
        assert!(cadence.interval <= WARM_INTERVAL);
    }

    #[test]
    fn predictive_override_is_cumulative_safe() {
        let mut cadence = CadenceState::boot(DEFAULT_NORMAL_INTERVAL);
        let t0 = Instant::now();
        cadence.install_predictive_override(t0, Duration::from_secs(60));
        cadence.recompute(t0 + Duration::from_secs(30), None);
        assert_eq!(cadence.interval, HOT_INTERVAL);
        assert_eq!(cadence.reason, CadenceReason::Predictive);

        // A second, shorter spike must not shrink the expiry.
        cadence.install_predictive_override(t0 + Duration::from_secs(30), Duration::from_secs(10));
        cadence.recompute(t0 + Duration::from_secs(55), None);
        assert_eq!(cadence.reason, CadenceReason::Predictive);
    }

    #[test]
    fn predictive_override_preempts_idle_cadence_unconditionally() {
        let mut cadence = CadenceState::boot(DEFAULT_NORMAL_INTERVAL);
        let t0 = Instant::now();
        let far_past = t0 - Duration::from_secs(20 * 60);
        cadence.install_predictive_override(t0, Duration::from_secs(60));
        cadence.recompute(t0, Some(far_past));
        assert_eq!(cadence.interval, HOT_INTERVAL);
    }

    #[test]
    fn error_backoff_is_additive_and_capped() {
        let mut cadence = CadenceState::boot(DEFAULT_NORMAL_INTERVAL);
        let t0 = Instant::now();
        for _ in 0..10 {
            cadence.record_failure();
        }
        cadence.recompute(t0, None);
        assert!(cadence.interval <= IDLE_INTERVAL + ERROR_BACKOFF_CAP + Duration::from_secs(1));
    }

    #[test]
    fn success_releases_error_backoff() {
        let mut cadence = CadenceState::boot(DEFAULT_NORMAL_INTERVAL);
        let t0 = Instant::now();
        for _ in 0..10 {
            cadence.record_failure();
        }
        cadence.record_success();
        cadence.recompute(t0, Some(t0));
        assert_eq!(cadence.interval, HOT_INTERVAL);
    }
}
