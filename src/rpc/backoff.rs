//! Per-source exponential-with-jitter backoff. See SPEC_FULL.md §4.2.

use crate::types::SourceId;
use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, Instant};

const BASE_DELAY: Duration = Duration::from_secs(3);
const MAX_DELAY: Duration = Duration::from_secs(20);
const MULTIPLIER: f64 = 1.5;
const JITTER_MAX: Duration = Duration::from_secs(2);
/// A failure only compounds the previous delay if it lands within this
/// window of the previous one; otherwise it restarts at `BASE_DELAY`.
const FLAP_WINDOW: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy)]
struct Entry {
    backoff_until: Instant,
    last_failure: Instant,
    current_delay: Duration,
}

/// Single-writer table (Poller/ParallelFanOut); no external readers.
#[derive(Default)]
pub struct BackoffTable {
    entries: HashMap<SourceId, Entry>,
}

impl BackoffTable {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    pub fn should_skip(&self, source: &SourceId, now: Instant) -> bool {
        self.entries.get(source).is_some_and(|e| now < e.backoff_until)
    }

    /// Installs or extends the backoff for `source`. Consecutive failures
    /// within `FLAP_WINDOW` of the last one compound the delay by
    /// `MULTIPLIER`, capped at `MAX_DELAY`; otherwise the delay restarts
    /// at `BASE_DELAY`.
    pub fn on_failure(&mut self, source: &SourceId, now: Instant) {
        let entry = self.entries.get(source).copied();
        let base = match entry {
            Some(e) if now.saturating_duration_since(e.last_failure) <= FLAP_WINDOW => {
                e.current_delay.mul_f64(MULTIPLIER).min(MAX_DELAY)
            }
            _ => BASE_DELAY,
        };
        let jitter = Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..JITTER_MAX.as_secs_f64()));
        let delay = (base + jitter).min(MAX_DELAY + JITTER_MAX);
        self.entries.insert(
            source.clone(),
            Entry { backoff_until: now + delay, last_failure: now, current_delay: base },
        );
    }

    /// Idempotent: clearing an already-clear entry is a no-op.
    pub fn on_success(&mut self, source: &SourceId) {
        self.entries.remove(source);
    }

    pub fn in_backoff_count(&self, sources: &[SourceId], now: Instant) -> usize {
        sources.iter().filter(|s| self.should_skip(s, now)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_failure_installs_a_delay_in_range() {
        let mut table = BackoffTable::new();
        let t0 = Instant::now();
        table.on_failure(&"a".to_string(), t0);
        assert!(table.should_skip(&"a".to_string(), t0));
        assert!(!table.should_skip(&"a".to_string(), t0 + Duration::from_secs(23)));
    }

    #[test]
    fn consecutive_failures_grow_monotonically_until_capped() {
        let mut table = BackoffTable::new();
        let src = "a".to_string();
        let mut t = Instant::now();
        let mut last_delay = Duration::ZERO;
        for _ in 0..6 {
            table.on_failure(&src, t);
            let entry = table.entries.get(&src).unwrap();
            assert!(entry.current_delay >= last_delay);
            assert!(entry.current_delay <= MAX_DELAY);
            last_delay = entry.current_delay;
            t += Duration::from_secs(1);
        }
    }

    #[test]
    fn success_clears_the_entry_and_is_idempotent() {
        let mut table = BackoffTable::new();
        let src = "a".to_string();
        table.on_failure(&src, Instant::now());
        table.on_success(&src);
        assert!(!table.should_skip(&src, Instant::now()));
        // Repeated calls must not panic or underflow any counter.
        table.on_success(&src);
        table.on_success(&src);
    }

    #[test]
    fn flapping_outside_the_window_restarts_at_base_delay() {
        let mut table = BackoffTable::new();
        let src = "a".to_string();
        let t0 = Instant::now();
        table.on_failure(&src, t0);
        let far_future = t0 + FLAP_WINDOW + Duration::from_secs(5);
        table.on_failure(&src, far_future);
        let entry = table.entries.get(&src).unwrap();
        assert_eq!(entry.current_delay, BASE_DELAY);
    }

    #[test]
    fn in_backoff_count_reflects_skip_state() {
        let mut table = BackoffTable::new();
        let now = Instant::now();
        let sources = vec!["a".to_string(), "b".to_string()];
        table.on_failure(&sources[0], now);
        assert_eq!(table.in_backoff_count(&sources, now), 1);
    }

    proptest::proptest! {
        /// Whatever run of back-to-back failures (each landing inside the
        /// flap window of the last) we generate, the installed delay never
        /// exceeds `MAX_DELAY + JITTER_MAX` and never decreases from one
        /// failure to the next.
        #[test]
        fn delay_stays_bounded_across_any_flap_sequence(failure_count in 1u32..50) {
            let mut table = BackoffTable::new();
            let src = "a".to_string();
            let mut t = Instant::now();
            let mut last_delay = Duration::ZERO;
            for _ in 0..failure_count {
                table.on_failure(&src, t);
                let entry = table.entries.get(&src).unwrap();
                prop_assert!(entry.current_delay >= last_delay);
                prop_assert!(entry.current_delay <= MAX_DELAY);
                prop_assert!(entry.backoff_until - t <= MAX_DELAY + JITTER_MAX);
                last_delay = entry.current_delay;
                t += Duration::from_secs(1);
            }
        }
    }
}
