//! Adaptive connect-timeout tracking: the timeout used for the next
//! connection attempt is derived from the p95 of recent successful connect
//! durations, clamped to a sane floor/ceiling so a handful of lucky fast
//! connects can't starve slower-but-viable peers.

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

const HISTORY_CAPACITY: usize = 100;
const MIN_TIMEOUT: Duration = Duration::from_millis(500);
const MAX_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct History {
    // Millis, kept sorted is unnecessary; percentile computed on read.
    samples: Vec<u64>,
}

pub struct ConnTimingTracker {
    history: Mutex<History>,
}

impl ConnTimingTracker {
    pub fn new() -> Self {
        Self {
            history: Mutex::new(History {
                samples: Vec::with_capacity(HISTORY_CAPACITY),
            }),
        }
    }

    pub fn record_connect(&self, duration: Duration) {
        let mut history = self.history.lock();
        if history.samples.len() == HISTORY_CAPACITY {
            history.samples.remove(0);
        }
        history.samples.push(duration.as_millis() as u64);
    }

    /// p95 of recorded connect durations, clamped to `[MIN_TIMEOUT,
    /// MAX_TIMEOUT]`. With no history yet, a fixed default is used.
    pub fn timeout(&self) -> Duration {
        let history = self.history.lock();
        if history.samples.is_empty() {
            return DEFAULT_TIMEOUT;
        }
        let mut sorted = history.samples.clone();
        sorted.sort_unstable();
        let idx = ((sorted.len() as f64) * 0.95).ceil() as usize;
        let idx = idx.saturating_sub(1).min(sorted.len() - 1);
        let millis = sorted[idx];
        Duration::from_millis(millis).clamp(MIN_TIMEOUT, MAX_TIMEOUT)
    }

    pub fn sample_count(&self) -> usize {
        self.history.lock().samples.len()
    }
}

impl Default for ConnTimingTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeout_with_no_history() {
        let t = ConnTimingTracker::new();
        assert_eq!(t.timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn timeout_tracks_p95_of_history() {
        let t = ConnTimingTracker::new();
        for ms in 1..=100u64 {
            t.record_connect(Duration::from_millis(ms));
        }
        // p95 of 1..=100 is 95ms, well inside the clamp bounds.
        assert_eq!(t.timeout(), Duration::from_millis(95));
    }

    #[test]
    fn timeout_is_clamped_to_bounds() {
        let t = ConnTimingTracker::new();
        t.record_connect(Duration::from_millis(1));
        assert_eq!(t.timeout(), MIN_TIMEOUT);

        let t = ConnTimingTracker::new();
        t.record_connect(Duration::from_secs(60));
        assert_eq!(t.timeout(), MAX_TIMEOUT);
    }

    #[test]
    fn history_is_bounded() {
        let t = ConnTimingTracker::new();
        for ms in 0..(HISTORY_CAPACITY as u64 * 2) {
            t.record_connect(Duration::from_millis(ms));
        }
        assert_eq!(t.sample_count(), HISTORY_CAPACITY);
    }
}
