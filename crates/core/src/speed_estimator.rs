//! Sliding-window throughput estimate: bytes are bucketed by the second
//! they arrived in, and the reported speed is the sum of buckets inside a
//! trailing window divided by the window length.

use parking_lot::Mutex;
use std::collections::VecDeque;

const DEFAULT_WINDOW_SECS: u64 = 20;

struct Bucket {
    second: u64,
    bytes: u64,
}

struct Inner {
    window_secs: u64,
    buckets: VecDeque<Bucket>,
}

/// Thread-safe; a peer connection task calls `add_bytes` as data arrives,
/// the scheduler calls `speed` from elsewhere to rank peers.
pub struct SpeedEstimator {
    inner: Mutex<Inner>,
}

impl SpeedEstimator {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW_SECS)
    }

    pub fn with_window(window_secs: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                window_secs: window_secs.max(1),
                buckets: VecDeque::new(),
            }),
        }
    }

    /// `now_millis` is epoch milliseconds from the injected `Clock`, never
    /// wall-clock time read directly, so tests can drive this
    /// deterministically.
    pub fn add_bytes(&self, now_millis: u64, n: u64) {
        let second = now_millis / 1000;
        let mut inner = self.inner.lock();
        match inner.buckets.back_mut() {
            Some(b) if b.second == second => b.bytes += n,
            _ => inner.buckets.push_back(Bucket { second, bytes: n }),
        }
        Self::evict_older_than(&mut inner, second);
    }

    /// Bytes/sec averaged over the trailing window. A gap longer than the
    /// window (no bytes at all recently) reports zero rather than stale
    /// data.
    pub fn speed(&self, now_millis: u64) -> f64 {
        let second = now_millis / 1000;
        let mut inner = self.inner.lock();
        Self::evict_older_than(&mut inner, second);
        let window_secs = inner.window_secs;
        match inner.buckets.front() {
            Some(b) if second.saturating_sub(b.second) >= window_secs => 0.0,
            _ => {
                let total: u64 = inner.buckets.iter().map(|b| b.bytes).sum();
                total as f64 / window_secs as f64
            }
        }
    }

    fn evict_older_than(inner: &mut Inner, current_second: u64) {
        let cutoff = current_second.saturating_sub(inner.window_secs);
        while let Some(front) = inner.buckets.front() {
            if front.second <= cutoff {
                inner.buckets.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for SpeedEstimator {
    fn default() -> Self {
        Self::new()
    }
}
