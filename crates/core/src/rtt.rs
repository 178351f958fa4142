//! Adaptive round-trip-time tracking for per-block request deadlines: an
//! exponentially weighted moving average in the style of TCP's RTO
//! estimator, so a handful of slow samples from a congested link shift the
//! estimate instead of a single outlier blowing it up or down.

use std::time::Duration;

/// Weight given to each new sample; matches the classic TCP SRTT smoothing
/// factor (1/8) rather than a slower or faster average.
const ALPHA: f64 = 0.125;
const DEFAULT_RTT: Duration = Duration::from_millis(500);

pub struct RttEstimator {
    srtt_millis: f64,
    has_sample: bool,
}

impl RttEstimator {
    pub fn new() -> Self {
        Self {
            srtt_millis: DEFAULT_RTT.as_millis() as f64,
            has_sample: false,
        }
    }

    pub fn record_sample(&mut self, sample: Duration) {
        let sample_millis = sample.as_millis() as f64;
        self.srtt_millis = if self.has_sample {
            self.srtt_millis + ALPHA * (sample_millis - self.srtt_millis)
        } else {
            sample_millis
        };
        self.has_sample = true;
    }

    pub fn estimate(&self) -> Duration {
        Duration::from_millis(self.srtt_millis.round() as u64)
    }
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_becomes_the_estimate() {
        let mut r = RttEstimator::new();
        r.record_sample(Duration::from_millis(200));
        assert_eq!(r.estimate(), Duration::from_millis(200));
    }

    #[test]
    fn smooths_toward_new_samples_gradually() {
        let mut r = RttEstimator::new();
        r.record_sample(Duration::from_millis(100));
        r.record_sample(Duration::from_millis(900));
        // 100 + 0.125 * (900 - 100) = 200
        assert_eq!(r.estimate(), Duration::from_millis(200));
    }

    #[test]
    fn default_estimate_before_any_sample() {
        let r = RttEstimator::new();
        assert_eq!(r.estimate(), DEFAULT_RTT);
    }
}
