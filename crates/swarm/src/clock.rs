//! Injected time source: production code reads wall-clock time through
//! this trait so tests can drive timeouts, keep-alives, and the choking
//! cycle deterministically instead of racing real time.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;

    fn now_duration_since(&self, earlier_millis: u64) -> Duration {
        Duration::from_millis(self.now_millis().saturating_sub(earlier_millis))
    }
}

#[derive(Default, Clone, Copy)]
pub struct RealClock;

impl Clock for RealClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// A clock that only advances when told to, for deterministic tests.
pub struct FakeClock {
    now: Mutex<u64>,
}

impl FakeClock {
    pub fn new(start_millis: u64) -> Self {
        Self { now: Mutex::new(start_millis) }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by.as_millis() as u64;
    }

    pub fn set(&self, millis: u64) {
        *self.now.lock() = millis;
    }
}

impl Clock for FakeClock {
    fn now_millis(&self) -> u64 {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances_on_demand() {
        let clock = FakeClock::new(1000);
        assert_eq!(clock.now_millis(), 1000);
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now_millis(), 6000);
    }
}
