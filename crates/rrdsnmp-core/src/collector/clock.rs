//! Time source for the sampling loop, swappable for a manual clock in tests.

use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    /// Monotonic instant used for cadence arithmetic.
    fn now(&self) -> Instant;

    /// Wall-clock Unix seconds used to timestamp snapshots.
    fn unix_now(&self) -> i64;

    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
