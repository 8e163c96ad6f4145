//! Time sources for sync metadata.
//!
//! All timestamps stored by the engine are Unix milliseconds. The clock is an
//! explicit dependency so sessions and stores can be driven deterministically.

use std::sync::atomic::{AtomicI64, Ordering};

/// Source of "now" in Unix milliseconds
pub trait Clock: Send + Sync {
    /// Current time in Unix milliseconds
    fn now_millis(&self) -> i64;
}

/// Wall clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually driven clock for simulations and tests
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a clock frozen at `now` (Unix ms)
    pub const fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    /// Jump to an absolute time
    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Move the clock forward by `millis`
    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        clock.advance(500);
        assert_eq!(clock.now_millis(), 1_500);
        clock.set(10);
        assert_eq!(clock.now_millis(), 10);
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now_millis() > 1_577_836_800_000);
    }
}
