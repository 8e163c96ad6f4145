//! Session-level retry state machine

use std::time::Duration;

/// Exponential backoff settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the first failure; doubled after each further failure
    pub base_delay: Duration,
    /// Consecutive failed sessions before the scheduler parks
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows the `failures`-th failure
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exponent)
    }
}

/// What the scheduler should do after a failed session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    /// Attempts used up; wait for connectivity restoration or a manual trigger
    Exhausted,
}

/// Consecutive failure counter for one tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    policy: RetryPolicy,
    failures: u32,
}

impl RetryState {
    pub const fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    pub const fn failures(&self) -> u32 {
        self.failures
    }

    pub const fn is_exhausted(&self) -> bool {
        self.failures >= self.policy.max_attempts
    }

    /// Count a failed session and decide when to try again
    pub fn record_failure(&mut self) -> RetryDecision {
        self.failures = self.failures.saturating_add(1);
        if self.is_exhausted() {
            RetryDecision::Exhausted
        } else {
            RetryDecision::RetryAfter(self.policy.delay_for(self.failures))
        }
    }

    /// Forget past failures (success, manual trigger, connectivity restored)
    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn delays_double_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(30));
        assert_eq!(policy.delay_for(2), Duration::from_secs(60));
        assert_eq!(policy.delay_for(3), Duration::from_secs(120));
    }

    #[test]
    fn third_failure_parks() {
        let mut state = RetryState::new(RetryPolicy::default());
        assert_eq!(
            state.record_failure(),
            RetryDecision::RetryAfter(Duration::from_secs(30))
        );
        assert_eq!(
            state.record_failure(),
            RetryDecision::RetryAfter(Duration::from_secs(60))
        );
        assert_eq!(state.record_failure(), RetryDecision::Exhausted);
        assert!(state.is_exhausted());
        assert_eq!(state.record_failure(), RetryDecision::Exhausted);
    }

    #[test]
    fn reset_restores_full_budget() {
        let mut state = RetryState::new(RetryPolicy::default());
        state.record_failure();
        state.record_failure();
        state.record_failure();
        state.reset();

        assert_eq!(state.failures(), 0);
        assert!(!state.is_exhausted());
        assert_eq!(
            state.record_failure(),
            RetryDecision::RetryAfter(Duration::from_secs(30))
        );
    }

    #[test]
    fn huge_failure_counts_do_not_overflow() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(30),
            max_attempts: u32::MAX,
        };
        assert!(policy.delay_for(u32::MAX) >= Duration::from_secs(30));
    }
}
