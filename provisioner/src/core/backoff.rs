//! Retry policy with exponential backoff.

use std::time::Duration;

/// How many times a step's action may be attempted and how long to wait
/// between attempts.
///
/// Delays double per attempt starting from `initial_delay`, capped at
/// `max_delay`. `max_attempts` counts the first attempt, so a policy of 1 is
/// equivalent to no retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay: Duration::from_secs(60),
        }
    }

    /// Delay to sleep before attempt number `next_attempt` (1-indexed), or
    /// `None` when the policy is exhausted.
    ///
    /// `delay_before(1)` is always `Some(ZERO)`: the first attempt never
    /// waits.
    pub fn delay_before(&self, next_attempt: u32) -> Option<Duration> {
        if next_attempt == 0 || next_attempt > self.max_attempts {
            return None;
        }
        if next_attempt == 1 {
            return Some(Duration::ZERO);
        }
        let doublings = next_attempt.saturating_sub(2).min(30);
        let delay = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(doublings));
        Some(delay.min(self.max_delay))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}
