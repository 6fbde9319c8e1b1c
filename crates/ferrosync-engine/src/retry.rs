//! Bounded retry with growing delays
//!
//! [`Backoff`] tracks one operation's attempt budget. Callers run the operation in their
//! own loop and ask the backoff whether, and after how long, to try again; this keeps the
//! operation free to borrow the transport mutably on every attempt.

use ferrosync_types::{Error, RetryConfig};
use std::time::Duration;

/// Attempt counter for one retried operation
#[derive(Debug, Clone)]
pub struct Backoff<'a> {
    policy: &'a RetryConfig,
    attempt: u32,
}

impl<'a> Backoff<'a> {
    /// Start at attempt 1
    pub fn new(policy: &'a RetryConfig) -> Self {
        Self { policy, attempt: 1 }
    }

    /// Current attempt, 1-based
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Total attempts allowed
    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts.max(1)
    }

    /// Delay before the next attempt, or `None` when the error is permanent or the budget
    /// is spent
    pub fn retry_after(&mut self, error: &Error) -> Option<Duration> {
        if !error.should_retry() || self.attempt >= self.max_attempts() {
            return None;
        }
        let delay = self.policy.delay_after_attempt(self.attempt);
        self.attempt += 1;
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_budget_and_growing_delays() {
        let policy = RetryConfig {
            max_attempts: 4,
            initial_delay_ms: 100,
            max_delay_ms: 250,
            backoff_multiplier: 2.0,
        };
        let error = Error::transfer("a.csv", "timeout");
        let mut backoff = Backoff::new(&policy);

        assert_eq!(backoff.retry_after(&error), Some(Duration::from_millis(100)));
        assert_eq!(backoff.retry_after(&error), Some(Duration::from_millis(200)));
        assert_eq!(backoff.retry_after(&error), Some(Duration::from_millis(250)));
        assert_eq!(backoff.attempt(), 4);
        assert_eq!(backoff.retry_after(&error), None);
    }

    #[test]
    fn test_permanent_errors_are_not_retried() {
        let policy = RetryConfig::immediate(3);
        let mut backoff = Backoff::new(&policy);
        let error = Error::PermissionDenied {
            path: PathBuf::from("/in/a.csv"),
        };
        assert_eq!(backoff.retry_after(&error), None);
        assert_eq!(backoff.attempt(), 1);
    }

    #[test]
    fn test_zero_budget_still_allows_one_attempt() {
        let policy = RetryConfig::immediate(0);
        let backoff = Backoff::new(&policy);
        assert_eq!(backoff.max_attempts(), 1);
    }
}
