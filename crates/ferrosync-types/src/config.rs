//! Configuration types shared between the config loader and the engine
//!
//! Durations are carried as milliseconds so they round-trip cleanly through
//! YAML, TOML and environment variable overrides.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry budget for a single operation (connect or single-file transfer)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay
    pub max_delay_ms: u64,
    /// Growth factor applied per attempt
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Create a new retry configuration
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Result<Self, String> {
        let config = Self {
            max_attempts,
            initial_delay_ms: initial_delay.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
            backoff_multiplier,
        };
        config.validate()?;
        Ok(config)
    }

    /// Retry budget with no delay between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    /// Check the invariants of the budget
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("Retry budget must allow at least one attempt".to_string());
        }
        if self.backoff_multiplier < 1.0 {
            return Err("Backoff multiplier must be at least 1.0".to_string());
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err("Initial delay cannot be greater than max delay".to_string());
        }
        Ok(())
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay_ms =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32 - 1);
        let delay_ms = delay_ms.min(self.max_delay_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_per_attempt() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_after_attempt(1), Duration::from_millis(1000));
        assert_eq!(config.delay_after_attempt(2), Duration::from_millis(2000));
        assert_eq!(config.delay_after_attempt(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_delay_is_capped() {
        let config = RetryConfig::new(
            10,
            Duration::from_millis(500),
            Duration::from_secs(2),
            3.0,
        )
        .unwrap();
        assert_eq!(config.delay_after_attempt(8), Duration::from_secs(2));
    }

    #[test]
    fn test_validation() {
        assert!(RetryConfig::new(0, Duration::ZERO, Duration::ZERO, 2.0).is_err());
        assert!(RetryConfig::new(3, Duration::ZERO, Duration::ZERO, 0.5).is_err());
        assert!(RetryConfig::new(3, Duration::from_secs(5), Duration::from_secs(1), 2.0).is_err());
        assert!(RetryConfig::immediate(3).validate().is_ok());
    }
}
