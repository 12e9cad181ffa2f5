//! Capped exponential backoff between fetch attempts.

use std::time::Duration;

use ecoalert_core::config::RetryConfig;
use exponential_backoff::Backoff;

use crate::traits::FetchError;

/// Decides whether a failed fetch is attempted again, and after how long.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    jitter: Option<f32>,
}

impl RetryPolicy {
    /// `max_attempts` counts the first try; values below one are raised to one.
    pub fn new(max_attempts: u32, initial: Duration, max: Duration) -> Self {
        let max_attempts = max_attempts.max(1);
        Self {
            max_attempts,
            initial_delay: initial,
            max_delay: max,
            jitter: None,
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
    }

    pub fn with_jitter(mut self, jitter: f32) -> Self {
        self.jitter = Some(jitter);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the next attempt, or `None` to give up.
    ///
    /// `attempt` is the 1-based number of the attempt that just failed.
    pub fn next_delay(&self, attempt: u32, error: &FetchError) -> Option<Duration> {
        if attempt >= self.max_attempts || !error.is_retryable() {
            return None;
        }
        let mut backoff = Backoff::new(self.max_attempts, self.initial_delay, Some(self.max_delay));
        if let Some(jitter) = self.jitter {
            backoff.set_jitter(jitter);
        }
        let delay = backoff.next(attempt).unwrap_or(self.max_delay);
        Some(delay.min(self.max_delay))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_never_retries() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.next_delay(1, &FetchError::transport("reset")), None);
    }

    #[test]
    fn retries_transient_errors_up_to_cap() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(2));
        let err = FetchError::bad_status(502, "bad gateway");

        let first = policy.next_delay(1, &err).unwrap();
        let second = policy.next_delay(2, &err).unwrap();
        assert!(first <= Duration::from_secs(2));
        assert!(second <= Duration::from_secs(2));
        assert_eq!(policy.next_delay(3, &err), None);
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(2));
        assert_eq!(policy.next_delay(1, &FetchError::malformed("eof")), None);
        assert_eq!(
            policy.next_delay(1, &FetchError::bad_status(404, "not found")),
            None
        );
    }
}
