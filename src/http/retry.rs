//! Retry policies for panel HTTP requests.

use std::time::Duration;

/// Retry policy for one HTTP request.
///
/// Minting a JWT is a POST, so the token provider defaults to
/// [`RetryPolicy::None`] and lets the reconnect scheduler pace retries.
#[derive(Debug, Clone, Default)]
pub enum RetryPolicy {
    #[default]
    None,
    /// Transport failures, 429 and 502/503/504.
    Idempotent,
    Custom(RetryConfig),
}

/// Exponential backoff with optional ±25% jitter.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the initial request.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter: bool,
    /// HTTP status codes that trigger a retry.
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            jitter: true,
            retryable_statuses: vec![502, 503, 504],
        }
    }
}

impl RetryConfig {
    pub fn idempotent() -> Self {
        Self {
            max_retries: 3,
            retryable_statuses: vec![429, 502, 503, 504],
            ..Default::default()
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64
            * self.backoff_factor.powi(attempt.min(i32::MAX as u32) as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);

        let final_ms = if self.jitter {
            let spread = capped * 0.25;
            (capped + (rand::random::<f64>() - 0.5) * 2.0 * spread).max(0.0)
        } else {
            capped
        };

        Duration::from_millis(final_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_does_not_retry() {
        assert!(matches!(RetryPolicy::default(), RetryPolicy::None));
    }

    #[test]
    fn test_idempotent_retries_rate_limits() {
        let config = RetryConfig::idempotent();
        assert_eq!(config.max_retries, 3);
        assert!(config.retryable_statuses.contains(&429));
        assert!(!RetryConfig::default().retryable_statuses.contains(&429));
    }

    #[test]
    fn test_delay_doubles_without_jitter() {
        let config = RetryConfig::default().without_jitter();
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(250));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_a_quarter() {
        let config = RetryConfig::default();
        for _ in 0..50 {
            let ms = config.delay_for_attempt(1).as_millis();
            assert!((375..=625).contains(&ms), "{ms}");
        }
    }
}
