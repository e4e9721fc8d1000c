//! Backoff for re-running failed work.
//!
//! The worker host re-runs a failed install a bounded number of times
//! instead of giving up after the first unreachable asset.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

/// How many times to attempt an operation and how long to wait in between.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Wait before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single wait.
    pub max_delay: Duration,
    /// Each wait is the previous one times this factor.
    pub factor: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            factor: 2,
        }
    }
}

impl RetryConfig {
    /// A single attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// `max_attempts` attempts back to back.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            factor: 1,
        }
    }

    /// Wait before `attempt` (1-based). The first attempt never waits.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let growth = self.factor.saturating_pow(attempt - 2);
        self.initial_delay
            .saturating_mul(growth)
            .min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, `should_retry` rejects its error, or
/// the attempts in `config` run out. The last error is returned.
pub async fn retry_with_backoff_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let error = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Succeeded after retrying");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if attempt >= max_attempts || !should_retry(&error) {
            return Err(error);
        }
        attempt += 1;
        let delay = config.delay_for_attempt(attempt);
        warn!(attempt, max_attempts, ?delay, error = %error, "Attempt failed, retrying");
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_presets() {
        assert_eq!(RetryConfig::default().max_attempts, 3);
        assert_eq!(RetryConfig::none().max_attempts, 1);
        assert_eq!(RetryConfig::immediate(4).delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            factor: 2,
            ..Default::default()
        };

        assert_eq!(config.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(350));
        assert_eq!(config.delay_for_attempt(40), Duration::from_millis(350));
    }

    async fn run(config: RetryConfig, succeed_on: u32, retryable: bool) -> (Result<u32, String>, u32) {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result = retry_with_backoff_if(
            &config,
            || {
                let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if attempt >= succeed_on {
                        Ok(attempt)
                    } else {
                        Err(format!("attempt {attempt} failed"))
                    }
                }
            },
            |_| retryable,
        )
        .await;

        (result, attempts.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_first_attempt_succeeds() {
        assert_eq!(run(RetryConfig::immediate(3), 1, true).await, (Ok(1), 1));
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        assert_eq!(run(RetryConfig::immediate(3), 3, true).await, (Ok(3), 3));
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let (result, attempts) = run(RetryConfig::immediate(2), 5, true).await;
        assert_eq!(result, Err("attempt 2 failed".to_string()));
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_stops_on_rejected_error() {
        let (result, attempts) = run(RetryConfig::immediate(5), 5, false).await;
        assert_eq!(result, Err("attempt 1 failed".to_string()));
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        assert_eq!(run(RetryConfig::immediate(0), 1, true).await, (Ok(1), 1));
    }
}
