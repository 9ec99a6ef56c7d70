//! Retry with exponential backoff.
//!
//! Provider calls and background jobs share one policy shape. Only errors
//! for which [`AppError::is_retryable`] holds are retried; once the attempt
//! budget is spent the last cause is folded into a single
//! [`AppError::RetriesExhausted`].

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{AppError, Result};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Total attempts including the first one.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::provider()
    }
}

impl RetryPolicy {
    /// Outbound embedding / chat / TTS calls: 1s initial, x2, 10s cap, 3 retries.
    pub fn provider() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_factor: 2.0,
            max_attempts: 4,
        }
    }

    /// Background job attempts with the same backoff curve.
    pub fn job(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::provider()
        }
    }

    /// Zero-delay policy, mostly useful in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 1.0,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Delay applied after the given failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let initial_ms = self.initial_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let exp = attempt.min(31) as i32;
        let delay_ms = (initial_ms * self.backoff_factor.max(1.0).powi(exp)).min(max_ms);
        Duration::from_millis(delay_ms.max(0.0) as u64)
    }
}

/// Run `operation` until it succeeds, fails permanently, or the policy is spent.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry_if(policy, AppError::is_retryable, operation).await
}

/// Like [`with_retry`] but with a caller-supplied retryability test.
pub async fn with_retry_if<T, F, Fut, P>(
    policy: &RetryPolicy,
    retryable: P,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&AppError) -> bool,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(total_attempts = attempt + 1, "Operation succeeded after retries");
                }
                return Ok(value);
            }
            Err(e) if !retryable(&e) => return Err(e),
            Err(e) => {
                attempt += 1;

                if attempt >= policy.max_attempts {
                    warn!(
                        attempt,
                        max_attempts = policy.max_attempts,
                        error = %e,
                        "Operation failed after all retry attempts"
                    );
                    return Err(AppError::RetriesExhausted {
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }

                let delay = policy.delay_for_attempt(attempt - 1);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying operation after failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_provider_delays_double_then_cap() {
        let policy = RetryPolicy::provider();
        let delays: Vec<u64> = (0..6)
            .map(|a| policy.delay_for_attempt(a).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10_000, 10_000]);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = with_retry(&RetryPolicy::immediate(4), move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(AppError::provider("test", "flaky"))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempts_and_last_cause() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = with_retry(&RetryPolicy::immediate(3), move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Err(AppError::provider("tts", format!("failure {}", n)))
        })
        .await;
        match result {
            Err(AppError::RetriesExhausted { attempts, last_error }) => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("failure 2"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_validation_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = with_retry(&RetryPolicy::immediate(5), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Validation("bad url".into()))
        })
        .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
