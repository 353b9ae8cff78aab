//! Bounded exponential backoff for transient provider failures.

use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ProviderError;

use super::ProviderResult;

/// Retry policy for provider operations.
///
/// Only [`ProviderError::Transient`] failures are retried; everything else
/// propagates immediately. When the attempt budget is exhausted the last
/// transient error escalates to [`ProviderError::RetriesExhausted`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Initial delay between attempts.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Overrides the attempt budget.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Overrides the initial delay.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Runs an operation under this policy.
    ///
    /// # Errors
    ///
    /// Returns the operation's error unchanged if it is not transient, or
    /// [`ProviderError::RetriesExhausted`] once the budget is spent.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut f: F) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let mut delay = self.initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match f().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{operation} succeeded on attempt {attempt}");
                    }
                    return Ok(value);
                }
                Err(ProviderError::Transient {
                    message,
                    retry_after_secs,
                }) => {
                    if attempt >= self.max_attempts {
                        return Err(ProviderError::RetriesExhausted {
                            operation: operation.to_string(),
                            attempts: attempt,
                            message,
                        });
                    }

                    // Honor the provider's suggested delay when present.
                    let wait = retry_after_secs.map_or(delay, Duration::from_secs);

                    warn!(
                        "{operation} hit transient failure ({message}), \
                         retrying in {}ms (attempt {attempt}/{})",
                        wait.as_millis(),
                        self.max_attempts
                    );
                    tokio::time::sleep(wait).await;

                    delay = delay.mul_f64(self.backoff_multiplier).min(self.max_delay);
                }
                Err(other) => return Err(other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(max_attempts)
            .with_initial_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(3)
            .run("create cluster", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, ProviderError>(42) }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(3)
            .run("create cluster", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ProviderError::transient("throttled"))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_escalates() {
        let calls = AtomicU32::new(0);
        let result: ProviderResult<()> = fast_policy(3)
            .run("update service", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::transient("timeout")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result.unwrap_err() {
            ProviderError::RetriesExhausted {
                operation,
                attempts,
                ..
            } => {
                assert_eq!(operation, "update service");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected exhaustion, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_non_transient_not_retried() {
        let calls = AtomicU32::new(0);
        let result: ProviderResult<()> = fast_policy(3)
            .run("create role", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::failed("access denied")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result.unwrap_err(), ProviderError::Failed { .. }));
    }
}
