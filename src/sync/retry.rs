//! Retrying, rate-limited execution of provider calls
//!
//! [`RetryingFetcher`] classifies each failure as transient or permanent,
//! retries transient ones with linear backoff, and passes through the shared
//! [`RateLimiter`] before every attempt, including the first.

use crate::config::RetryConfig;
use crate::error::{FetchError, RetryableError};
use crate::sync::rate_limiter::RateLimiter;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Wraps provider calls with classification, backoff and rate limiting
#[derive(Debug, Clone)]
pub struct RetryingFetcher {
    config: RetryConfig,
    limiter: Arc<RateLimiter>,
}

impl RetryingFetcher {
    /// Create a fetcher that admits calls through `limiter`
    pub fn new(config: RetryConfig, limiter: Arc<RateLimiter>) -> Self {
        Self { config, limiter }
    }

    /// Execute `operation`, retrying transient failures
    ///
    /// Permanent errors are returned as-is after the first failing attempt.
    /// When every attempt fails transiently the last error is returned wrapped
    /// in [`FetchError::RetriesExhausted`] with the number of attempts made.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T, FetchError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1u32;

        loop {
            self.limiter.acquire().await;

            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => {
                    debug!(attempt, error = %err, "Permanent provider error");
                    return Err(err);
                }
                Err(err) if attempt >= max_attempts => {
                    warn!(
                        attempts = attempt,
                        max_attempts,
                        error = %err,
                        "Max attempts exhausted"
                    );
                    return Err(FetchError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                Err(err) => {
                    let backoff = self.calculate_backoff(attempt);
                    debug!(
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Retrying after transient error"
                    );

                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Backoff to wait after failed attempt number `attempt` (1-based)
    ///
    /// Linear: `base_delay * attempt`, capped at `max_delay`, optionally
    /// scaled to 50-100% when jitter is enabled.
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let linear = self.config.base_delay_ms.saturating_mul(attempt as u64);
        let capped = linear.min(self.config.max_delay_ms) as f64;

        let delay_ms = if self.config.jitter {
            capped * rand::thread_rng().gen_range(0.5..1.0)
        } else {
            capped
        };

        Duration::from_secs_f64(delay_ms / 1000.0)
    }

    /// Get the retry configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Limiter shared with every other fetcher in the process
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn fetcher(max_attempts: u32, base_delay_ms: u64, min_interval_ms: u64) -> RetryingFetcher {
        RetryingFetcher::new(
            RetryConfig {
                max_attempts,
                base_delay_ms,
                max_delay_ms: 60_000,
                jitter: false,
            },
            Arc::new(RateLimiter::new(Duration::from_millis(min_interval_ms))),
        )
    }

    // Test 1: Success on first attempt returns immediately
    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let fetcher = fetcher(3, 0, 0);
        let call_count = Arc::new(AtomicU32::new(0));
        let call_count_clone = call_count.clone();

        let result = fetcher
            .call(|| {
                let count = call_count_clone.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok("success")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    // Test 2: Two transient failures then success takes three attempts
    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_transient_failures() {
        let fetcher = fetcher(3, 100, 10);
        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = attempt_count.clone();

        let start = Instant::now();
        let result = fetcher
            .call(|| {
                let count = attempt_count_clone.clone();
                async move {
                    let current = count.fetch_add(1, Ordering::SeqCst);
                    if current < 2 {
                        Err(FetchError::Timeout)
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
        // 100ms after attempt 1, 200ms after attempt 2
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    // Test 3: Exhaustion wraps the last error with the attempt count
    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let fetcher = fetcher(3, 10, 0);
        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = attempt_count.clone();

        let result: Result<(), FetchError> = fetcher
            .call(|| {
                let count = attempt_count_clone.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Err(FetchError::Connection("refused".to_string()))
                }
            })
            .await;

        assert_eq!(
            result.unwrap_err(),
            FetchError::RetriesExhausted {
                attempts: 3,
                last: Box::new(FetchError::Connection("refused".to_string())),
            }
        );
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    // Test 4: Permanent error returns immediately and unwrapped
    #[tokio::test]
    async fn test_permanent_error_returns_immediately() {
        let fetcher = fetcher(5, 0, 0);
        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = attempt_count.clone();

        let result: Result<(), FetchError> = fetcher
            .call(|| {
                let count = attempt_count_clone.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Err(FetchError::NotFound)
                }
            })
            .await;

        assert_eq!(result.unwrap_err(), FetchError::NotFound);
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    }

    // Test 5: Linear backoff calculation without jitter
    #[test]
    fn test_linear_backoff_calculation() {
        let fetcher = fetcher(5, 5000, 0);

        assert_eq!(fetcher.calculate_backoff(1), Duration::from_secs(5));
        assert_eq!(fetcher.calculate_backoff(2), Duration::from_secs(10));
        assert_eq!(fetcher.calculate_backoff(3), Duration::from_secs(15));
    }

    // Test 6: Backoff is capped at max_delay
    #[test]
    fn test_backoff_capped_at_max() {
        let fetcher = RetryingFetcher::new(
            RetryConfig {
                max_attempts: 10,
                base_delay_ms: 10_000,
                max_delay_ms: 25_000,
                jitter: false,
            },
            Arc::new(RateLimiter::new(Duration::ZERO)),
        );

        assert_eq!(fetcher.calculate_backoff(2), Duration::from_secs(20));
        assert_eq!(fetcher.calculate_backoff(3), Duration::from_secs(25));
        assert_eq!(fetcher.calculate_backoff(9), Duration::from_secs(25));
    }

    // Test 7: Jitter keeps backoff within 50-100%
    #[test]
    fn test_jitter_within_range() {
        let fetcher = RetryingFetcher::new(
            RetryConfig {
                max_attempts: 3,
                base_delay_ms: 10_000,
                max_delay_ms: 60_000,
                jitter: true,
            },
            Arc::new(RateLimiter::new(Duration::ZERO)),
        );

        for _ in 0..100 {
            let backoff = fetcher.calculate_backoff(1);
            assert!(
                backoff >= Duration::from_secs(5) && backoff <= Duration::from_secs(10),
                "Backoff {:?} should be between 5-10 seconds",
                backoff
            );
        }
    }

    // Test 8: Every attempt goes through the limiter
    #[tokio::test(start_paused = true)]
    async fn test_each_attempt_is_rate_limited() {
        // Backoff of zero leaves the limiter as the only source of delay
        let fetcher = fetcher(3, 0, 500);
        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = attempt_count.clone();

        let start = Instant::now();
        let _: Result<(), FetchError> = fetcher
            .call(|| {
                let count = attempt_count_clone.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Err(FetchError::RateLimited(1))
                }
            })
            .await;

        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    // Test 9: A single attempt still reports exhaustion for transient errors
    #[tokio::test]
    async fn test_single_attempt_budget() {
        let fetcher = fetcher(1, 0, 0);

        let result: Result<(), FetchError> =
            fetcher.call(|| async { Err(FetchError::Timeout) }).await;

        assert!(matches!(
            result,
            Err(FetchError::RetriesExhausted { attempts: 1, .. })
        ));
    }

    // Test 10: Default configuration
    #[test]
    fn test_default_configuration() {
        let fetcher = RetryingFetcher::new(
            RetryConfig::default(),
            Arc::new(RateLimiter::new(Duration::from_secs(1))),
        );
        let config = fetcher.config();

        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay_ms, 5000);
        assert!(!config.jitter);
        assert_eq!(fetcher.limiter().min_interval(), Duration::from_secs(1));
    }
}
