//! Retry controller (exponential backoff with jitter)
//!
//! Wraps a single provider call. Only transient errors are retried; a
//! permanent error or the last failed attempt is returned to the caller
//! unchanged.

use crate::context::CallContext;
use crate::error::{CloudError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Retry configuration for provider operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first call included
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,

    /// Randomize each delay within `[delay / 2, delay]`
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Disable jitter, mostly useful for deterministic schedules
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Backoff delay before retry number `attempt + 1` (without jitter)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Longest total time spent sleeping between attempts
    pub fn max_total_delay(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.delay_for_attempt(attempt))
            .sum()
    }

    fn sleep_for(&self, attempt: u32, err: &CloudError) -> Duration {
        let mut delay = self.delay_for_attempt(attempt);
        if let Some(retry_after) = err.retry_after() {
            delay = delay.max(retry_after).min(self.max_delay);
        }
        if self.jitter { jittered(delay) } else { delay }
    }
}

fn jittered(delay: Duration) -> Duration {
    let millis = delay.as_millis() as u64;
    if millis < 2 {
        return delay;
    }
    Duration::from_millis(rand::thread_rng().gen_range(millis / 2..=millis))
}

/// Run `call`, retrying transient failures according to `config`
///
/// Retrying stops early when the next sleep would cross the deadline of
/// `ctx`, or when `ctx` is cancelled.
pub async fn retry<T, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    ctx: &CallContext,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let err = match call().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(operation, attempt, "Provider call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_transient() {
            tracing::debug!(operation, attempt, error = %err, "Permanent provider error");
            return Err(err);
        }

        if attempt >= max_attempts {
            tracing::warn!(
                operation,
                attempts = attempt,
                error = %err,
                "Giving up after transient provider errors"
            );
            return Err(err);
        }

        let delay = config.sleep_for(attempt - 1, &err);
        if Instant::now() + delay >= ctx.deadline() {
            tracing::warn!(
                operation,
                attempt,
                error = %err,
                "No time left for another attempt"
            );
            return Err(err);
        }

        tracing::warn!(
            operation,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Transient provider error, retrying"
        );

        tokio::select! {
            _ = ctx.cancel_token().cancelled() => {
                return Err(CloudError::Cancelled(format!("{} was cancelled", operation)));
            }
            _ = sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ctx() -> CallContext {
        CallContext::with_timeout(Duration::from_secs(600))
    }

    #[test]
    fn test_delay_calculation() {
        let config = RetryConfig {
            max_attempts: 6,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
            backoff_multiplier: 2.0,
            jitter: false,
        };

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(3000)); // capped
        assert_eq!(config.max_total_delay(), Duration::from_millis(9500));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        for _ in 0..100 {
            let d = jittered(Duration::from_millis(1000));
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_bounded() {
        let config = RetryConfig::default().without_jitter();
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let counter = Arc::clone(&calls);
        let result: Result<()> = retry(&config, "create", &ctx(), || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(CloudError::from_status(503, "unavailable")) }
        })
        .await;

        assert!(matches!(result, Err(CloudError::Unavailable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let elapsed = start.elapsed();
        assert!(elapsed >= config.max_total_delay());
        assert!(elapsed < config.max_total_delay() + Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_short_circuits() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<()> = retry(&RetryConfig::default(), "create", &ctx(), || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(CloudError::InvalidRequest("unknown image".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(CloudError::InvalidRequest(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = retry(&RetryConfig::default(), "get", &ctx(), || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(CloudError::Timeout("read timed out".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_is_honoured() {
        let config = RetryConfig::default().without_jitter();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let start = Instant::now();

        let result = retry(&config, "list", &ctx(), || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(CloudError::RateLimited {
                        message: "rate_limit_exceeded".to_string(),
                        retry_after: Some(Duration::from_secs(5)),
                    })
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_context_deadline() {
        let config = RetryConfig {
            max_attempts: 10,
            ..RetryConfig::default().without_jitter()
        };
        let short = CallContext::with_timeout(Duration::from_millis(1200));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<()> = retry(&config, "get", &short, || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(CloudError::Connection("reset".to_string())) }
        })
        .await;

        assert!(result.is_err());
        // 500ms + 1000ms would cross the 1200ms deadline
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
