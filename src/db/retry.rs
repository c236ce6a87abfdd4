//! Retry handler (C10): wraps a nullary async operation with bounded
//! exponential backoff, grounded in `multi_db/error/retry.py` (backoff
//! formula and retryable-set shape — generalized here to an async
//! closure instead of a decorator).

use crate::error::DbError;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

/// Bounds a `RetryHandler`'s backoff schedule.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
        }
    }
}

/// Retries a fallible async operation against a closed set of retryable
/// error variants (`DbError::Connection` by default, spec.md §4.10).
///
/// Total attempts made equal `max_retries + 1`: one initial attempt plus
/// `max_retries` retries, resolving the loop-bound ambiguity in the
/// original's `while attempt <= max_retries` combined with its
/// `should_retry` refusing once `attempt >= max_retries`.
pub struct RetryHandler {
    config: RetryConfig,
    retryable: HashSet<&'static str>,
}

impl RetryHandler {
    pub fn new(config: RetryConfig) -> Self {
        let mut retryable = HashSet::new();
        retryable.insert("Connection");
        Self { config, retryable }
    }

    /// Register an additional variant name (see `DbError::variant_name`)
    /// as retryable, beyond the `Connection` default.
    pub fn retry_on(mut self, variant_name: &'static str) -> Self {
        self.retryable.insert(variant_name);
        self
    }

    fn should_retry(&self, err: &DbError, attempt: u32) -> bool {
        attempt < self.config.max_retries && self.retryable.contains(err.variant_name())
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.config.initial_delay.as_secs_f64() * self.config.backoff_factor.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.config.max_delay.as_secs_f64()))
    }

    /// Run `op`, retrying on retryable failures until it succeeds or the
    /// attempt budget (`max_retries + 1` calls total) is exhausted. The
    /// final attempt's error is the one returned on exhaustion.
    pub async fn run<F, Fut, T>(&self, mut op: F) -> Result<T, DbError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DbError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if self.should_retry(&err, attempt) {
                        tokio::time::sleep(self.delay_for(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }
}

impl Default for RetryHandler {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_factor: 2.0,
        }
    }

    #[tokio::test]
    async fn succeeds_after_two_connection_failures_without_surfacing_them() {
        let handler = RetryHandler::new(fast_config());
        let calls = AtomicU32::new(0);
        let result = handler
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(DbError::connection("down", "retry"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn total_attempts_is_max_retries_plus_one() {
        let handler = RetryHandler::new(fast_config());
        let calls = AtomicU32::new(0);
        let result: Result<(), DbError> = handler
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(DbError::connection("down", "retry")) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn non_retryable_error_fails_on_first_attempt() {
        let handler = RetryHandler::new(fast_config());
        let calls = AtomicU32::new(0);
        let result: Result<(), DbError> = handler
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(DbError::permission("c1", "users", "DELETE", "no rule")) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn custom_retryable_variant_is_honored() {
        let handler = RetryHandler::new(fast_config()).retry_on("Transaction");
        let calls = AtomicU32::new(0);
        let result = handler
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(DbError::transaction("deadlock"))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn delay_grows_exponentially_and_caps_at_max() {
        let handler = RetryHandler::new(RetryConfig {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
        });
        assert_eq!(handler.delay_for(0), Duration::from_millis(100));
        assert_eq!(handler.delay_for(1), Duration::from_millis(200));
        assert_eq!(handler.delay_for(2), Duration::from_millis(400));
        assert_eq!(handler.delay_for(10), Duration::from_secs(1));
    }
}
