//! Bounded retry with exponential backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{error, info};

use benchguard_common::RetryConfig;

/// Exponential delay schedule: `base * multiplier^attempt`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Backoff {
    base: Duration,
    multiplier: f64,
}

impl Backoff {
    pub fn new(base: Duration, multiplier: f64) -> Self {
        Self { base, multiplier }
    }

    /// Doubling schedule.
    pub fn exponential(base: Duration) -> Self {
        Self::new(base, 2.0)
    }

    /// Delay associated with a 0-indexed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(0.0).powi(exponent);
        Duration::try_from_secs_f64(self.base.as_secs_f64() * factor).unwrap_or(Duration::MAX)
    }
}

/// Runs fallible operations with bounded retries.
#[derive(Clone, Debug)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Calls `op` until it succeeds or the retry budget is spent.
    ///
    /// Retry `n` (0-indexed) sleeps `base_delay * 2^n` first. The last error is
    /// returned as-is.
    pub async fn execute<T, E, F, Fut>(&self, name: &str, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.execute_observed(name, op, |_, _| {}).await
    }

    /// Like [`RetryExecutor::execute`], calling `on_retry(attempt, &error)`
    /// before each backoff sleep.
    pub async fn execute_observed<T, E, F, Fut, R>(
        &self,
        name: &str,
        mut op: F,
        mut on_retry: R,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        R: FnMut(u32, &E),
    {
        if !self.config.enabled || self.config.max_retries == 0 {
            return op().await;
        }

        let backoff = Backoff::exponential(self.config.base_delay());
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.config.max_retries => {
                    let delay = backoff.delay(attempt);
                    info!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        name,
                        attempt + 1,
                        self.config.max_retries + 1,
                        err,
                        delay
                    );
                    on_retry(attempt, &err);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    error!("{} failed after {} attempts: {}", name, attempt + 1, err);
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            enabled: true,
            max_retries,
            base_delay_ms: 100,
        }
    }

    #[test]
    fn test_backoff_schedule() {
        let backoff = Backoff::new(Duration::from_millis(100), 2.0);
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(800));

        let huge = Backoff::new(Duration::from_secs(1), 10.0);
        assert_eq!(huge.delay(400), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::new(config(3));
        let started = tokio::time::Instant::now();

        let result: Result<u32, String> = executor
            .execute("read", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 { Err(format!("glitch {n}")) } else { Ok(n) }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms + 200ms of backoff
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_last_error_unchanged() {
        let calls = AtomicU32::new(0);
        let retries = AtomicU32::new(0);
        let executor = RetryExecutor::new(config(2));

        let result: Result<(), String> = executor
            .execute_observed(
                "read",
                || async {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    Err(format!("failure {n}"))
                },
                |_, _| {
                    retries.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await;

        assert_eq!(result, Err("failure 2".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_is_single_call() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::new(RetryConfig {
            enabled: false,
            ..config(5)
        });
        let started = tokio::time::Instant::now();

        let result: Result<(), &str> = executor
            .execute("read", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("nope")
            })
            .await;

        assert_eq!(result, Err("nope"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_zero_retries_is_single_call() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::new(config(0));

        let _: Result<(), &str> = executor
            .execute("read", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("nope")
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
