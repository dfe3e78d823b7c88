//! Bounded retry with exponential backoff and jitter.

use std::time::Duration;

use futures::future::BoxFuture;
use rand::Rng;
use sqlx::error::ErrorKind;
use tracing::{error, warn};

/// One try of a retried operation. Gets fresh access to its target each time.
pub type Attempt<S, T> = for<'c> fn(&'c mut S) -> BoxFuture<'c, Result<T, sqlx::Error>>;

/// Retry policy for database statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `base * 2^n` plus up to `base` of jitter.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter = if self.base_delay.is_zero() {
            Duration::ZERO
        } else {
            self.base_delay.mul_f64(rand::rng().random_range(0.0..1.0))
        };
        self.backoff(attempt) + jitter
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .checked_mul(2u32.saturating_pow(attempt))
            .unwrap_or(Duration::MAX)
    }

    /// Run `attempt_once` against `target` until it succeeds, fails with a
    /// non-transient error, or the attempts run out. The last error is
    /// returned unchanged.
    pub async fn run<S: ?Sized, T>(
        &self,
        target: &mut S,
        attempt_once: Attempt<S, T>,
    ) -> Result<T, sqlx::Error> {
        let mut attempt = 0;
        loop {
            match attempt_once(&mut *target).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    self.retry_or_fail(attempt, err).await?;
                    attempt += 1;
                }
            }
        }
    }

    /// Decide what happens after failed attempt `attempt` (0-based): sleep
    /// and return `Ok` to try again, or hand the error back.
    pub async fn retry_or_fail(&self, attempt: u32, err: sqlx::Error) -> Result<(), sqlx::Error> {
        let attempts = self.max_retries.max(1);
        if !is_transient(&err) {
            return Err(err);
        }
        if attempt + 1 >= attempts {
            error!(attempts, error = %err, "database operation failed after retries");
            return Err(err);
        }
        let delay = self.delay_for(attempt);
        warn!(
            attempt = attempt + 1,
            max_retries = attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "transient database error, retrying"
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

/// Whether `err` is worth retrying: driver-level failures such as a busy or
/// locked database, I/O errors and pool timeouts. Constraint violations and
/// programming errors are not.
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => matches!(db.kind(), ErrorKind::Other),
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn io_error() -> sqlx::Error {
        sqlx::Error::Io(std::io::Error::other("database is locked"))
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
        }
    }

    /// Fails transiently on the first two calls.
    fn flaky(calls: &mut u32) -> BoxFuture<'_, Result<u32, sqlx::Error>> {
        *calls += 1;
        let call = *calls;
        async move { if call <= 2 { Err(io_error()) } else { Ok(7) } }.boxed()
    }

    fn always_locked(calls: &mut u32) -> BoxFuture<'_, Result<u32, sqlx::Error>> {
        *calls += 1;
        async { Err(io_error()) }.boxed()
    }

    fn missing_row(calls: &mut u32) -> BoxFuture<'_, Result<u32, sqlx::Error>> {
        *calls += 1;
        async { Err(sqlx::Error::RowNotFound) }.boxed()
    }

    #[test]
    fn delay_grows_exponentially_with_bounded_jitter() {
        let policy = policy(5);
        for attempt in 0..4 {
            let floor = Duration::from_millis(100 * 2u64.pow(attempt));
            let delay = policy.delay_for(attempt);
            assert!(delay >= floor, "attempt {attempt}: {delay:?} < {floor:?}");
            assert!(delay < floor + Duration::from_millis(100));
        }
    }

    #[test]
    fn classification() {
        assert!(is_transient(&io_error()));
        assert!(is_transient(&sqlx::Error::PoolTimedOut));
        assert!(!is_transient(&sqlx::Error::RowNotFound));
        assert!(!is_transient(&sqlx::Error::PoolClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let mut calls = 0;
        let start = tokio::time::Instant::now();
        let result = policy(5).run(&mut calls, flaky).await;
        assert_eq!(result.expect("eventual success"), 7);
        assert_eq!(calls, 3);
        // Exactly two sleeps: 100ms + 200ms plus under 100ms of jitter each.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(500), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let mut calls = 0;
        let start = tokio::time::Instant::now();
        let result = policy(3).run(&mut calls, always_locked).await;
        assert!(matches!(result, Err(sqlx::Error::Io(_))));
        assert_eq!(calls, 3);
        // Two sleeps and none after the final attempt.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(500), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_errors_fail_immediately() {
        let mut calls = 0;
        let start = tokio::time::Instant::now();
        let result = policy(3).run(&mut calls, missing_row).await;
        assert!(matches!(result, Err(sqlx::Error::RowNotFound)));
        assert_eq!(calls, 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
