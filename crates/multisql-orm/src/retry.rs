//! Statement level retry on transient busy/locked failures.
//!
//! Distinct from the fixed-delay retry of
//! [`ConnectionManager::acquire`](crate::connection::ConnectionManager::acquire):
//! this one wraps statement execution and backs off linearly.

use std::future::Future;
use std::time::Duration;

use futures::future::LocalBoxFuture;
use sqlx::mysql::MySqlDatabaseError;
use tracing::warn;

use crate::error::OrmError;

/// SQLITE_BUSY and SQLITE_LOCKED primary result codes.
const SQLITE_BUSY_CODES: [i64; 2] = [5, 6];
/// ER_LOCK_WAIT_TIMEOUT and ER_LOCK_DEADLOCK.
const MYSQL_LOCK_ERRORS: [u16; 2] = [1205, 1213];

/// Classifies an error as a transient busy/locked condition.
///
/// Implementations must be pure.
pub trait BusyOrLocked {
    /// Whether retrying may succeed.
    fn is_busy_or_locked(&self) -> bool;
}

impl BusyOrLocked for sqlx::Error {
    fn is_busy_or_locked(&self) -> bool {
        let Self::Database(db) = self else {
            return false;
        };
        if let Some(mysql) = db.try_downcast_ref::<MySqlDatabaseError>() {
            return MYSQL_LOCK_ERRORS.contains(&mysql.number());
        }
        let by_code = db
            .code()
            .and_then(|code| code.parse::<i64>().ok())
            .is_some_and(|code| SQLITE_BUSY_CODES.contains(&(code & 0xff)));
        by_code || db.message().to_ascii_lowercase().contains("database is locked")
    }
}

impl BusyOrLocked for OrmError {
    fn is_busy_or_locked(&self) -> bool {
        match self {
            Self::Database(e) | Self::ConnectionFailure { source: e, .. } => e.is_busy_or_locked(),
            Self::Statement { source, .. } | Self::ConstraintViolation { source, .. } => {
                source.is_busy_or_locked()
            }
            _ => false,
        }
    }
}

/// Retry settings for one logical operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_retries: u32,
    /// Delay unit; attempt `n` waits `base_delay * n` before running again.
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
    /// Policy with explicit settings.
    #[must_use]
    pub const fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    const fn attempts(&self) -> u32 {
        if self.max_retries == 0 {
            1
        } else {
            self.max_retries
        }
    }

    /// Whether a failure after `attempt` (1-based) runs should be retried.
    pub fn should_retry<E: BusyOrLocked>(&self, attempt: u32, error: &E) -> bool {
        attempt < self.attempts() && error.is_busy_or_locked()
    }

    /// Delay before the run following `attempt` (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Runs `operation` until it succeeds, fails with a non-transient
    /// error, or the attempts run out. `on_retry` receives the number of
    /// the failed attempt before the backoff sleep.
    ///
    /// # Errors
    ///
    /// Returns the last error unchanged.
    pub async fn execute_with_retry<T, E, F, Fut, R>(&self, mut operation: F, mut on_retry: R) -> Result<T, E>
    where
        E: BusyOrLocked + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnMut(u32),
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if self.should_retry(attempt, &error) => {
                    warn!(attempt, error = %error, "busy or locked, retrying");
                    on_retry(attempt);
                    tokio::time::sleep(self.delay(attempt)).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Like [`Self::execute_with_retry`] for operations that need mutable
    /// access to shared state, typically a connection manager that
    /// `on_retry` resets.
    ///
    /// # Errors
    ///
    /// Returns the last error unchanged.
    pub async fn execute_with_state<S, T, E, F, R>(
        &self,
        state: &mut S,
        mut operation: F,
        mut on_retry: R,
    ) -> Result<T, E>
    where
        E: BusyOrLocked + std::fmt::Display,
        F: for<'s> FnMut(&'s mut S) -> LocalBoxFuture<'s, Result<T, E>>,
        R: for<'s> FnMut(&'s mut S, u32) -> LocalBoxFuture<'s, ()>,
    {
        let mut attempt = 1;
        loop {
            match operation(state).await {
                Ok(value) => return Ok(value),
                Err(error) if self.should_retry(attempt, &error) => {
                    warn!(attempt, error = %error, "busy or locked, retrying");
                    on_retry(state, attempt).await;
                    tokio::time::sleep(self.delay(attempt)).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Wraps a still busy error into [`OrmError::BusyOrLocked`] once the
    /// attempts are exhausted.
    #[must_use]
    pub fn exhausted(&self, error: OrmError) -> OrmError {
        if error.is_busy_or_locked() {
            OrmError::BusyOrLocked {
                attempts: self.attempts(),
                source: Box::new(error),
            }
        } else {
            error
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[derive(Debug)]
    struct Failure {
        busy: bool,
    }

    impl std::fmt::Display for Failure {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "busy={}", self.busy)
        }
    }

    impl BusyOrLocked for Failure {
        fn is_busy_or_locked(&self) -> bool {
            self.busy
        }
    }

    fn quick() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let calls = Cell::new(0);
        let mut retries = Vec::new();

        let result = quick()
            .execute_with_retry(
                || {
                    calls.set(calls.get() + 1);
                    let n = calls.get();
                    async move {
                        if n < 3 {
                            Err(Failure { busy: true })
                        } else {
                            Ok(n)
                        }
                    }
                },
                |attempt| retries.push(attempt),
            )
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(retries, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let result: Result<(), Failure> = quick()
            .execute_with_retry(
                || {
                    calls.set(calls.get() + 1);
                    async { Err(Failure { busy: true }) }
                },
                |_| {},
            )
            .await;

        assert!(result.unwrap_err().busy);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), Failure> = quick()
            .execute_with_retry(
                || {
                    calls.set(calls.get() + 1);
                    async { Err(Failure { busy: false }) }
                },
                |_| panic!("must not retry"),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_state_is_reset_between_attempts() {
        #[derive(Default)]
        struct Pool {
            runs: u32,
            resets: u32,
        }

        let mut pool = Pool::default();
        let result = quick()
            .execute_with_state(
                &mut pool,
                |pool| {
                    Box::pin(async move {
                        pool.runs += 1;
                        if pool.resets < 2 {
                            Err(Failure { busy: true })
                        } else {
                            Ok(pool.runs)
                        }
                    })
                },
                |pool, _| {
                    Box::pin(async move {
                        pool.resets += 1;
                    })
                },
            )
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(pool.resets, 2);
    }

    #[test]
    fn test_delay_grows_linearly() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_millis(500));
        assert_eq!(policy.delay(2), Duration::from_millis(1000));
    }

    #[test]
    fn test_exhausted_wraps_only_busy_errors() {
        let policy = RetryPolicy::default();
        let err = policy.exhausted(OrmError::Configuration(String::from("x")));
        assert!(matches!(err, OrmError::Configuration(_)));
        assert!(!OrmError::Database(sqlx::Error::RowNotFound).is_busy_or_locked());
    }
}
