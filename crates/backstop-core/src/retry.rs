//! Retry with exponential backoff.
//!
//! Remote object-store calls and readiness polling go through these helpers.
//! Uploads use a fixed object key, so a retried `put_object` is idempotent.
//!
//! ```rust,ignore
//! use backstop_core::retry::{RetryPolicy, with_retry};
//!
//! let policy = RetryPolicy::remote_upload();
//! let key = with_retry(&policy, || async { remote.put_object(&key, &path).await }).await?;
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::{AdapterError, Error};

/// Backoff schedule for a retried operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Wait before the second attempt.
    pub initial_delay: Duration,
    /// Ceiling for any single wait.
    pub max_delay: Duration,
    /// Growth factor per attempt; clamped to at least 1.
    pub backoff_factor: f64,
    /// Fraction of each wait randomized in both directions.
    pub jitter_percent: f64,
    /// Attempt budget including the first call. `None` retries until success.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter_percent: 0.1,
            max_attempts: Some(3),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(
        initial_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
        jitter_percent: f64,
        max_attempts: Option<u32>,
    ) -> Self {
        Self {
            initial_delay,
            max_delay,
            backoff_factor: backoff_factor.max(1.0),
            jitter_percent: jitter_percent.clamp(0.0, 1.0),
            max_attempts,
        }
    }

    /// Policy for copying artifacts to remote storage: 5 attempts, 500ms initial.
    #[must_use]
    pub fn remote_upload() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter_percent: 0.1,
            max_attempts: Some(5),
        }
    }

    /// Policy for listing and fetching from remote storage: 3 attempts, 250ms initial.
    #[must_use]
    pub fn remote_fetch() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            jitter_percent: 0.1,
            max_attempts: Some(3),
        }
    }

    /// Policy for polling readiness: no backoff growth, bounded by the caller's window.
    #[must_use]
    pub fn readiness(poll: Duration) -> Self {
        Self {
            initial_delay: poll,
            max_delay: poll,
            backoff_factor: 1.0,
            jitter_percent: 0.0,
            max_attempts: None,
        }
    }

    /// Policy that never waits; used by tests and simulations.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 1.0,
            jitter_percent: 0.0,
            max_attempts: Some(max_attempts.max(1)),
        }
    }

    /// Wait after failed attempt `attempt` (0-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let initial_ms = u64::try_from(self.initial_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);

        // Cap exponent to prevent overflow in powi
        let exp = attempt.min(31) as i32;
        let base_ms = (initial_ms as f64) * self.backoff_factor.powi(exp);
        let base_ms = base_ms.min(max_ms as f64);

        let jitter = if self.jitter_percent > 0.0 && base_ms > 0.0 {
            let mut rng = rand::rng();
            let jitter_range = base_ms * self.jitter_percent;
            rng.random_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        let delay_ms = (base_ms + jitter).max(0.0);
        Duration::from_millis(delay_ms as u64)
    }
}

/// Result of [`with_retry_outcome`] plus attempt accounting.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
    /// Wall time across attempts and waits.
    pub elapsed: Duration,
}

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for AdapterError {
    fn is_retryable(&self) -> bool {
        Self::is_retryable(self)
    }
}

impl Retryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Adapter(e) => e.is_retryable(),
            Self::Io(_) | Self::Runtime(_) => true,
            Self::Sqlite(_) => true,
            Self::Selection(_) | Self::Catalog(_) | Self::Config(_) | Self::Json(_) => false,
        }
    }
}

impl Retryable for crate::remote::RemoteError {
    fn is_retryable(&self) -> bool {
        Self::is_retryable(self)
    }
}

/// Run `operation` under `policy`, returning its final result.
///
/// Non-retryable errors are returned immediately.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    E: Display + Retryable,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    with_retry_outcome(policy, operation).await.result
}

/// Like [`with_retry`], but also reports attempts and elapsed time.
pub async fn with_retry_outcome<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    E: Display + Retryable,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let start = std::time::Instant::now();
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(
                        total_attempts = attempt + 1,
                        retries = attempt,
                        "Operation succeeded after retries"
                    );
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt + 1,
                    elapsed: start.elapsed(),
                };
            }
            Err(e) => {
                attempt += 1;

                if !e.is_retryable() {
                    debug!(attempt, error = %e, "Operation failed with non-retryable error");
                    return RetryOutcome {
                        result: Err(e),
                        attempts: attempt,
                        elapsed: start.elapsed(),
                    };
                }

                if let Some(max) = policy.max_attempts {
                    if attempt >= max {
                        warn!(
                            attempt,
                            max_attempts = max,
                            error = %e,
                            "Operation failed after all retry attempts"
                        );
                        return RetryOutcome {
                            result: Err(e),
                            attempts: attempt,
                            elapsed: start.elapsed(),
                        };
                    }
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

/// Poll `check` until it returns `true` or `window` elapses.
///
/// Returns whether the condition was observed within the window.
pub async fn poll_until<F, Fut>(window: Duration, poll: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let policy = RetryPolicy::readiness(poll);
    let deadline = tokio::time::Instant::now() + window;
    let mut attempt = 0u32;
    loop {
        if check().await {
            return true;
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return false;
        }
        let delay = policy.delay_for_attempt(attempt).min(deadline - now);
        attempt = attempt.saturating_add(1);
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky(bool);

    impl Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky(retryable={})", self.0)
        }
    }

    impl Retryable for Flaky {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy::new(
            Duration::from_millis(100),
            Duration::from_millis(1000),
            2.0,
            0.0,
            Some(10),
        );
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(200), Duration::from_millis(1000));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(
            Duration::from_millis(1000),
            Duration::from_secs(10),
            2.0,
            0.1,
            Some(3),
        );
        for _ in 0..100 {
            let delay = policy.delay_for_attempt(0).as_millis();
            assert!((900..=1100).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn new_clamps_parameters() {
        let policy = RetryPolicy::new(Duration::ZERO, Duration::ZERO, 0.5, 3.0, None);
        assert!((policy.backoff_factor - 1.0).abs() < f64::EPSILON);
        assert!((policy.jitter_percent - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn presets_are_bounded() {
        assert_eq!(RetryPolicy::remote_upload().max_attempts, Some(5));
        assert_eq!(RetryPolicy::remote_fetch().max_attempts, Some(3));
        assert_eq!(
            RetryPolicy::readiness(Duration::from_millis(50)).delay_for_attempt(7),
            Duration::from_millis(50)
        );
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let outcome = with_retry_outcome(&RetryPolicy::immediate(5), || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 { Err(Flaky(true)) } else { Ok(n) }
            }
        })
        .await;
        assert_eq!(outcome.result.unwrap(), 2);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<(), Flaky> = with_retry(&RetryPolicy::immediate(3), || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Flaky(true))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let outcome = with_retry_outcome(&RetryPolicy::immediate(5), || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Flaky(false))
            }
        })
        .await;
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_until_times_out() {
        let ready = poll_until(Duration::from_secs(2), Duration::from_millis(100), || async {
            false
        })
        .await;
        assert!(!ready);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_until_observes_condition() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let ready = poll_until(Duration::from_secs(2), Duration::from_millis(100), || {
            let counter = Arc::clone(&counter);
            async move { counter.fetch_add(1, Ordering::SeqCst) >= 3 }
        })
        .await;
        assert!(ready);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
