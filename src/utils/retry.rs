// src/utils/retry.rs

//! Retry loop shared by the fetcher and the dispatcher.
//!
//! A classifier maps each error to a [`Verdict`]:
//! - `RateLimited(after)`: wait `after` (capped) plus a small buffer and try
//!   again; this never consumes the attempt budget
//! - `Transient`: exponential backoff, up to `max_attempts` total attempts
//! - `Permanent`: give up immediately
//!
//! Every wait races the policy's cancellation token.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// How a failed attempt should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    RateLimited(Duration),
    Transient,
    Permanent,
}

/// Longest provider-requested wait honoured unless configured otherwise.
pub const DEFAULT_MAX_RETRY_AFTER: Duration = Duration::from_secs(300);

/// Attempt budget, backoff shape and the token that aborts waits.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    rate_limit_buffer: Duration,
    max_retry_after: Duration,
    cancel: CancellationToken,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
            rate_limit_buffer: Duration::from_secs(1),
            max_retry_after: DEFAULT_MAX_RETRY_AFTER,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_rate_limit_buffer(mut self, buffer: Duration) -> Self {
        self.rate_limit_buffer = buffer;
        self
    }

    /// Cap applied to provider `Retry-After` values.
    pub fn with_max_retry_after(mut self, ceiling: Duration) -> Self {
        self.max_retry_after = ceiling;
        self
    }

    /// Abort pending waits when `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay after the `failures`-th transient failure: `base * 2^(failures-1)`, capped.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Wait applied when the provider asks us to retry after `after`.
    pub fn rate_limit_wait(&self, after: Duration) -> Duration {
        after
            .min(self.max_retry_after)
            .saturating_add(self.rate_limit_buffer)
    }

    /// Sleep for `wait`; `false` if cancelled first.
    async fn pause(&self, wait: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(wait) => true,
        }
    }
}

/// Terminal failure of a retried operation.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Transient failures used up the attempt budget.
    Exhausted { error: E, attempts: u32 },
    /// The classifier said retrying cannot help.
    Permanent(E),
    /// Shutdown interrupted a wait between attempts.
    Cancelled(E),
}

impl<E> RetryError<E> {
    pub fn is_permanent(&self) -> bool {
        matches!(self, RetryError::Permanent(_))
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted { error, attempts } => {
                write!(f, "gave up after {attempts} attempts: {error}")
            }
            RetryError::Permanent(error) => write!(f, "permanent failure: {error}"),
            RetryError::Cancelled(error) => write!(f, "cancelled while retrying: {error}"),
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or exhausts its attempts.
pub async fn retry<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
    classify: C,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> Verdict,
    E: fmt::Display,
{
    let mut failures = 0u32;
    loop {
        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        match classify(&error) {
            Verdict::RateLimited(after) => {
                let wait = policy.rate_limit_wait(after);
                log::warn!(
                    "{}: rate limited, waiting {:.1}s before retry",
                    label,
                    wait.as_secs_f64()
                );
                if !policy.pause(wait).await {
                    return Err(RetryError::Cancelled(error));
                }
            }
            Verdict::Permanent => return Err(RetryError::Permanent(error)),
            Verdict::Transient => {
                failures += 1;
                if failures >= policy.max_attempts {
                    return Err(RetryError::Exhausted {
                        error,
                        attempts: failures,
                    });
                }
                let wait = policy.backoff(failures);
                log::warn!(
                    "{}: attempt {}/{} failed ({}), retrying in {:.1}s",
                    label,
                    failures,
                    policy.max_attempts,
                    error,
                    wait.as_secs_f64()
                );
                if !policy.pause(wait).await {
                    return Err(RetryError::Cancelled(error));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[derive(Debug)]
    enum TestError {
        Busy(u64),
        Flaky,
        Gone,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{self:?}")
        }
    }

    fn classify(e: &TestError) -> Verdict {
        match e {
            TestError::Busy(secs) => Verdict::RateLimited(Duration::from_secs(*secs)),
            TestError::Flaky => Verdict::Transient,
            TestError::Gone => Verdict::Permanent,
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(10))
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff(1), Duration::from_secs(1));
        assert_eq!(p.backoff(2), Duration::from_secs(2));
        assert_eq!(p.backoff(3), Duration::from_secs(4));
        assert_eq!(p.backoff(10), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_exhaust_budget() {
        let calls = Cell::new(0);
        let result: Result<(), _> = retry(
            &policy(),
            "test",
            || {
                calls.set(calls.get() + 1);
                async { Err(TestError::Flaky) }
            },
            classify,
        )
        .await;

        assert_eq!(calls.get(), 3);
        assert!(matches!(
            result,
            Err(RetryError::Exhausted { attempts: 3, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_stops_immediately() {
        let calls = Cell::new(0);
        let result: Result<(), _> = retry(
            &policy(),
            "test",
            || {
                calls.set(calls.get() + 1);
                async { Err(TestError::Gone) }
            },
            classify,
        )
        .await;

        assert_eq!(calls.get(), 1);
        assert!(result.unwrap_err().is_permanent());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limits_do_not_consume_attempts() {
        let calls = Cell::new(0);
        let start = tokio::time::Instant::now();
        let result = retry(
            &policy(),
            "test",
            || {
                let n = calls.get() + 1;
                calls.set(n);
                async move {
                    if n <= 5 {
                        Err(TestError::Busy(2))
                    } else {
                        Ok(n)
                    }
                }
            },
            classify,
        )
        .await;

        assert_eq!(result.unwrap(), 6);
        // five waits of retry-after (2s) plus the 1s buffer
        assert!(start.elapsed() >= Duration::from_secs(15));
    }

    #[test]
    fn huge_retry_after_is_capped() {
        let p = policy().with_max_retry_after(Duration::from_secs(60));
        assert_eq!(
            p.rate_limit_wait(Duration::from_secs(u64::MAX)),
            Duration::from_secs(61)
        );
        assert_eq!(
            p.rate_limit_wait(Duration::MAX),
            Duration::from_secs(61)
        );
        assert_eq!(p.rate_limit_wait(Duration::from_secs(5)), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_rate_limit_wait() {
        let cancel = CancellationToken::new();
        let p = policy()
            .with_max_retry_after(Duration::from_secs(3600))
            .with_cancel(cancel.clone());
        let calls = Cell::new(0);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            trigger.cancel();
        });

        let start = tokio::time::Instant::now();
        let result: Result<(), _> = retry(
            &p,
            "test",
            || {
                calls.set(calls.get() + 1);
                async { Err(TestError::Busy(u64::MAX)) }
            },
            classify,
        )
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled(TestError::Busy(_)))));
        assert_eq!(calls.get(), 1);
        assert!(start.elapsed() < Duration::from_secs(60));
    }
}
