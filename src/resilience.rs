//! Retry with exponential backoff for transient failures.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::ExecutionError;

/// Immutable retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    use_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100), Duration::from_secs(5), true)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration, use_jitter: bool) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            use_jitter,
        }
    }

    /// Never retry.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO, false)
    }

    /// Retries after the first attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn use_jitter(&self) -> bool {
        self.use_jitter
    }

    /// Delay before retry number `attempt` (1-based):
    /// `min(base * 2^(attempt-1) + jitter, max_delay)`, jitter at most a
    /// quarter of the exponential term.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let backoff = self.base_delay.saturating_mul(2_u32.saturating_pow(exponent));

        let jitter = if self.use_jitter {
            let cap = (backoff / 4).as_millis().min(u64::MAX as u128) as u64;
            if cap > 0 {
                Duration::from_millis(rand::random_range(0..=cap))
            } else {
                Duration::ZERO
            }
        } else {
            Duration::ZERO
        };

        backoff.saturating_add(jitter).min(self.max_delay)
    }
}

/// Context for one retried call.
#[derive(Debug, Clone, Copy)]
pub struct RetryScope<'a> {
    /// Command type name, for logs and the cancellation error.
    pub command: &'a str,
    pub connection: &'a str,
    /// False for non-idempotent mutations and connections with auto-retry off.
    pub retries_allowed: bool,
    pub cancel: &'a CancellationToken,
}

/// Wraps execution calls with the retry policy.
#[derive(Debug, Clone, Default)]
pub struct Resilience {
    policy: RetryPolicy,
}

impl Resilience {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` (given the 1-based attempt number) until it succeeds,
    /// fails non-transiently, or the retry budget is spent. The last error is
    /// returned unchanged.
    pub async fn run<T, F, Fut>(&self, scope: &RetryScope<'_>, mut operation: F) -> Result<T, ExecutionError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ExecutionError>>,
    {
        let mut retries = 0;
        loop {
            let err = match operation(retries + 1).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !scope.retries_allowed || !err.is_transient() {
                return Err(err);
            }
            if retries >= self.policy.max_retries {
                if retries > 0 {
                    tracing::error!(
                        "{} on '{}' failed after {} retries: {}",
                        scope.command,
                        scope.connection,
                        retries,
                        err
                    );
                }
                return Err(err);
            }

            retries += 1;
            let delay = self.policy.delay_for(retries);
            tracing::warn!(
                "{} on '{}' failed. Retrying in {:?} (retry {}/{}): {}",
                scope.command,
                scope.connection,
                delay,
                retries,
                self.policy.max_retries,
                err
            );

            tokio::select! {
                biased;
                _ = scope.cancel.cancelled() => {
                    return Err(ExecutionError::Cancelled {
                        command: scope.command.to_string(),
                        connection: scope.connection.to_string(),
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::FaultKind;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> ExecutionError {
        ExecutionError::Transient {
            command: "Query".into(),
            connection: "primary".into(),
            fault: FaultKind::Deadlock,
            message: "chosen as deadlock victim".into(),
        }
    }

    fn fixed(max_retries: u32) -> Resilience {
        Resilience::new(RetryPolicy::new(
            max_retries,
            Duration::from_millis(100),
            Duration::from_secs(2),
            false,
        ))
    }

    #[test]
    fn test_delay_bounds() {
        let policy = RetryPolicy::new(6, Duration::from_millis(100), Duration::from_millis(1500), true);
        for attempt in 1..=6 {
            let floor = Duration::from_millis(100 * 2_u64.pow(attempt - 1)).min(policy.max_delay());
            for _ in 0..50 {
                let d = policy.delay_for(attempt);
                assert!(d >= floor, "attempt {}: {:?} < {:?}", attempt, d, floor);
                assert!(d <= policy.max_delay());
                assert!(d <= floor + floor / 4);
            }
        }
    }

    #[test]
    fn test_delay_without_jitter_is_exact() {
        let policy = RetryPolicy::new(3, Duration::from_millis(50), Duration::from_secs(10), false);
        assert_eq!(policy.delay_for(1), Duration::from_millis(50));
        assert_eq!(policy.delay_for(3), Duration::from_millis(200));
        assert_eq!(policy.delay_for(200), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let scope = RetryScope {
            command: "Query",
            connection: "primary",
            retries_allowed: true,
            cancel: &cancel,
        };
        let started = tokio::time::Instant::now();

        let result = fixed(3)
            .run(&scope, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { if attempt < 3 { Err(transient()) } else { Ok(attempt) } }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms + 200ms of backoff
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error_unchanged() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let scope = RetryScope {
            command: "Query",
            connection: "primary",
            retries_allowed: true,
            cancel: &cancel,
        };

        let err = fixed(2)
            .run(&scope, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(transient()) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.to_string(), transient().to_string());
        assert_eq!(err.kind(), ErrorKind::TransientExecution);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_is_not_retried() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let scope = RetryScope {
            command: "Insert",
            connection: "primary",
            retries_allowed: true,
            cancel: &cancel,
        };

        let err = fixed(5)
            .run(&scope, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(ExecutionError::NonTransient {
                        command: "Insert".into(),
                        connection: "primary".into(),
                        fault: FaultKind::Constraint,
                        message: "duplicate key".into(),
                    })
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.kind(), ErrorKind::NonTransientExecution);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disallowed_retries_run_once() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let scope = RetryScope {
            command: "Delete",
            connection: "primary",
            retries_allowed: false,
            cancel: &cancel,
        };

        let result = fixed(5)
            .run(&scope, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(transient()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let cancel = CancellationToken::new();
        let scope = RetryScope {
            command: "Query",
            connection: "primary",
            retries_allowed: true,
            cancel: &cancel,
        };
        let token = cancel.clone();

        let err = fixed(5)
            .run(&scope, move |_| {
                token.cancel();
                async { Err::<(), _>(transient()) }
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
