//! Bounded service calls: per-call timeout, backoff retries, cancellation.

use crate::cancel::CancelToken;
use crate::error::{ServiceError, ServiceErrorKind};
use matlas_core::config::RetryConfig;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Limits applied to every attempt of one call.
#[derive(Debug, Clone)]
pub struct CallPolicy<'a> {
    pub retry: &'a RetryConfig,
    pub call_timeout: Duration,
    /// Operation deadline; no attempt or backoff extends past it.
    pub deadline: Instant,
    pub cancel: &'a CancelToken,
}

/// Outcome of a retried call.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, ServiceError>,
    /// Attempts after the first.
    pub retries: u32,
}

impl CallPolicy<'_> {
    fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Run `call` once under the call timeout, honoring cancellation.
    pub async fn once<T, Fut>(&self, call: Fut) -> Result<T, ServiceError>
    where
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        if let Some(reason) = self.cancel.reason() {
            return Err(ServiceError::cancelled(reason));
        }
        let limit = self.call_timeout.min(self.remaining());
        if limit.is_zero() {
            return Err(ServiceError::timeout(Duration::ZERO));
        }
        tokio::select! {
            outcome = tokio::time::timeout(limit, call) => match outcome {
                Ok(result) => result,
                Err(_) => Err(ServiceError::timeout(limit)),
            },
            () = self.cancel.cancelled() => Err(ServiceError::cancelled(
                self.cancel.reason().unwrap_or_else(|| "cancelled".into()),
            )),
        }
    }

    /// Run `make_call` until it succeeds, fails permanently, or attempts run
    /// out. `on_retry` sees each retryable failure before the backoff sleep.
    pub async fn run<T, F, Fut>(
        &self,
        mut make_call: F,
        mut on_retry: impl FnMut(u32, &ServiceError, Duration),
    ) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = self.once(make_call()).await;
            let err = match result {
                Ok(value) => {
                    return Attempted {
                        result: Ok(value),
                        retries: attempt - 1,
                    }
                }
                Err(err) => err,
            };
            if !err.is_retryable() || attempt >= max_attempts {
                return Attempted {
                    result: Err(err),
                    retries: attempt - 1,
                };
            }
            let rate_limited = err.kind == ServiceErrorKind::RateLimit;
            let delay = err
                .retry_after
                .unwrap_or_else(|| self.retry.backoff(attempt, rate_limited));
            if delay >= self.remaining() {
                debug!(attempt, "operation deadline leaves no room for another attempt");
                return Attempted {
                    result: Err(err),
                    retries: attempt - 1,
                };
            }
            on_retry(attempt, &err, delay);
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.cancel.cancelled() => {
                    return Attempted {
                        result: Err(ServiceError::cancelled(
                            self.cancel.reason().unwrap_or_else(|| "cancelled".into()),
                        )),
                        retries: attempt - 1,
                    };
                }
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            rate_limit_multiplier: 2,
        }
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let retry = fast_retry();
        let cancel = CancelToken::new();
        let policy = CallPolicy {
            retry: &retry,
            call_timeout: Duration::from_secs(1),
            deadline: Instant::now() + Duration::from_secs(5),
            cancel: &cancel,
        };
        let calls = AtomicU32::new(0);
        let mut seen = Vec::new();
        let attempted = policy
            .run(
                || async {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ServiceError::transient("503"))
                    } else {
                        Ok(7)
                    }
                },
                |attempt, _, _| seen.push(attempt),
            )
            .await;
        assert_eq!(attempted.result.unwrap(), 7);
        assert_eq!(attempted.retries, 2);
        assert_eq!(seen, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_validation_errors_are_not_retried() {
        let retry = fast_retry();
        let cancel = CancelToken::new();
        let policy = CallPolicy {
            retry: &retry,
            call_timeout: Duration::from_secs(1),
            deadline: Instant::now() + Duration::from_secs(5),
            cancel: &cancel,
        };
        let calls = AtomicU32::new(0);
        let attempted: Attempted<()> = policy
            .run(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ServiceError::validation("bad size"))
                },
                |_, _, _| {},
            )
            .await;
        assert_eq!(attempted.result.unwrap_err().kind, ServiceErrorKind::Validation);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let retry = RetryConfig {
            max_attempts: 1,
            ..fast_retry()
        };
        let cancel = CancelToken::new();
        let policy = CallPolicy {
            retry: &retry,
            call_timeout: Duration::from_millis(10),
            deadline: Instant::now() + Duration::from_secs(5),
            cancel: &cancel,
        };
        let attempted: Attempted<()> = policy
            .run(
                || async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                },
                |_, _, _| {},
            )
            .await;
        assert_eq!(attempted.result.unwrap_err().kind, ServiceErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let retry = fast_retry();
        let cancel = CancelToken::new();
        cancel.cancel("user");
        let policy = CallPolicy {
            retry: &retry,
            call_timeout: Duration::from_secs(1),
            deadline: Instant::now() + Duration::from_secs(5),
            cancel: &cancel,
        };
        let err = policy.once(async { Ok(1) }).await.unwrap_err();
        assert_eq!(err.kind, ServiceErrorKind::Cancelled);
        assert_eq!(err.message, "user");
    }
}
