//! Timeout and retry policy shared by every outbound call.
//!
//! Each client wraps a single request in [`guarded`], which bounds the attempt with a timeout and
//! replays it when the failure happened before a response arrived. Errors carrying a response
//! (bad status, malformed body) are returned immediately.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Per-call limits for an external service.
#[derive(Debug, Clone, Copy)]
pub struct CallPolicy {
    /// Upper bound for one attempt.
    pub timeout: Duration,
    /// Additional attempts after the first one fails transiently.
    pub retries: u32,
}

impl CallPolicy {
    /// Build a policy from whole seconds and a retry count.
    pub fn new(timeout_secs: u64, retries: u32) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
            retries,
        }
    }
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self::new(120, 1)
    }
}

/// Errors that know whether replaying the call could help.
pub trait Transient {
    /// True for transport failures and timeouts.
    fn is_transient(&self) -> bool;
    /// Error reported when an attempt exceeds the policy timeout.
    fn timed_out(operation: &'static str, after: Duration) -> Self;
}

/// Run `call` under `policy`, retrying transient failures.
pub async fn guarded<T, E, F, Fut>(
    operation: &'static str,
    policy: &CallPolicy,
    mut call: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + Display,
{
    let attempts = policy.retries.saturating_add(1);
    let mut attempt = 1;
    loop {
        let error = match tokio::time::timeout(policy.timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(error)) if error.is_transient() => error,
            Ok(Err(error)) => return Err(error),
            Err(_) => E::timed_out(operation, policy.timeout),
        };

        if attempt >= attempts {
            tracing::error!(operation, attempt, error = %error, "External call failed");
            return Err(error);
        }
        tracing::warn!(operation, attempt, error = %error, "External call failed; retrying");
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    enum FakeError {
        Connect,
        Status,
        Timeout,
    }

    impl Display for FakeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Transient for FakeError {
        fn is_transient(&self) -> bool {
            matches!(self, Self::Connect | Self::Timeout)
        }

        fn timed_out(_operation: &'static str, _after: Duration) -> Self {
            Self::Timeout
        }
    }

    fn policy(millis: u64, retries: u32) -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_millis(millis),
            retries,
        }
    }

    #[tokio::test]
    async fn retries_transport_failure_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result: Result<u8, FakeError> = guarded("test", &policy(500, 1), || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(FakeError::Connect)
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn status_errors_are_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result: Result<u8, FakeError> = guarded("test", &policy(500, 3), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(FakeError::Status)
            }
        })
        .await;
        assert_eq!(result, Err(FakeError::Status));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_calls_time_out_after_all_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result: Result<u8, FakeError> = guarded("test", &policy(20, 1), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(1)
            }
        })
        .await;
        assert_eq!(result, Err(FakeError::Timeout));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
