//! Protocol call retry with exponential backoff, and bounded waits.
//!
//! - Retry transient failures with exponential backoff (2^n * base delay)
//! - Cap each backoff at `max_backoff`
//! - Every third-party call that can hang is wrapped in [`bounded`]; a
//!   timeout becomes `ProtocolError::Timeout` and is handled like any other
//!   transport failure.

use super::traits::{ProtocolError, ProtocolResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Retry schedule for a single operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = single attempt)
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Policy used when (re)connecting a session: one retry, short pause
    pub const CONNECT: RetryPolicy = RetryPolicy {
        max_retries: 1,
        base_delay: Duration::from_millis(500),
        max_backoff: Duration::from_secs(5),
    };

    /// Backoff before retry number `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Retry an operation with exponential backoff.
///
/// # Arguments
///
/// * `policy` - Number of retries and backoff schedule
/// * `operation` - The async operation to retry (e.g. `connect`)
/// * `is_retryable` - Function to determine if an error is transient
///
/// # Returns
///
/// Result of the operation, or the last error after all retries exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: RetryPolicy,
    mut operation: F,
    is_retryable: fn(&E) -> bool,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !is_retryable(&err) || attempt >= policy.max_retries {
                    return Err(err);
                }

                let backoff = policy.backoff(attempt);
                warn!(
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "operation failed, retrying"
                );

                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

/// Determine if a protocol error is retryable (transient).
///
/// Only network-level failures and timeouts are retried; RPC rejections
/// (bad code, unauthorized) are answers, not outages.
pub fn is_retryable(err: &ProtocolError) -> bool {
    matches!(err, ProtocolError::Network(_) | ProtocolError::Timeout(_))
}

/// Retry on any error. Connecting has no "answer" worth keeping.
pub fn always_retry(_: &ProtocolError) -> bool {
    true
}

/// Upper bounds for calls exposed to third-party latency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub login_code: Duration,
    pub sign_in: Duration,
    pub classify: Duration,
    pub forward: Duration,
    pub send: Duration,
    pub connect: Duration,
    pub get_me: Duration,
    /// One `receive_messages` poll of a listening session
    pub poll: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            login_code: Duration::from_secs(30),
            sign_in: Duration::from_secs(30),
            classify: Duration::from_secs(20),
            forward: Duration::from_secs(15),
            send: Duration::from_secs(15),
            connect: Duration::from_secs(15),
            get_me: Duration::from_secs(15),
            poll: Duration::from_secs(30),
        }
    }
}

/// Run `fut` for at most `limit`, mapping expiry to `ProtocolError::Timeout`
pub async fn bounded<T, Fut>(limit: Duration, operation: &str, fut: Fut) -> ProtocolResult<T>
where
    Fut: Future<Output = ProtocolResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout(format!(
            "{} exceeded {}",
            operation,
            humantime::format_duration(limit)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_immediately() {
        let result = retry_with_backoff(
            fast_policy(3),
            || async { Ok::<_, ProtocolError>(42) },
            is_retryable,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let attempt = Arc::new(AtomicU32::new(0));
        let attempt_clone = attempt.clone();

        let result = retry_with_backoff(
            fast_policy(3),
            move || {
                let attempt = attempt_clone.clone();
                async move {
                    let count = attempt.fetch_add(1, Ordering::SeqCst);
                    if count < 2 {
                        Err(ProtocolError::Network("transient".to_string()))
                    } else {
                        Ok(42)
                    }
                }
            },
            is_retryable,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempt.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_non_retryable_error_fails_immediately() {
        let attempt = Arc::new(AtomicU32::new(0));
        let attempt_clone = attempt.clone();

        let result = retry_with_backoff(
            fast_policy(3),
            move || {
                let attempt = attempt_clone.clone();
                async move {
                    attempt.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>(ProtocolError::PhoneCodeInvalid)
                }
            },
            is_retryable,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempt.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausts_max_retries() {
        let attempt = Arc::new(AtomicU32::new(0));
        let attempt_clone = attempt.clone();

        let result = retry_with_backoff(
            fast_policy(1),
            move || {
                let attempt = attempt_clone.clone();
                async move {
                    attempt.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>(ProtocolError::Network("down".to_string()))
                }
            },
            is_retryable,
        )
        .await;

        assert!(result.is_err());
        // First attempt plus exactly one retry
        assert_eq!(attempt.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_backoff_calculation() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
        };
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
        assert_eq!(policy.backoff(4), Duration::from_secs(10)); // Capped
        assert_eq!(policy.backoff(40), Duration::from_secs(10));
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&ProtocolError::Network("reset".to_string())));
        assert!(is_retryable(&ProtocolError::Timeout("slow".to_string())));

        assert!(!is_retryable(&ProtocolError::PhoneCodeInvalid));
        assert!(!is_retryable(&ProtocolError::Unauthorized));
        assert!(!is_retryable(&ProtocolError::Rpc("FLOOD_WAIT".to_string())));
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: ProtocolResult<()> = bounded(Duration::from_millis(10), "sign_in", async {
            sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match result {
            Err(ProtocolError::Timeout(msg)) => assert!(msg.contains("sign_in")),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bounded_passes_through() {
        let result = bounded(Duration::from_secs(1), "forward", async {
            Err::<(), _>(ProtocolError::NotConnected)
        })
        .await;
        assert_eq!(result, Err(ProtocolError::NotConnected));
    }
}
