//! Bounded connection retry with exponential backoff.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::{MigrateError, Result};

/// Upper bound for a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Connection retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Delay before the first retry; doubled on every further retry.
    pub base_delay: Duration,

    /// Time allowed for one attempt.
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64, attempt_timeout_secs: u64) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(base_delay_ms),
            attempt_timeout: Duration::from_secs(attempt_timeout_secs.max(1)),
        }
    }

    /// Backoff before retry number `retry` (1-based).
    fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Run `connect` until it succeeds or the policy is exhausted.
///
/// Each attempt is bounded by the policy's timeout. The final error is a
/// [`MigrateError::Connection`] naming `target` and the attempt count.
pub async fn connect_with_retry<T, F, Fut>(
    target: &str,
    policy: RetryPolicy,
    mut connect: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_retries.saturating_add(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        if attempt > 1 {
            let delay = policy.delay(attempt - 1);
            warn!(
                "Connection to {} failed (attempt {}/{}), retrying in {:?}: {}",
                target,
                attempt - 1,
                attempts,
                delay,
                last_error
            );
            tokio::time::sleep(delay).await;
        }

        match tokio::time::timeout(policy.attempt_timeout, connect()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => last_error = e.to_string(),
            Err(_) => {
                last_error = format!("timed out after {:?}", policy.attempt_timeout);
            }
        }
    }

    Err(MigrateError::Connection {
        target: target.to_string(),
        attempts,
        message: last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, 10, 5)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy(10);
        assert_eq!(p.delay(1), Duration::from_millis(10));
        assert_eq!(p.delay(2), Duration::from_millis(20));
        assert_eq!(p.delay(4), Duration::from_millis(80));
        assert_eq!(p.delay(40), MAX_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = connect_with_retry("db2://host", policy(3), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(MigrateError::Source("refused".into()))
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_report_attempts() {
        let err = connect_with_retry::<(), _, _>("postgres://host", policy(2), || async {
            Err(MigrateError::Source("refused".into()))
        })
        .await
        .unwrap_err();

        match err {
            MigrateError::Connection {
                target,
                attempts,
                message,
            } => {
                assert_eq!(target, "postgres://host");
                assert_eq!(attempts, 3);
                assert!(message.contains("refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_attempt_times_out() {
        let err = connect_with_retry::<(), _, _>("db2://host", policy(0), || async {
            std::future::pending::<Result<()>>().await
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(err.is_retryable());
    }
}
