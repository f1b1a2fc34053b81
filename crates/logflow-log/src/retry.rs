//! Retry Logic with Exponential Backoff
//!
//! Transient log-transport failures (`StreamUnavailable`) are retried with
//! exponential backoff before being surfaced to the caller. Everything else
//! fails immediately - retrying an `UnknownStream` cannot succeed.
//!
//! ## Backoff Calculation
//!
//! ```text
//! backoff = min(initial_backoff * multiplier^attempt, max_backoff)
//!
//! Defaults (100ms initial, 2x multiplier, 10s max):
//! - Attempt 1: immediate
//! - Attempt 2: wait 100ms
//! - Attempt 3: wait 200ms
//! - Attempt 4: wait 400ms
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::error::{LogError, Result};

/// Retry policy for transient log failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the initial try.
    pub max_retries: usize,

    /// Initial backoff duration.
    pub initial_backoff: Duration,

    /// Cap on the backoff duration.
    pub max_backoff: Duration,

    /// Multiplier for exponential growth.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries. Useful in tests.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff before the given zero-based retry attempt.
    pub fn backoff_for(&self, attempt: usize) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let backoff = self.initial_backoff.mul_f64(factor);
        backoff.min(self.max_backoff)
    }
}

/// Run `op`, retrying retryable failures per `policy`.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let backoff = policy.backoff_for(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Retrying after transient log failure"
                );
                sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn unavailable() -> LogError {
        LogError::StreamUnavailable {
            stream: "s".into(),
            reason: "down".into(),
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(1),
            ..Default::default()
        };
        let calls = AtomicUsize::new(0);
        let result = retry_with_backoff(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(unavailable())
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let policy = RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            ..Default::default()
        };
        let calls = AtomicUsize::new(0);
        let result: Result<()> = retry_with_backoff(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(unavailable()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = retry_with_backoff(&RetryPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(LogError::UnknownStream("s".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
