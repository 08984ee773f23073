//! Bounded exponential-backoff retries shared by every networked stage.
//!
//! The policy is plain data carried in [`crate::config::PipelineConfig`];
//! which errors are worth retrying is decided by
//! [`ConcallError::is_transient`], so each stage only states *how many*
//! attempts it allows.

use crate::error::ConcallError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// How many times to retry, and how long to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure. `0` disables retries.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay.
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms: 30_000,
        }
    }

    /// No retries at all.
    pub const fn none() -> Self {
        Self::new(0, 0)
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(32);
        let ms = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, 500)
    }
}

/// Run `operation`, retrying transient errors according to `policy`.
///
/// Terminal errors are returned immediately. After the last allowed retry
/// the last error is returned unchanged.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut operation: F,
) -> Result<T, ConcallError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ConcallError>>,
{
    let mut retry = 0u32;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_transient() || retry >= policy.max_retries {
            return Err(err);
        }

        retry += 1;
        let delay = policy.delay_for(retry);
        tracing::warn!(
            what,
            retry,
            max_retries = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient failure — retrying after backoff"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchFailure;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn transient() -> ConcallError {
        ConcallError::Download {
            url: "https://host/a.pdf".into(),
            failure: FetchFailure::Status(503),
        }
    }

    fn terminal() -> ConcallError {
        ConcallError::Download {
            url: "https://host/a.pdf".into(),
            failure: FetchFailure::Status(404),
        }
    }

    #[test]
    fn delay_doubles_and_caps() {
        let p = RetryPolicy {
            max_retries: 5,
            base_delay_ms: 500,
            max_delay_ms: 3_000,
        };
        assert_eq!(p.delay_for(1), Duration::from_millis(500));
        assert_eq!(p.delay_for(2), Duration::from_millis(1_000));
        assert_eq!(p.delay_for(3), Duration::from_millis(2_000));
        assert_eq!(p.delay_for(4), Duration::from_millis(3_000));
        assert_eq!(p.delay_for(40), Duration::from_millis(3_000));
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(&RetryPolicy::new(2, 0), "test", || {
            let c = Arc::clone(&c);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result: Result<(), _> = retry_with_backoff(&RetryPolicy::new(2, 0), "test", || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(result.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn terminal_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result: Result<(), _> = retry_with_backoff(&RetryPolicy::new(3, 0), "test", || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(terminal())
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result,
            Err(ConcallError::Download {
                failure: FetchFailure::Status(404),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn none_policy_makes_one_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let _: Result<(), _> = retry_with_backoff(&RetryPolicy::none(), "test", || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
