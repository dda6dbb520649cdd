use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{SourceError, StoreError};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    /// Per-attempt deadline. Only applied to source fetches.
    pub timeout: Duration,
}

impl RetryPolicy {
    /// `base * 2^attempt`
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Run a source call under the policy's timeout, retrying transient
/// failures with exponential backoff. A timeout counts as transient.
pub async fn fetch_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let mut attempt = 0;
    loop {
        let result = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Transient(format!(
                "timed out after {:.1}s",
                policy.timeout.as_secs_f64()
            ))),
        };

        match result {
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let backoff = policy.backoff(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}, backing off {:.1}s",
                    what,
                    attempt + 1,
                    policy.max_retries,
                    e,
                    backoff.as_secs_f64()
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Retry a store write. Upserts are idempotent, so every error is retried.
pub async fn store_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if attempt < policy.max_retries => {
                let backoff = policy.backoff(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}, retrying",
                    what,
                    attempt + 1,
                    policy.max_retries,
                    e
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_backoff: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy {
            max_retries: 3,
            base_backoff: Duration::from_millis(500),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(p.backoff(0), Duration::from_millis(500));
        assert_eq!(p.backoff(1), Duration::from_millis(1000));
        assert_eq!(p.backoff(3), Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn transient_then_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = fetch_with_retry(&policy(3), "listing", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(SourceError::Transient("429".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = fetch_with_retry(&policy(3), "listing", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SourceError::Fatal("404".into()))
        })
        .await;
        assert!(matches!(result, Err(SourceError::Fatal(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = fetch_with_retry(&policy(2), "listing", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SourceError::Transient("503".into()))
        })
        .await;
        assert!(matches!(result, Err(SourceError::Transient(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn timeout_is_transient() {
        let p = RetryPolicy {
            max_retries: 0,
            base_backoff: Duration::from_millis(1),
            timeout: Duration::from_millis(10),
        };
        let result: Result<(), _> = fetch_with_retry(&p, "detail", || async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(SourceError::Transient(_))));
    }

    #[tokio::test]
    async fn store_retries_any_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = store_with_retry(&policy(2), "upsert", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(StoreError::Poisoned)
            } else {
                Ok(())
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
