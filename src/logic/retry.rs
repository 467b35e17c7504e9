use std::future::Future;
use std::time::Duration;

use crate::error::{ContentError, Result};

/// Bounded retry of read-modify-write cycles that hit a store write conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub limit: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(limit: u32, delay: Duration) -> Self {
        Self { limit, delay }
    }

    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Run `operation` until it succeeds, fails with anything but a write
    /// conflict, or the retry budget is used up. Exhaustion is reported as
    /// `ConcurrencyConflict` on `target`.
    pub async fn run<T, F, Fut>(&self, target: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Err(e) if e.is_write_conflict() => {
                    if attempt >= self.limit {
                        log::warn!(
                            "Giving up on {} after {} attempts: {}",
                            target,
                            attempt + 1,
                            e
                        );
                        return Err(ContentError::ConcurrencyConflict {
                            target: target.to_string(),
                        });
                    }
                    attempt += 1;
                    log::debug!("Write conflict on {}, retry {}/{}", target, attempt, self.limit);
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                }
                other => return other,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(10, Duration::from_millis(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::WriteConflict;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = RetryPolicy::new(3, Duration::ZERO)
            .run("test", || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ContentError::Store(WriteConflict::error("test")))
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_is_a_concurrency_conflict() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = RetryPolicy::new(2, Duration::ZERO)
            .run("schema x", || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ContentError::Store(WriteConflict::error("x")))
            })
            .await;
        assert!(matches!(result, Err(ContentError::ConcurrencyConflict { ref target }) if target == "schema x"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = RetryPolicy::default()
            .run("test", || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ContentError::validation("bad"))
            })
            .await;
        assert!(matches!(result, Err(ContentError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
