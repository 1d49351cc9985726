use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use crate::error::SlotError;

const BACKOFF_STEP: Duration = Duration::from_millis(25);

/// Re-runs a whole read-check-write attempt when the store reports a transient
/// failure (lock timeout, lost version race).
#[derive(Debug, Clone)]
pub struct TransactionRunner {
    max_retries: u32,
    backoff_step: Duration,
}

impl TransactionRunner {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff_step: BACKOFF_STEP,
        }
    }

    pub fn with_backoff(mut self, backoff_step: Duration) -> Self {
        self.backoff_step = backoff_step;
        self
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T, SlotError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SlotError>>,
    {
        let mut retries = 0;
        loop {
            match attempt().await {
                Err(e) if e.is_transient() && retries < self.max_retries => {
                    retries += 1;
                    warn!(
                        "{} hit a transient store error ({}), retry {}/{}",
                        operation, e, retries, self.max_retries
                    );
                    tokio::time::sleep(self.backoff_step * retries).await;
                }
                Err(e) if e.is_transient() => {
                    error!("{} aborted after {} retries: {}", operation, retries, e);
                    return Err(e);
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    fn runner() -> TransactionRunner {
        TransactionRunner::new(3).with_backoff(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let result = runner()
            .run("test", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(SlotError::Store(StoreError::WriteConflict(Uuid::nil())))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = runner()
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SlotError::Store(StoreError::Timeout("day".to_string())))
            })
            .await;

        assert_matches!(result, Err(SlotError::Store(StoreError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn domain_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = runner()
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SlotError::OverlapConflict("overlap".to_string()))
            })
            .await;

        assert_matches!(result, Err(SlotError::OverlapConflict(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
