//! Retrying transaction wrapper.

use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use rowsync_store::{Store, StoreTx};
use tracing::{debug, warn};

/// A unit of work run inside one store transaction.
///
/// The work may run several times; it must not carry effects from one
/// attempt into the next except through its own fields.
#[async_trait]
pub trait TxWork: Send {
    /// Value produced by a committed attempt.
    type Output: Send;

    /// Runs one attempt.
    async fn run(&mut self, tx: &mut dyn StoreTx) -> SyncResult<Self::Output>;
}

/// Runs `work` in a transaction, retrying the whole transaction on
/// transient store errors.
///
/// Non-transient errors roll back and surface immediately. After
/// `retry.max_attempts` transient failures the last one is reported as
/// [`SyncError::TooManyRetries`].
pub async fn transact<W: TxWork>(
    store: &dyn Store,
    retry: &RetryConfig,
    work: &mut W,
) -> SyncResult<W::Output> {
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let delay = retry.delay_for_attempt(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        attempt += 1;

        let err = match run_once(store, work).await {
            Ok(output) => return Ok(output),
            Err(err) => err,
        };

        if !err.is_retryable() {
            return Err(err);
        }
        if attempt >= max_attempts {
            warn!(attempts = attempt, error = %err, "giving up on transaction");
            return Err(SyncError::TooManyRetries {
                attempts: attempt,
                last_error: err.to_string(),
            });
        }
        debug!(attempt, error = %err, "retrying transaction");
    }
}

async fn run_once<W: TxWork>(store: &dyn Store, work: &mut W) -> SyncResult<W::Output> {
    let mut tx = store.begin().await?;
    match work.run(tx.as_mut()).await {
        Ok(output) => {
            tx.commit().await?;
            Ok(output)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_store::{InjectedFault, MemoryStore, StoreError};
    use serde_json::Map;

    struct InsertRow {
        runs: u32,
    }

    #[async_trait]
    impl TxWork for InsertRow {
        type Output = u64;

        async fn run(&mut self, tx: &mut dyn StoreTx) -> SyncResult<u64> {
            self.runs += 1;
            let row = tx.upsert_row("t1", "rooms", "r1", Map::new()).await?;
            Ok(row.row_version)
        }
    }

    struct Fails(StoreError);

    #[async_trait]
    impl TxWork for Fails {
        type Output = ();

        async fn run(&mut self, tx: &mut dyn StoreTx) -> SyncResult<()> {
            tx.upsert_row("t1", "rooms", "r1", Map::new()).await?;
            Err(SyncError::Store(match &self.0 {
                StoreError::Deadlock(m) => StoreError::Deadlock(m.clone()),
                other => StoreError::Backend(other.to_string()),
            }))
        }
    }

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig::new(max_attempts)
            .with_initial_delay(std::time::Duration::from_millis(1))
            .with_jitter(false)
    }

    #[tokio::test]
    async fn commits_on_first_try() {
        let store = MemoryStore::new();
        let mut work = InsertRow { runs: 0 };
        transact(&store, &fast(3), &mut work).await.unwrap();
        assert_eq!(work.runs, 1);
        assert_eq!(store.committed_transactions(), 1);
    }

    #[tokio::test]
    async fn retries_transient_commit_failures() {
        let store = MemoryStore::new();
        store.fail_next_commits(2, InjectedFault::SerializationFailure);

        let mut work = InsertRow { runs: 0 };
        transact(&store, &fast(3), &mut work).await.unwrap();
        assert_eq!(work.runs, 3);
        assert_eq!(store.committed_transactions(), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let store = MemoryStore::new();
        store.fail_next_commits(5, InjectedFault::Deadlock);

        let mut work = InsertRow { runs: 0 };
        let err = transact(&store, &fast(3), &mut work).await.unwrap_err();
        assert!(matches!(err, SyncError::TooManyRetries { attempts: 3, .. }));
        assert_eq!(work.runs, 3);
        assert_eq!(store.committed_transactions(), 0);
    }

    #[tokio::test]
    async fn permanent_errors_roll_back_without_retry() {
        let store = MemoryStore::new();
        let mut work = Fails(StoreError::Backend("boom".into()));
        let err = transact(&store, &fast(3), &mut work).await.unwrap_err();
        assert!(matches!(err, SyncError::Store(StoreError::Backend(_))));

        let mut tx = store.begin().await.unwrap();
        assert!(tx.row("t1", "rooms", "r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transient_work_errors_are_retried() {
        let store = MemoryStore::new();
        let mut work = Fails(StoreError::Deadlock("lock".into()));
        let err = transact(&store, &fast(2), &mut work).await.unwrap_err();
        assert!(matches!(err, SyncError::TooManyRetries { attempts: 2, .. }));
    }
}
