//! Background retention sweep of client groups, clients and CVRs.

use crate::config::RetryConfig;
use crate::error::SyncResult;
use crate::txn::{transact, TxWork};
use async_trait::async_trait;
use rowsync_store::{now_millis, Store, StoreTx, SweepStats};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct SweepWork {
    cutoff_ms: u64,
}

#[async_trait]
impl TxWork for SweepWork {
    type Output = SweepStats;

    async fn run(&mut self, tx: &mut dyn StoreTx) -> SyncResult<SweepStats> {
        Ok(tx.sweep_expired(self.cutoff_ms).await?)
    }
}

/// Deletes every record last modified more than `retention` before
/// `now_ms`.
pub async fn sweep_once(
    store: &dyn Store,
    retry: &RetryConfig,
    retention: Duration,
    now_ms: u64,
) -> SyncResult<SweepStats> {
    let retention_ms = u64::try_from(retention.as_millis()).unwrap_or(u64::MAX);
    let mut work = SweepWork {
        cutoff_ms: now_ms.saturating_sub(retention_ms),
    };
    let stats = transact(store, retry, &mut work).await?;
    if stats.total() > 0 {
        info!(
            client_groups = stats.client_groups,
            clients = stats.clients,
            cvrs = stats.cvrs,
            "swept expired sync state"
        );
    } else {
        debug!("nothing to sweep");
    }
    Ok(stats)
}

/// Periodic sweeper task. Stops when dropped.
#[derive(Debug)]
pub struct Sweeper {
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Spawns a sweeper running every `interval`.
    pub fn spawn(
        store: Arc<dyn Store>,
        retry: RetryConfig,
        retention: Duration,
        interval: Duration,
    ) -> Self {
        let (shutdown, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = sweep_once(store.as_ref(), &retry, retention, now_millis()).await {
                            warn!(error = %err, "sweep failed");
                        }
                    }
                    _ = stopped.changed() => break,
                }
            }
            debug!("sweeper stopped");
        });

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Stops the sweeper and waits for the running sweep, if any.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
