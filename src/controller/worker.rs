//! Sync workers
//!
//! A fixed number of tasks pop keys from the work queue and run one sync
//! pass each. The queue guarantees a key is never processed by two workers
//! at once.

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::key::ObjectKey;
use super::sync::{SyncEngine, SyncOutcome};
use crate::workqueue::WorkQueue;
use crate::Error;

/// Something that can run a sync pass for a key
#[async_trait]
pub trait Syncer: Clone + Send + Sync + 'static {
    /// Run one pass
    async fn sync(&self, key: &ObjectKey) -> Result<SyncOutcome, Error>;
}

#[async_trait]
impl Syncer for SyncEngine {
    async fn sync(&self, key: &ObjectKey) -> Result<SyncOutcome, Error> {
        SyncEngine::sync(self, key).await
    }
}

/// Apply the result of a pass to the queue
pub fn handle_result(
    queue: &WorkQueue<ObjectKey>,
    key: &ObjectKey,
    result: Result<SyncOutcome, Error>,
) {
    match result {
        Ok(SyncOutcome::Skip) | Ok(SyncOutcome::Complete) => queue.forget(key),
        Ok(SyncOutcome::Incomplete(after)) => {
            queue.forget(key);
            queue.add_after(key.clone(), after);
        }
        Err(e) if e.is_retryable() => {
            warn!(
                cluster = %key,
                error = %e,
                requeues = queue.num_requeues(key),
                "sync failed, retrying with backoff"
            );
            queue.add_rate_limited(key.clone());
        }
        Err(e) => {
            error!(cluster = %key, error = %e, "sync failed permanently");
            queue.forget(key);
        }
    }
}

/// Process keys until the queue shuts down and drains
pub async fn run_worker<S: Syncer>(id: usize, queue: WorkQueue<ObjectKey>, syncer: S) {
    debug!(worker = id, "worker started");
    while let Some(key) = queue.get().await {
        let result = syncer.sync(&key).await;
        handle_result(&queue, &key, result);
        queue.done(&key);
    }
    debug!(worker = id, "worker stopped");
}

/// Spawn `count` workers
pub fn run_workers<S: Syncer>(
    count: usize,
    queue: &WorkQueue<ObjectKey>,
    syncer: &S,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|id| tokio::spawn(run_worker(id, queue.clone(), syncer.clone())))
        .collect()
}
