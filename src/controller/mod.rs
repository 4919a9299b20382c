//! Reconciliation of NdbCluster resources
//!
//! Watch tasks ([`spawn_watches`]) feed typed events to the [`EventRouter`],
//! which enqueues cluster keys on a [`WorkQueue`](crate::workqueue::WorkQueue).
//! Workers ([`run_workers`]) pop keys and run one [`SyncEngine`] pass each.

mod client;
mod key;
mod router;
mod secret;
mod sync;
mod watch;
mod worker;
mod workload;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{ClusterClient, KubeClusterClient, KubeWorkloadClient, WorkloadClient};
pub use key::ObjectKey;
pub use router::{EventRouter, RouterEvent, WatchEvent};
pub use secret::ensure_root_password_secret;
pub use sync::{
    SyncEngine, SyncOutcome, SyncSettings, CONDITION_AVAILABLE, CONDITION_UP_TO_DATE,
};
pub use watch::{spawn_watches, translate, LastSeen, WatchScope};
pub use worker::{handle_result, run_worker, run_workers, Syncer};
pub use workload::{Ensured, OwnedWorkload, WorkloadKind, WorkloadState};
