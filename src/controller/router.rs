//! Event Router
//!
//! Watch tasks turn API notifications into [`WatchEvent`]s and send them
//! down one channel. The router decides which of them warrant a sync pass
//! and enqueues the owning cluster's key. It never touches the API itself.

use kube::ResourceExt;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use super::key::ObjectKey;
use super::workload::OwnedWorkload;
use crate::crd::NdbCluster;
use crate::workqueue::WorkQueue;

/// A change to a watched object
#[derive(Clone, Debug, PartialEq)]
pub enum WatchEvent<K> {
    /// First sighting of the object
    Added(K),
    /// The object changed, or was re-emitted by a resync when `old == new`
    Updated {
        /// Last seen state
        old: K,
        /// Current state
        new: K,
    },
    /// The object is gone; last seen state
    Deleted(K),
}

/// Everything the router consumes
#[derive(Clone, Debug, PartialEq)]
pub enum RouterEvent {
    /// NdbCluster notification
    Cluster(WatchEvent<NdbCluster>),
    /// Owned pod controller, disruption budget or config marker notification
    Workload(WatchEvent<OwnedWorkload>),
}

impl From<WatchEvent<NdbCluster>> for RouterEvent {
    fn from(event: WatchEvent<NdbCluster>) -> Self {
        Self::Cluster(event)
    }
}

impl From<WatchEvent<OwnedWorkload>> for RouterEvent {
    fn from(event: WatchEvent<OwnedWorkload>) -> Self {
        Self::Workload(event)
    }
}

/// Maps watch events to work queue keys
#[derive(Clone)]
pub struct EventRouter {
    queue: WorkQueue<ObjectKey>,
}

impl EventRouter {
    /// Create a router feeding `queue`
    pub fn new(queue: WorkQueue<ObjectKey>) -> Self {
        Self { queue }
    }

    /// Route one event, returning the key that was enqueued, if any
    pub fn route(&self, event: RouterEvent) -> Option<ObjectKey> {
        let key = match event {
            RouterEvent::Cluster(event) => cluster_key_for(event),
            RouterEvent::Workload(event) => workload_key_for(event),
        }?;
        self.queue.add(key.clone());
        Some(key)
    }

    /// Route events until every sender is dropped
    pub async fn run(self, mut events: mpsc::Receiver<RouterEvent>) {
        while let Some(event) = events.recv().await {
            if let Some(key) = self.route(event) {
                trace!(cluster = %key, "enqueued");
            }
        }
        debug!("event router stopped");
    }
}

fn object_key(cluster: &NdbCluster) -> ObjectKey {
    ObjectKey::new(&cluster.namespace().unwrap_or_default(), &cluster.name_any())
}

fn cluster_key_for(event: WatchEvent<NdbCluster>) -> Option<ObjectKey> {
    match event {
        WatchEvent::Added(cluster) => Some(object_key(&cluster)),
        WatchEvent::Updated { old, new } => {
            if old.generation() != new.generation() {
                Some(object_key(&new))
            } else if old.resource_version() != new.resource_version() {
                // Status or metadata write; our own status patches land here
                None
            } else if !new.is_spec_processed() {
                Some(object_key(&new))
            } else {
                None
            }
        }
        WatchEvent::Deleted(cluster) => {
            info!(
                cluster = %cluster.key(),
                "NdbCluster deleted, owned objects are garbage collected"
            );
            None
        }
    }
}

fn workload_key_for(event: WatchEvent<OwnedWorkload>) -> Option<ObjectKey> {
    match event {
        WatchEvent::Added(_) => None,
        WatchEvent::Updated { old, new } => {
            // Edge-triggered: only the transition into settled matters
            if !old.is_settled() && new.is_settled() {
                new.cluster_key()
            } else {
                None
            }
        }
        WatchEvent::Deleted(workload) => {
            let key = workload.cluster_key();
            if key.is_some() {
                info!(workload = %workload.describe(), "owned workload deleted");
            }
            key
        }
    }
}
