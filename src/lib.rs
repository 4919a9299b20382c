//! NDB Operator - reconciles MySQL NDB Cluster deployments on Kubernetes
//!
//! An `NdbCluster` custom resource declares management servers, data nodes
//! and a SQL gateway. The operator converges the platform toward it one
//! staged step at a time and refuses new spec changes until the previous one
//! is fully rolled out.
//!
//! # Architecture
//!
//! ```text
//! API server -> admission (webhook) -> persisted -> watch -> EventRouter
//!            -> WorkQueue -> workers -> SyncEngine -> API writes -> watch ...
//! ```
//!
//! # Modules
//!
//! - [`crd`] - the NdbCluster resource and its validation rules
//! - [`webhook`] - admission decisions (validate, mutate) served over HTTP
//! - [`workqueue`] - de-duplicating, rate-limited queue of cluster keys
//! - [`controller`] - watch tasks, event routing, the sync engine, workers
//! - [`resources`] - manifests for the workloads an NdbCluster owns
//! - [`events`] - Kubernetes Events published on NdbClusters
//! - [`config`] - controller settings
//! - [`retry`] - bounded retries with backoff
//! - [`error`] - error types for the operator

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod events;
pub mod resources;
pub mod retry;
pub mod webhook;
pub mod workqueue;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Labels, annotations and defaults
// =============================================================================

/// Label on every owned object naming the NdbCluster it belongs to
pub const CLUSTER_LABEL: &str = "ndb.dev/cluster";

/// Label on every owned object naming the node role (`mgmd`, `ndbmtd`, `mysqld`)
pub const NODE_TYPE_LABEL: &str = "ndb.dev/node-type";

/// Pod template annotation recording the config version a workload was rendered from
pub const CONFIG_VERSION_ANNOTATION: &str = "ndb.dev/config-version";

/// SQL gateway annotation naming the Secret its root password comes from
pub const ROOT_PASSWORD_SECRET_ANNOTATION: &str = "ndb.dev/root-password-secret";

/// Field manager used for all writes
pub const FIELD_MANAGER: &str = "ndb-operator";

/// Default port for the admission webhook
pub const DEFAULT_WEBHOOK_PORT: u16 = 9443;
