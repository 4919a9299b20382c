//! Custom Resource Definition for NDB clusters
//!
//! [`NdbCluster`] is the only resource the operator owns a schema for.

mod cluster;
mod types;
pub mod validation;

pub use cluster::{
    default_management_node_count, NdbCluster, NdbClusterSpec, NdbClusterStatus, DEFAULT_IMAGE,
};
pub use types::{
    Condition, ConditionStatus, DataNodeSpec, ManagementSpec, NodeRole, PodOverrides,
    SqlGatewaySpec,
};
