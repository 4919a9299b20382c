//! NdbCluster Custom Resource Definition
//!
//! An NdbCluster declares a MySQL NDB Cluster: management servers, data
//! nodes grouped by `redundancyLevel`, and an optional SQL gateway. The
//! operator turns it into StatefulSets, a Deployment and supporting objects.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    Condition, DataNodeSpec, ManagementSpec, NodeRole, PodOverrides, SqlGatewaySpec,
};
use super::validation;

/// Image used when the spec does not name one
pub const DEFAULT_IMAGE: &str = "container-registry.oracle.com/mysql/community-cluster:8.0";

fn default_free_api_slots() -> i32 {
    1
}

/// Specification for an NdbCluster
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "ndb.dev",
    version = "v1alpha1",
    kind = "NdbCluster",
    plural = "ndbclusters",
    shortname = "ndb",
    status = "NdbClusterStatus",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.redundancyLevel"}"#,
    printcolumn = r#"{"name":"Management","type":"string","jsonPath":".status.readyManagementNodes"}"#,
    printcolumn = r#"{"name":"Data","type":"string","jsonPath":".status.readyDataNodes"}"#,
    printcolumn = r#"{"name":"SQL","type":"string","jsonPath":".status.readySqlGatewayNodes"}"#,
    printcolumn = r#"{"name":"Up-To-Date","type":"string","jsonPath":".status.conditions[?(@.type==\"UpToDate\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NdbClusterSpec {
    /// Number of replicas of each data partition (1-4). Immutable.
    pub redundancy_level: i32,

    /// Management server configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management: Option<ManagementSpec>,

    /// Data node configuration
    pub data_node: DataNodeSpec,

    /// SQL gateway configuration. Defaulted at admission, never removed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_gateway: Option<SqlGatewaySpec>,

    /// Spare API slots in config.ini for external NDB API clients
    #[serde(default = "default_free_api_slots")]
    pub free_api_slots: i32,

    /// Container image for all node roles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl NdbClusterSpec {
    /// Management server count, falling back to the admission default
    pub fn management_node_count(&self) -> i32 {
        self.management
            .as_ref()
            .and_then(|m| m.node_count)
            .unwrap_or_else(|| default_management_node_count(self.redundancy_level))
    }

    /// Running mysqld replicas
    pub fn sql_gateway_node_count(&self) -> i32 {
        self.sql_gateway.as_ref().map_or(0, |s| s.node_count)
    }

    /// API slots reserved for mysqld
    pub fn max_sql_gateway_node_count(&self) -> i32 {
        self.sql_gateway
            .as_ref()
            .map_or(0, |s| s.max_node_count.unwrap_or(s.node_count))
    }

    /// Total node ids the rendered config.ini will consume
    pub fn node_id_count(&self) -> i32 {
        self.management_node_count()
            + self.data_node.node_count
            + self.max_sql_gateway_node_count()
            + self.free_api_slots
    }

    /// Image for all containers
    pub fn image(&self) -> &str {
        self.image.as_deref().unwrap_or(DEFAULT_IMAGE)
    }

    /// Pod overrides for the given role, if any
    pub fn pod_overrides(&self, role: NodeRole) -> Option<&PodOverrides> {
        match role {
            NodeRole::Management => self.management.as_ref()?.pod_overrides.as_ref(),
            NodeRole::DataNode => self.data_node.pod_overrides.as_ref(),
            NodeRole::SqlGateway => self.sql_gateway.as_ref()?.pod_overrides.as_ref(),
        }
    }

    /// Validate the spec on its own
    pub fn validate(&self) -> Result<(), crate::Error> {
        let problems = validation::spec_problems(self);
        if problems.is_empty() {
            Ok(())
        } else {
            Err(crate::Error::validation(problems.join("; ")))
        }
    }
}

/// Default management server count for a redundancy level
pub fn default_management_node_count(redundancy_level: i32) -> i32 {
    redundancy_level.clamp(1, 2)
}

/// Status for an NdbCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NdbClusterStatus {
    /// Last generation whose spec is fully rolled out and healthy
    #[serde(default)]
    pub processed_generation: i64,

    /// Conditions describing availability and rollout progress
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// `ready/desired` management servers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_management_nodes: Option<String>,

    /// `ready/desired` data nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_data_nodes: Option<String>,

    /// `ready/desired` mysqld replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_sql_gateway_nodes: Option<String>,

    /// Version of the config.ini the workloads are converging to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_version: Option<i64>,
}

impl NdbClusterStatus {
    /// Add a condition, replacing one of the same type.
    ///
    /// The transition time of an unchanged condition is preserved.
    pub fn condition(mut self, condition: Condition) -> Self {
        match self.conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) if existing.same_state(&condition) => {}
            Some(existing) => *existing = condition,
            None => self.conditions.push(condition),
        }
        self
    }

    /// Look up a condition by type
    pub fn get_condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

impl NdbCluster {
    /// `metadata.generation`, 0 if the API server has not assigned one
    pub fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or(0)
    }

    /// `status.processedGeneration`, 0 before the first status write
    pub fn processed_generation(&self) -> i64 {
        self.status.as_ref().map_or(0, |s| s.processed_generation)
    }

    /// True when no reconciliation is owed for the current spec
    pub fn is_spec_processed(&self) -> bool {
        self.processed_generation() == self.generation()
    }

    /// `namespace/name`
    pub fn key(&self) -> String {
        format!(
            "{}/{}",
            self.namespace().unwrap_or_default(),
            self.name_any()
        )
    }
}
