//! Admission rules for NdbCluster
//!
//! Updates are serialized: while the previous generation is still being
//! rolled out (`status.processedGeneration != metadata.generation`) every
//! spec change is deferred with a retryable conflict.

use json_patch::{AddOperation, PatchOperation};
use jsonptr::PointerBuf;
use serde_json::json;

use super::{AdmissionController, AdmissionDecision};
use crate::crd::{default_management_node_count, validation, NdbCluster};

/// Admission controller for `ndb.dev/v1alpha1` NdbCluster
#[derive(Clone, Debug, Default)]
pub struct NdbClusterAdmission;

impl NdbClusterAdmission {
    /// Create the controller
    pub fn new() -> Self {
        Self
    }
}

fn add(tokens: &[&str], value: serde_json::Value) -> PatchOperation {
    PatchOperation::Add(AddOperation {
        path: PointerBuf::from_tokens(tokens.iter().copied()),
        value,
    })
}

impl AdmissionController for NdbClusterAdmission {
    type Object = NdbCluster;

    fn path_prefix(&self) -> &'static str {
        "ndb"
    }

    fn validate_create(&self, new: &NdbCluster) -> AdmissionDecision {
        AdmissionDecision::from_problems(validation::spec_problems(&new.spec))
    }

    fn validate_update(&self, old: &NdbCluster, new: &NdbCluster) -> AdmissionDecision {
        if !old.is_spec_processed() {
            return AdmissionDecision::Conflict(format!(
                "previous update to NdbCluster {} (generation {}) is still being applied, \
                 processed generation is {}; retry once it completes",
                old.key(),
                old.generation(),
                old.processed_generation()
            ));
        }
        AdmissionDecision::from_problems(validation::update_problems(&old.spec, &new.spec))
    }

    fn mutate(&self, cluster: &NdbCluster) -> Option<Vec<PatchOperation>> {
        let spec = &cluster.spec;
        let mut ops = Vec::new();

        match &spec.sql_gateway {
            None => ops.push(add(
                &["spec", "sqlGateway"],
                json!({"nodeCount": 1, "maxNodeCount": 1}),
            )),
            Some(sql) => {
                // `add` on an existing member replaces it, and also covers an
                // omitted nodeCount that deserialized as 0
                let node_count = if sql.node_count == 0 {
                    ops.push(add(&["spec", "sqlGateway", "nodeCount"], json!(1)));
                    1
                } else {
                    sql.node_count
                };
                match sql.max_node_count {
                    None => ops.push(add(
                        &["spec", "sqlGateway", "maxNodeCount"],
                        json!(node_count),
                    )),
                    Some(max) if max < node_count && sql.node_count == 0 => ops.push(add(
                        &["spec", "sqlGateway", "maxNodeCount"],
                        json!(node_count),
                    )),
                    Some(_) => {}
                }
            }
        }

        let default_mgmd = default_management_node_count(spec.redundancy_level);
        match &spec.management {
            None => ops.push(add(
                &["spec", "management"],
                json!({"nodeCount": default_mgmd}),
            )),
            Some(m) if m.node_count.is_none() => ops.push(add(
                &["spec", "management", "nodeCount"],
                json!(default_mgmd),
            )),
            Some(_) => {}
        }

        if ops.is_empty() {
            None
        } else {
            Some(ops)
        }
    }
}
