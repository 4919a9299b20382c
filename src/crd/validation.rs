//! Semantic validation of NdbCluster specs and spec transitions
//!
//! Both entry points return every problem found rather than the first one,
//! so a rejected admission request tells the user everything to fix.

use super::cluster::NdbClusterSpec;

/// Largest node id NDB accepts
pub const MAX_NODE_ID: i32 = 255;
/// Data node ceiling in a single cluster
pub const MAX_DATA_NODES: i32 = 144;
/// Upper bound on spare API slots
pub const MAX_FREE_API_SLOTS: i32 = 10;

/// Problems with a spec considered on its own
pub fn spec_problems(spec: &NdbClusterSpec) -> Vec<String> {
    let mut problems = Vec::new();
    let redundancy = spec.redundancy_level;

    if !(1..=4).contains(&redundancy) {
        problems.push(format!(
            "spec.redundancyLevel {redundancy} must be between 1 and 4"
        ));
    }

    if let Some(count) = spec.management.as_ref().and_then(|m| m.node_count) {
        if !(1..=2).contains(&count) {
            problems.push(format!(
                "spec.management.nodeCount {count} must be 1 or 2"
            ));
        }
    }

    let data = spec.data_node.node_count;
    if data < 1 {
        problems.push(format!("spec.dataNode.nodeCount {data} must be at least 1"));
    } else if data > MAX_DATA_NODES {
        problems.push(format!(
            "spec.dataNode.nodeCount {data} exceeds the maximum of {MAX_DATA_NODES}"
        ));
    }
    if redundancy >= 1 && data >= 1 && data % redundancy != 0 {
        problems.push(format!(
            "spec.dataNode.nodeCount {data} must be a multiple of spec.redundancyLevel {redundancy}"
        ));
    }

    if let Some(sql) = &spec.sql_gateway {
        if sql.node_count < 0 {
            problems.push(format!(
                "spec.sqlGateway.nodeCount {} must not be negative",
                sql.node_count
            ));
        }
        if let Some(max) = sql.max_node_count {
            if max < sql.node_count {
                problems.push(format!(
                    "spec.sqlGateway.maxNodeCount {max} must be at least spec.sqlGateway.nodeCount {}",
                    sql.node_count
                ));
            }
        }
        if let Some(my_cnf) = &sql.my_cnf {
            if !has_mysqld_section(my_cnf) {
                problems.push("spec.sqlGateway.myCnf must contain a [mysqld] section".to_string());
            }
        }
        if sql.root_password_secret_name.as_deref().is_some_and(str::is_empty) {
            problems.push("spec.sqlGateway.rootPasswordSecretName must not be empty".to_string());
        }
    }

    if !(0..=MAX_FREE_API_SLOTS).contains(&spec.free_api_slots) {
        problems.push(format!(
            "spec.freeApiSlots {} must be between 0 and {MAX_FREE_API_SLOTS}",
            spec.free_api_slots
        ));
    }

    let ids = spec.node_id_count();
    if ids > MAX_NODE_ID {
        problems.push(format!(
            "cluster needs {ids} node ids but at most {MAX_NODE_ID} are available"
        ));
    }

    problems
}

/// Problems with moving from `old` to `new`, including problems with `new` itself
pub fn update_problems(old: &NdbClusterSpec, new: &NdbClusterSpec) -> Vec<String> {
    let mut problems = spec_problems(new);

    if old.redundancy_level != new.redundancy_level {
        problems.push(format!(
            "spec.redundancyLevel cannot be changed from {} to {}",
            old.redundancy_level, new.redundancy_level
        ));
    }

    if old.management_node_count() != new.management_node_count() {
        problems.push(format!(
            "spec.management.nodeCount cannot be changed from {} to {}",
            old.management_node_count(),
            new.management_node_count()
        ));
    }

    if new.data_node.node_count < old.data_node.node_count {
        problems.push(format!(
            "spec.dataNode.nodeCount cannot be reduced from {} to {}",
            old.data_node.node_count, new.data_node.node_count
        ));
    }

    match (&old.sql_gateway, &new.sql_gateway) {
        (Some(_), None) => {
            problems.push("spec.sqlGateway cannot be removed".to_string());
        }
        (Some(_), Some(_)) => {
            let (before, after) = (
                old.max_sql_gateway_node_count(),
                new.max_sql_gateway_node_count(),
            );
            if after < before {
                problems.push(format!(
                    "spec.sqlGateway.maxNodeCount cannot be reduced from {before} to {after}"
                ));
            }
        }
        _ => {}
    }

    problems
}

fn has_mysqld_section(my_cnf: &str) -> bool {
    my_cnf
        .lines()
        .map(str::trim)
        .any(|line| line.eq_ignore_ascii_case("[mysqld]"))
}
