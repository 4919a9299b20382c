//! Rendered NDB configuration and the config-version marker
//!
//! The `<cluster>-config` ConfigMap is the record of what the workloads are
//! converging to. It holds the rendered `config.ini` (and `my.cnf`), the
//! monotonically increasing config version, the NdbCluster generation it
//! was rendered from and a snapshot of that generation's spec. Workload
//! manifests are built from the snapshot, never from the live spec, so a
//! later spec change cannot leak into a rollout that is still in progress.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use super::{labels, owner_references, service_fqdn};
use crate::crd::{NdbCluster, NdbClusterSpec, NodeRole};
use crate::Error;

/// ConfigMap key holding config.ini
pub const CONFIG_INI_KEY: &str = "config.ini";
/// ConfigMap key holding my.cnf
pub const MY_CNF_KEY: &str = "my.cnf";
/// ConfigMap key holding the config version
pub const CONFIG_VERSION_KEY: &str = "config-version";
/// ConfigMap key holding the generation the config was rendered from
pub const GENERATION_KEY: &str = "generation";
/// ConfigMap key holding the spec snapshot
pub const SPEC_KEY: &str = "spec.json";

/// Data directory inside NDB containers
pub const DATA_DIR: &str = "/var/lib/ndb";
/// Mount point of the config ConfigMap
pub const CONFIG_DIR: &str = "/var/lib/ndb/config";

/// Management server port
pub const MGMD_PORT: i32 = 1186;
/// Data node transporter port
pub const NDBD_PORT: i32 = 11860;
/// MySQL protocol port
pub const MYSQLD_PORT: i32 = 3306;

/// What the workloads of a cluster are converging to
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigSummary {
    /// Monotonic config version, starting at 1
    pub config_version: i64,
    /// NdbCluster generation this config was rendered from
    pub generation: i64,
    /// Spec snapshot of that generation
    pub spec: NdbClusterSpec,
}

impl ConfigSummary {
    /// Snapshot the live spec of `cluster` as `config_version`
    pub fn from_cluster(cluster: &NdbCluster, config_version: i64) -> Self {
        Self {
            config_version,
            generation: cluster.generation(),
            spec: cluster.spec.clone(),
        }
    }

    /// Read the summary back from a stored ConfigMap
    pub fn from_config_map(cm: &ConfigMap) -> Result<Self, Error> {
        let name = cm.name_any();
        let data = cm
            .data
            .as_ref()
            .ok_or_else(|| Error::internal(format!("ConfigMap {name} has no data")))?;
        let field = |key: &str| {
            data.get(key)
                .ok_or_else(|| Error::internal(format!("ConfigMap {name} is missing {key}")))
        };
        let number = |key: &str| -> Result<i64, Error> {
            field(key)?.trim().parse().map_err(|e| {
                Error::internal(format!("ConfigMap {name} has a malformed {key}: {e}"))
            })
        };

        Ok(Self {
            config_version: number(CONFIG_VERSION_KEY)?,
            generation: number(GENERATION_KEY)?,
            spec: serde_json::from_str(field(SPEC_KEY)?).map_err(|e| {
                Error::internal(format!("ConfigMap {name} has a malformed spec: {e}"))
            })?,
        })
    }

    /// Replica count for a role under this config
    pub fn replicas(&self, role: NodeRole) -> i32 {
        match role {
            NodeRole::Management => self.spec.management_node_count(),
            NodeRole::DataNode => self.spec.data_node.node_count,
            NodeRole::SqlGateway => self.spec.sql_gateway_node_count(),
        }
    }
}

/// Name of the config ConfigMap of a cluster
pub fn config_map_name(cluster: &NdbCluster) -> String {
    format!("{}-config", cluster.name_any())
}

/// Build the config ConfigMap for `summary`
pub fn config_map(cluster: &NdbCluster, summary: &ConfigSummary) -> Result<ConfigMap, Error> {
    let mut data = BTreeMap::from([
        (CONFIG_INI_KEY.to_string(), render_config_ini(cluster, summary)),
        (CONFIG_VERSION_KEY.to_string(), summary.config_version.to_string()),
        (GENERATION_KEY.to_string(), summary.generation.to_string()),
        (SPEC_KEY.to_string(), serde_json::to_string(&summary.spec)?),
    ]);
    if let Some(my_cnf) = summary.spec.sql_gateway.as_ref().and_then(|s| s.my_cnf.clone()) {
        data.insert(MY_CNF_KEY.to_string(), my_cnf);
    }

    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(config_map_name(cluster)),
            namespace: cluster.namespace(),
            labels: Some(labels(cluster, None)),
            owner_references: owner_references(cluster),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    })
}

/// Management server connect string, e.g. `host-0:1186,host-1:1186`
pub fn connect_string(cluster: &NdbCluster, summary: &ConfigSummary) -> String {
    (0..summary.replicas(NodeRole::Management))
        .map(|i| format!("{}:{MGMD_PORT}", pod_host(cluster, NodeRole::Management, i)))
        .collect::<Vec<_>>()
        .join(",")
}

fn pod_host(cluster: &NdbCluster, role: NodeRole, ordinal: i32) -> String {
    format!(
        "{}-{ordinal}.{}",
        super::workload_name(cluster, role),
        service_fqdn(cluster, role)
    )
}

/// Render config.ini.
///
/// Node ids are assigned in order: management servers from 1, then data
/// nodes, then one `[mysqld]` slot per allowed SQL gateway replica, then the
/// spare `[api]` slots.
pub fn render_config_ini(cluster: &NdbCluster, summary: &ConfigSummary) -> String {
    let spec = &summary.spec;
    let mut lines = vec![
        "# Rendered by ndb-operator, do not edit".to_string(),
        "[system]".to_string(),
        format!("ConfigGenerationNumber={}", summary.config_version),
        format!("Name={}", cluster.name_any()),
        String::new(),
        "[ndbd default]".to_string(),
        format!("NoOfReplicas={}", spec.redundancy_level),
        format!("DataDir={DATA_DIR}/data"),
        format!("ServerPort={NDBD_PORT}"),
    ];
    lines.extend(spec.data_node.config.iter().map(|(k, v)| format!("{k}={v}")));
    lines.extend([
        String::new(),
        "[tcp default]".to_string(),
        "AllowUnresolvedHostnames=1".to_string(),
    ]);

    let mut node_id = 1;
    let mut section = |lines: &mut Vec<String>, header: &str, extra: Vec<String>| {
        lines.push(String::new());
        lines.push(header.to_string());
        lines.push(format!("NodeId={node_id}"));
        lines.extend(extra);
        node_id += 1;
    };

    for i in 0..summary.replicas(NodeRole::Management) {
        let host = pod_host(cluster, NodeRole::Management, i);
        section(
            &mut lines,
            "[ndb_mgmd]",
            vec![format!("Hostname={host}"), format!("DataDir={DATA_DIR}")],
        );
    }
    for i in 0..summary.replicas(NodeRole::DataNode) {
        let host = pod_host(cluster, NodeRole::DataNode, i);
        section(&mut lines, "[ndbd]", vec![format!("Hostname={host}")]);
    }
    for _ in 0..spec.max_sql_gateway_node_count() {
        section(&mut lines, "[mysqld]", Vec::new());
    }
    for _ in 0..spec.free_api_slots {
        section(&mut lines, "[api]", Vec::new());
    }

    lines.push(String::new());
    lines.join("\n")
}
