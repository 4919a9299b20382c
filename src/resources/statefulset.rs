//! StatefulSets for management servers and data nodes
//!
//! Node ids come from the pod ordinal, matching the order config.ini
//! assigns them in: mgmd-N is node N+1, ndbmtd-N follows the last mgmd.

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, Probe, TCPSocketAction, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::config::{connect_string, ConfigSummary, CONFIG_DIR, DATA_DIR, MGMD_PORT, NDBD_PORT};
use super::{pod_template, role_metadata, selector_labels, workload_name};
use crate::crd::{NdbCluster, NodeRole};

fn config_mount() -> VolumeMount {
    VolumeMount {
        name: "config".to_string(),
        mount_path: CONFIG_DIR.to_string(),
        read_only: Some(true),
        ..Default::default()
    }
}

fn shell(script: String) -> Option<Vec<String>> {
    Some(vec!["/bin/sh".to_string(), "-c".to_string(), script])
}

fn statefulset(
    cluster: &NdbCluster,
    summary: &ConfigSummary,
    role: NodeRole,
    container: Container,
) -> StatefulSet {
    let name = workload_name(cluster, role);
    StatefulSet {
        metadata: role_metadata(cluster, role, name.clone()),
        spec: Some(StatefulSetSpec {
            replicas: Some(summary.replicas(role)),
            service_name: name,
            pod_management_policy: Some("Parallel".to_string()),
            selector: LabelSelector {
                match_labels: Some(selector_labels(cluster, role)),
                ..Default::default()
            },
            template: pod_template(cluster, summary, role, container),
            ..Default::default()
        }),
        status: None,
    }
}

/// StatefulSet running `ndb_mgmd`
pub fn management_statefulset(cluster: &NdbCluster, summary: &ConfigSummary) -> StatefulSet {
    let container = Container {
        name: NodeRole::Management.to_string(),
        image: Some(summary.spec.image().to_string()),
        command: shell(format!(
            "exec ndb_mgmd --nodaemon --config-cache=0 \
             --config-file={CONFIG_DIR}/config.ini \
             --ndb-nodeid=$(( ${{HOSTNAME##*-}} + 1 ))"
        )),
        ports: Some(vec![ContainerPort {
            name: Some("mgmd".to_string()),
            container_port: MGMD_PORT,
            ..Default::default()
        }]),
        readiness_probe: Some(Probe {
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::Int(MGMD_PORT),
                ..Default::default()
            }),
            period_seconds: Some(5),
            ..Default::default()
        }),
        volume_mounts: Some(vec![config_mount()]),
        ..Default::default()
    };
    statefulset(cluster, summary, NodeRole::Management, container)
}

/// StatefulSet running `ndbmtd`
pub fn data_node_statefulset(cluster: &NdbCluster, summary: &ConfigSummary) -> StatefulSet {
    let first_id = summary.replicas(NodeRole::Management) + 1;
    let container = Container {
        name: NodeRole::DataNode.to_string(),
        image: Some(summary.spec.image().to_string()),
        command: shell(format!(
            "mkdir -p {DATA_DIR}/data && exec ndbmtd --nodaemon \
             --ndb-connectstring={} \
             --ndb-nodeid=$(( ${{HOSTNAME##*-}} + {first_id} ))",
            connect_string(cluster, summary)
        )),
        ports: Some(vec![ContainerPort {
            name: Some("ndbd".to_string()),
            container_port: NDBD_PORT,
            ..Default::default()
        }]),
        readiness_probe: Some(Probe {
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::Int(NDBD_PORT),
                ..Default::default()
            }),
            period_seconds: Some(5),
            ..Default::default()
        }),
        volume_mounts: Some(vec![config_mount()]),
        ..Default::default()
    };
    statefulset(cluster, summary, NodeRole::DataNode, container)
}
