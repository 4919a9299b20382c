//! Services and the data node disruption budget

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use super::config::{MGMD_PORT, MYSQLD_PORT, NDBD_PORT};
use super::{role_metadata, selector_labels, workload_name};
use crate::crd::{NdbCluster, NodeRole};

/// Service for a role.
///
/// Management servers and data nodes get headless Services that publish
/// not-ready pods, since NDB nodes must resolve each other to become
/// ready at all. The SQL gateway gets a regular ClusterIP Service.
pub fn governing_service(cluster: &NdbCluster, role: NodeRole) -> Service {
    let (port_name, port, headless) = match role {
        NodeRole::Management => ("mgmd", MGMD_PORT, true),
        NodeRole::DataNode => ("ndbd", NDBD_PORT, true),
        NodeRole::SqlGateway => ("mysql", MYSQLD_PORT, false),
    };

    Service {
        metadata: role_metadata(cluster, role, workload_name(cluster, role)),
        spec: Some(ServiceSpec {
            cluster_ip: headless.then(|| "None".to_string()),
            publish_not_ready_addresses: headless.then_some(true),
            selector: Some(selector_labels(cluster, role)),
            ports: Some(vec![ServicePort {
                name: Some(port_name.to_string()),
                port,
                target_port: Some(IntOrString::Int(port)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Name of the data node PodDisruptionBudget
pub fn pdb_name(cluster: &NdbCluster) -> String {
    format!("{}-{}-pdb", cluster.name_any(), NodeRole::DataNode)
}

/// At most one data node may be voluntarily evicted at a time
pub fn data_node_pdb(cluster: &NdbCluster) -> PodDisruptionBudget {
    PodDisruptionBudget {
        metadata: role_metadata(cluster, NodeRole::DataNode, pdb_name(cluster)),
        spec: Some(PodDisruptionBudgetSpec {
            max_unavailable: Some(IntOrString::Int(1)),
            selector: Some(LabelSelector {
                match_labels: Some(selector_labels(cluster, NodeRole::DataNode)),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    }
}
