//! Manifests for the objects an NdbCluster owns
//!
//! Every builder is a pure function of the NdbCluster (identity, owner
//! reference) and a [`ConfigSummary`] (everything else). Pod controllers
//! carry the summary's config version as a template annotation, which is how
//! the sync engine tells whether a workload is up to date.

mod config;
mod deployment;
mod secret;
mod service;
mod statefulset;

pub use config::{
    config_map, config_map_name, connect_string, render_config_ini, ConfigSummary,
    CONFIG_INI_KEY, CONFIG_VERSION_KEY, GENERATION_KEY, MGMD_PORT, MYSQLD_PORT, MY_CNF_KEY,
    NDBD_PORT, SPEC_KEY,
};
pub use deployment::sql_gateway_deployment;
pub use secret::{
    root_password_is_generated, root_password_secret, root_password_secret_name, ROOT_PASSWORD_KEY,
};
pub use service::{data_node_pdb, governing_service, pdb_name};
pub use statefulset::{data_node_statefulset, management_statefulset};

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, PodSpec, PodTemplateSpec, ResourceRequirements, Volume,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use crate::controller::OwnedWorkload;
use crate::crd::{NdbCluster, NodeRole};
use crate::{Error, CLUSTER_LABEL, CONFIG_VERSION_ANNOTATION, NODE_TYPE_LABEL};

/// Name of the pod controller (and governing Service) of a role
pub fn workload_name(cluster: &NdbCluster, role: NodeRole) -> String {
    format!("{}-{}", cluster.name_any(), role)
}

/// In-cluster DNS name of the Service of a role
pub fn service_fqdn(cluster: &NdbCluster, role: NodeRole) -> String {
    format!(
        "{}.{}.svc.cluster.local",
        workload_name(cluster, role),
        cluster.namespace().unwrap_or_default()
    )
}

/// Labels for an owned object. The node-type label is added for a role.
pub fn labels(cluster: &NdbCluster, role: Option<NodeRole>) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([
        (CLUSTER_LABEL.to_string(), cluster.name_any()),
        (
            "app.kubernetes.io/managed-by".to_string(),
            crate::FIELD_MANAGER.to_string(),
        ),
    ]);
    if let Some(role) = role {
        labels.insert(NODE_TYPE_LABEL.to_string(), role.to_string());
    }
    labels
}

/// Pod selector for a role
pub fn selector_labels(cluster: &NdbCluster, role: NodeRole) -> BTreeMap<String, String> {
    BTreeMap::from([
        (CLUSTER_LABEL.to_string(), cluster.name_any()),
        (NODE_TYPE_LABEL.to_string(), role.to_string()),
    ])
}

/// Controller owner reference to `cluster`, if it has been persisted
pub fn owner_references(cluster: &NdbCluster) -> Option<Vec<OwnerReference>> {
    cluster.controller_owner_ref(&()).map(|r| vec![r])
}

/// Object metadata shared by all role objects
fn role_metadata(cluster: &NdbCluster, role: NodeRole, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: cluster.namespace(),
        labels: Some(labels(cluster, Some(role))),
        owner_references: owner_references(cluster),
        ..Default::default()
    }
}

fn quantities(values: &BTreeMap<String, String>) -> Option<BTreeMap<String, Quantity>> {
    if values.is_empty() {
        return None;
    }
    Some(
        values
            .iter()
            .map(|(k, v)| (k.clone(), Quantity(v.clone())))
            .collect(),
    )
}

/// Pod template for a role: config volume, config-version annotation and
/// the role's pod overrides
fn pod_template(
    cluster: &NdbCluster,
    summary: &ConfigSummary,
    role: NodeRole,
    mut container: Container,
) -> PodTemplateSpec {
    let overrides = summary.spec.pod_overrides(role);

    let mut annotations = overrides.map(|o| o.annotations.clone()).unwrap_or_default();
    annotations.insert(
        CONFIG_VERSION_ANNOTATION.to_string(),
        summary.config_version.to_string(),
    );

    if let Some(o) = overrides {
        if !o.requests.is_empty() || !o.limits.is_empty() {
            container.resources = Some(ResourceRequirements {
                requests: quantities(&o.requests),
                limits: quantities(&o.limits),
                ..Default::default()
            });
        }
    }

    let mut pod_labels = labels(cluster, Some(role));
    pod_labels.extend(selector_labels(cluster, role));

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(pod_labels),
            annotations: Some(annotations),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![container],
            node_selector: overrides
                .filter(|o| !o.node_selector.is_empty())
                .map(|o| o.node_selector.clone()),
            volumes: Some(vec![Volume {
                name: "config".to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: config_map_name(cluster),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

/// Pod controller for `role`, or `None` if the role is not deployed under
/// this config
pub fn pod_controller(
    cluster: &NdbCluster,
    summary: &ConfigSummary,
    role: NodeRole,
) -> Option<OwnedWorkload> {
    match role {
        NodeRole::Management => Some(management_statefulset(cluster, summary).into()),
        NodeRole::DataNode => Some(data_node_statefulset(cluster, summary).into()),
        NodeRole::SqlGateway => summary
            .spec
            .sql_gateway
            .as_ref()
            .map(|_| sql_gateway_deployment(cluster, summary).into()),
    }
}

/// Everything except the config ConfigMap, in creation order: Services and
/// the disruption budget before the pods that rely on them
pub fn desired_workloads(
    cluster: &NdbCluster,
    summary: &ConfigSummary,
) -> Result<Vec<OwnedWorkload>, Error> {
    if cluster.namespace().is_none() {
        return Err(Error::internal(format!(
            "NdbCluster {} has no namespace",
            cluster.name_any()
        )));
    }

    let mut objects: Vec<OwnedWorkload> = NodeRole::ALL
        .into_iter()
        .filter(|role| *role != NodeRole::SqlGateway || summary.spec.sql_gateway.is_some())
        .map(|role| governing_service(cluster, role).into())
        .collect();
    objects.push(data_node_pdb(cluster).into());
    objects.extend(
        NodeRole::ALL
            .into_iter()
            .filter_map(|role| pod_controller(cluster, summary, role)),
    );
    Ok(objects)
}


#[cfg(test)]
mod tests {
    use super::testing::sample_cluster;
    use super::*;
    use crate::controller::{WorkloadKind, WorkloadState};
    use crate::crd::PodOverrides;

    #[test]
    fn test_desired_workloads_in_creation_order() {
        let cluster = sample_cluster();
        let summary = ConfigSummary::from_cluster(&cluster, 1);
        let kinds: Vec<_> = desired_workloads(&cluster, &summary)
            .unwrap()
            .iter()
            .map(|w| w.kind())
            .collect();
        assert_eq!(
            kinds,
            vec![
                WorkloadKind::Service,
                WorkloadKind::Service,
                WorkloadKind::Service,
                WorkloadKind::PodDisruptionBudget,
                WorkloadKind::StatefulSet,
                WorkloadKind::StatefulSet,
                WorkloadKind::Deployment,
            ]
        );
    }

    #[test]
    fn test_no_sql_gateway_objects_without_sql_gateway() {
        let mut cluster = sample_cluster();
        cluster.spec.sql_gateway = None;
        let summary = ConfigSummary::from_cluster(&cluster, 1);
        let objects = desired_workloads(&cluster, &summary).unwrap();
        assert_eq!(objects.len(), 5);
        assert!(pod_controller(&cluster, &summary, NodeRole::SqlGateway).is_none());
    }

    /// Story: every owned object points back at its cluster
    ///
    /// Labels let the router find the owner; the controller owner reference
    /// lets the platform garbage-collect everything when the cluster goes.
    #[test]
    fn story_owned_objects_are_labelled_and_owned() {
        let cluster = sample_cluster();
        let summary = ConfigSummary::from_cluster(&cluster, 3);
        for object in desired_workloads(&cluster, &summary).unwrap() {
            assert_eq!(
                object.cluster_key().map(|k| k.to_string()),
                Some("db/example".to_string()),
                "{}",
                object.describe()
            );
            let owners = object.meta().owner_references.clone().unwrap();
            assert_eq!(owners[0].kind, "NdbCluster");
            assert_eq!(owners[0].controller, Some(true));
            // Freshly built objects have no status
            if object.pod_role().is_some() {
                assert!(!object.is_ready());
                assert_eq!(object.config_version(), Some(3));
            }
        }
    }

    #[test]
    fn test_pod_overrides_are_applied() {
        let mut cluster = sample_cluster();
        cluster.spec.data_node.pod_overrides = Some(PodOverrides {
            annotations: BTreeMap::from([("team".to_string(), "storage".to_string())]),
            node_selector: BTreeMap::from([("disk".to_string(), "nvme".to_string())]),
            requests: BTreeMap::from([("memory".to_string(), "4Gi".to_string())]),
            limits: BTreeMap::new(),
        });
        let summary = ConfigSummary::from_cluster(&cluster, 1);
        let sts = data_node_statefulset(&cluster, &summary);
        let template = sts.spec.unwrap().template;

        let annotations = template.metadata.unwrap().annotations.unwrap();
        assert_eq!(annotations["team"], "storage");
        assert_eq!(annotations[CONFIG_VERSION_ANNOTATION], "1");

        let pod = template.spec.unwrap();
        assert_eq!(pod.node_selector.unwrap()["disk"], "nvme");
        let resources = pod.containers[0].resources.clone().unwrap();
        assert_eq!(resources.requests.unwrap()["memory"], Quantity("4Gi".to_string()));
        assert!(resources.limits.is_none());
    }

    #[test]
    fn test_cluster_without_namespace_is_rejected() {
        let mut cluster = sample_cluster();
        cluster.metadata.namespace = None;
        let summary = ConfigSummary::from_cluster(&cluster, 1);
        assert!(desired_workloads(&cluster, &summary).is_err());
    }
}
