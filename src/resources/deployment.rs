//! Deployment for the SQL gateway (mysqld)

use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment,
};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, KeyToPath, Probe, SecretVolumeSource, TCPSocketAction, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::config::{
    connect_string, ConfigSummary, CONFIG_DIR, DATA_DIR, MYSQLD_PORT, MY_CNF_KEY,
};
use super::secret::{root_password_secret_name, ROOT_PASSWORD_KEY};
use super::{pod_template, role_metadata, selector_labels, workload_name};
use crate::crd::{NdbCluster, NodeRole};
use crate::ROOT_PASSWORD_SECRET_ANNOTATION;

const ROOT_PASSWORD_VOLUME: &str = "root-password";

/// Deployment running `mysqld --ndbcluster`.
///
/// Pods take any free `[mysqld]` slot, so a rollout must never surge past
/// the slots written into config.ini. The root password Secret is mounted
/// as a file; the Secret itself is ensured by the sync engine.
pub fn sql_gateway_deployment(cluster: &NdbCluster, summary: &ConfigSummary) -> Deployment {
    let role = NodeRole::SqlGateway;
    let secret_name = root_password_secret_name(cluster, summary);

    let mut args = vec![
        "--ndbcluster".to_string(),
        format!("--ndb-connectstring={}", connect_string(cluster, summary)),
        "--user=mysql".to_string(),
    ];
    if summary
        .spec
        .sql_gateway
        .as_ref()
        .is_some_and(|s| s.my_cnf.is_some())
    {
        // --defaults-extra-file must come first
        args.insert(0, format!("--defaults-extra-file={CONFIG_DIR}/{MY_CNF_KEY}"));
    }

    let container = Container {
        name: role.to_string(),
        image: Some(summary.spec.image().to_string()),
        command: Some(vec!["mysqld".to_string()]),
        args: Some(args),
        ports: Some(vec![ContainerPort {
            name: Some("mysql".to_string()),
            container_port: MYSQLD_PORT,
            ..Default::default()
        }]),
        readiness_probe: Some(Probe {
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::Int(MYSQLD_PORT),
                ..Default::default()
            }),
            period_seconds: Some(5),
            ..Default::default()
        }),
        volume_mounts: Some(vec![
            VolumeMount {
                name: "config".to_string(),
                mount_path: CONFIG_DIR.to_string(),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: ROOT_PASSWORD_VOLUME.to_string(),
                mount_path: format!("{DATA_DIR}/auth"),
                read_only: Some(true),
                ..Default::default()
            },
        ]),
        ..Default::default()
    };

    let mut template = pod_template(cluster, summary, role, container);
    if let Some(pod) = template.spec.as_mut() {
        pod.volumes.get_or_insert_with(Vec::new).push(Volume {
            name: ROOT_PASSWORD_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret_name.clone()),
                items: Some(vec![KeyToPath {
                    key: ROOT_PASSWORD_KEY.to_string(),
                    path: ".root-password".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    let mut metadata = role_metadata(cluster, role, workload_name(cluster, role));
    metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(ROOT_PASSWORD_SECRET_ANNOTATION.to_string(), secret_name);

    Deployment {
        metadata,
        spec: Some(DeploymentSpec {
            replicas: Some(summary.replicas(role)),
            selector: LabelSelector {
                match_labels: Some(selector_labels(cluster, role)),
                ..Default::default()
            },
            strategy: Some(DeploymentStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateDeployment {
                    max_surge: Some(IntOrString::Int(0)),
                    max_unavailable: Some(IntOrString::Int(1)),
                }),
            }),
            template,
            ..Default::default()
        }),
        status: None,
    }
}
