//! MySQL root password Secret for the SQL gateway

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use rand::distributions::Alphanumeric;
use rand::Rng;

use super::config::ConfigSummary;
use super::role_metadata;
use crate::crd::{NdbCluster, NodeRole};

/// Key the password is stored under, as in a `kubernetes.io/basic-auth` Secret
pub const ROOT_PASSWORD_KEY: &str = "password";

const GENERATED_PASSWORD_LEN: usize = 16;

/// Name of the root password Secret: the user's own Secret when the spec
/// names one, otherwise the generated `<cluster>-mysqld-root-password`
pub fn root_password_secret_name(cluster: &NdbCluster, summary: &ConfigSummary) -> String {
    summary
        .spec
        .sql_gateway
        .as_ref()
        .and_then(|s| s.root_password_secret_name.clone())
        .unwrap_or_else(|| format!("{}-mysqld-root-password", cluster.name_any()))
}

/// True if the Secret is generated by the operator rather than supplied
pub fn root_password_is_generated(summary: &ConfigSummary) -> bool {
    summary
        .spec
        .sql_gateway
        .as_ref()
        .is_some_and(|s| s.root_password_secret_name.is_none())
}

/// Generated root password Secret with a fresh random password.
///
/// Only ever created, never replaced, so the password is stable for the
/// life of the cluster.
pub fn root_password_secret(cluster: &NdbCluster, summary: &ConfigSummary) -> Secret {
    let name = root_password_secret_name(cluster, summary);
    Secret {
        metadata: role_metadata(cluster, NodeRole::SqlGateway, name),
        type_: Some("kubernetes.io/basic-auth".to_string()),
        string_data: Some(BTreeMap::from([(
            ROOT_PASSWORD_KEY.to_string(),
            generate_password(),
        )])),
        ..Default::default()
    }
}

fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}
