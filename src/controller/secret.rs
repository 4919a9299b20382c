//! Root password Secret of the SQL gateway

use kube::ResourceExt;
use tracing::debug;

use super::client::WorkloadClient;
use super::workload::{Ensured, OwnedWorkload, WorkloadKind};
use crate::crd::NdbCluster;
use crate::resources::{
    root_password_is_generated, root_password_secret, root_password_secret_name, ConfigSummary,
};
use crate::Error;

/// Make sure the Secret the SQL gateway mounts exists.
///
/// A generated Secret is created when missing. A Secret named in the spec
/// belongs to the user and is only looked up; if it is absent the pass
/// fails with [`Error::NotFound`]. `None` when there is no SQL gateway.
pub async fn ensure_root_password_secret(
    cluster: &NdbCluster,
    summary: &ConfigSummary,
    client: &dyn WorkloadClient,
) -> Result<Option<Ensured>, Error> {
    if summary.spec.sql_gateway.is_none() {
        return Ok(None);
    }
    if root_password_is_generated(summary) {
        let secret = OwnedWorkload::from(root_password_secret(cluster, summary));
        return secret.ensure_exists(client).await.map(Some);
    }

    let namespace = cluster.namespace().unwrap_or_default();
    let name = root_password_secret_name(cluster, summary);
    match client.get(WorkloadKind::Secret, &namespace, &name).await? {
        Some(live) => {
            debug!(secret = %name, "using the user's root password Secret");
            Ok(Some(Ensured::Existing(live)))
        }
        None => Err(Error::not_found(format!(
            "Secret {namespace}/{name} named by spec.sqlGateway.rootPasswordSecretName"
        ))),
    }
}
