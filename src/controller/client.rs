//! API access used by the sync engine
//!
//! Both traits are mocked in unit tests and backed by an in-memory fake in
//! multi-pass scenarios; production uses the kube implementations below.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

#[cfg(test)]
use mockall::automock;

use super::workload::{OwnedWorkload, WorkloadKind};
use crate::crd::{NdbCluster, NdbClusterStatus};
use crate::{Error, FIELD_MANAGER};

/// Read and status-write access to NdbCluster objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch a cluster; `None` if it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<NdbCluster>, Error>;

    /// Replace the status of `cluster`, conditional on its resourceVersion.
    ///
    /// Returns the stored object. A stale resourceVersion fails with a 409.
    async fn patch_status(
        &self,
        cluster: &NdbCluster,
        status: &NdbClusterStatus,
    ) -> Result<NdbCluster, Error>;
}

/// Create/read/replace access to owned objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkloadClient: Send + Sync {
    /// Fetch an object; `None` if it does not exist
    async fn get(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<OwnedWorkload>, Error>;

    /// Create an object
    async fn create(&self, workload: &OwnedWorkload) -> Result<OwnedWorkload, Error>;

    /// Replace an object; `metadata.resourceVersion` must be set and current
    async fn replace(&self, workload: &OwnedWorkload) -> Result<OwnedWorkload, Error>;
}

/// [`ClusterClient`] backed by the API server
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Create a new client wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<NdbCluster>, Error> {
        let api: Api<NdbCluster> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_status(
        &self,
        cluster: &NdbCluster,
        status: &NdbClusterStatus,
    ) -> Result<NdbCluster, Error> {
        let namespace = cluster
            .namespace()
            .ok_or_else(|| Error::internal("NdbCluster has no namespace"))?;
        let api: Api<NdbCluster> = Api::namespaced(self.client.clone(), &namespace);

        // resourceVersion in a merge patch makes the write conditional
        let body = json!({
            "metadata": { "resourceVersion": cluster.resource_version() },
            "status": status,
        });
        Ok(api
            .patch_status(
                &cluster.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&body),
            )
            .await?)
    }
}

/// [`WorkloadClient`] backed by the API server
pub struct KubeWorkloadClient {
    client: Client,
}

impl KubeWorkloadClient {
    /// Create a new client wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn post_params() -> PostParams {
    PostParams {
        dry_run: false,
        field_manager: Some(FIELD_MANAGER.to_string()),
    }
}

async fn get_opt<K>(api: Api<K>, name: &str) -> Result<Option<OwnedWorkload>, Error>
where
    K: Resource + Clone + DeserializeOwned + Debug + Into<OwnedWorkload>,
{
    Ok(api.get_opt(name).await?.map(Into::into))
}

async fn create<K>(api: Api<K>, object: &K) -> Result<OwnedWorkload, Error>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug + Into<OwnedWorkload>,
{
    Ok(api.create(&post_params(), object).await?.into())
}

async fn replace<K>(api: Api<K>, object: &K) -> Result<OwnedWorkload, Error>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug + Into<OwnedWorkload>,
{
    Ok(api.replace(&object.name_any(), &post_params(), object).await?.into())
}

#[async_trait]
impl WorkloadClient for KubeWorkloadClient {
    async fn get(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<OwnedWorkload>, Error> {
        match kind {
            WorkloadKind::ConfigMap => get_opt(self.api::<ConfigMap>(namespace), name).await,
            WorkloadKind::Secret => get_opt(self.api::<Secret>(namespace), name).await,
            WorkloadKind::Service => get_opt(self.api::<Service>(namespace), name).await,
            WorkloadKind::PodDisruptionBudget => {
                get_opt(self.api::<PodDisruptionBudget>(namespace), name).await
            }
            WorkloadKind::StatefulSet => get_opt(self.api::<StatefulSet>(namespace), name).await,
            WorkloadKind::Deployment => get_opt(self.api::<Deployment>(namespace), name).await,
        }
    }

    async fn create(&self, workload: &OwnedWorkload) -> Result<OwnedWorkload, Error> {
        let ns = workload.namespace();
        match workload {
            OwnedWorkload::ConfigMap(o) => create(self.api(ns), o).await,
            OwnedWorkload::Secret(o) => create(self.api(ns), o).await,
            OwnedWorkload::Service(o) => create(self.api(ns), o).await,
            OwnedWorkload::PodDisruptionBudget(o) => create(self.api(ns), o).await,
            OwnedWorkload::StatefulSet(o) => create(self.api(ns), o).await,
            OwnedWorkload::Deployment(o) => create(self.api(ns), o).await,
        }
    }

    async fn replace(&self, workload: &OwnedWorkload) -> Result<OwnedWorkload, Error> {
        if workload.meta().resource_version.is_none() {
            return Err(Error::internal(format!(
                "refusing unconditional replace of {}",
                workload.describe()
            )));
        }
        let ns = workload.namespace();
        match workload {
            OwnedWorkload::ConfigMap(o) => replace(self.api(ns), o).await,
            OwnedWorkload::Secret(o) => replace(self.api(ns), o).await,
            OwnedWorkload::Service(o) => replace(self.api(ns), o).await,
            OwnedWorkload::PodDisruptionBudget(o) => replace(self.api(ns), o).await,
            OwnedWorkload::StatefulSet(o) => replace(self.api(ns), o).await,
            OwnedWorkload::Deployment(o) => replace(self.api(ns), o).await,
        }
    }
}
