//! Shared setup for the kind tests

use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, CustomResourceExt};
use serde_json::json;

use ndb_operator::crd::{NdbCluster, NdbClusterSpec};
use ndb_operator::FIELD_MANAGER;

/// Connect with the current kubeconfig and make sure the CRD is served
pub async fn ensure_test_cluster() -> Result<Client, kube::Error> {
    let client = Client::try_default().await?;

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let crd = NdbCluster::crd();
    let name = crd.metadata.name.clone().unwrap_or_default();
    crds.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&crd))
        .await?;

    // The API server needs a moment before the new resource is served
    let clusters: Api<NdbCluster> = Api::all(client.clone());
    for _ in 0..30 {
        if clusters.list(&Default::default()).await.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    Ok(client)
}

/// Delete `name` if it exists, wait for it to go away and create it again
pub async fn fresh_namespace(client: &Client, name: &str) {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let _ = namespaces.delete(name, &DeleteParams::default()).await;
    for _ in 0..120 {
        match namespaces.get_opt(name).await {
            Ok(None) => break,
            _ => tokio::time::sleep(Duration::from_secs(1)).await,
        }
    }

    let namespace: Namespace = serde_json::from_value(json!({
        "metadata": { "name": name }
    }))
    .expect("namespace manifest");
    namespaces
        .create(&PostParams::default(), &namespace)
        .await
        .expect("failed to create namespace");
}

/// A small, already defaulted cluster: 2 management, 2 data, 1 SQL node
pub fn sample_cluster(name: &str) -> NdbCluster {
    let spec: NdbClusterSpec = serde_json::from_value(json!({
        "redundancyLevel": 2,
        "management": { "nodeCount": 2 },
        "dataNode": { "nodeCount": 2 },
        "sqlGateway": { "nodeCount": 1, "maxNodeCount": 2 }
    }))
    .expect("sample spec");
    NdbCluster::new(name, spec)
}
