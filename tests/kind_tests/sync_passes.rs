//! Integration tests for sync passes against a real API server
//!
//! The sync engine runs in the test process with the same clients the
//! controller uses. Pods never need to start: each story checks the objects
//! and status a pass leaves behind.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;

use ndb_operator::controller::{
    KubeClusterClient, KubeWorkloadClient, ObjectKey, SyncEngine, SyncOutcome, SyncSettings,
    CONDITION_UP_TO_DATE,
};
use ndb_operator::crd::{ConditionStatus, NdbCluster, NodeRole};
use ndb_operator::events::KubeEventPublisher;
use ndb_operator::resources::{
    config_map_name, pdb_name, workload_name, CONFIG_INI_KEY, ROOT_PASSWORD_KEY,
};
use ndb_operator::FIELD_MANAGER;

use super::helpers::{ensure_test_cluster, fresh_namespace, sample_cluster};

fn engine(client: &Client) -> SyncEngine {
    SyncEngine::new(
        Arc::new(KubeClusterClient::new(client.clone())),
        Arc::new(KubeWorkloadClient::new(client.clone())),
        Arc::new(KubeEventPublisher::new(client.clone(), FIELD_MANAGER)),
        SyncSettings::default(),
    )
}

async fn create_cluster(client: &Client, namespace: &str, name: &str) -> NdbCluster {
    let api: Api<NdbCluster> = Api::namespaced(client.clone(), namespace);
    api.create(&PostParams::default(), &sample_cluster(name))
        .await
        .expect("failed to create cluster")
}

/// Story: The first pass lays down everything a cluster owns
///
/// Expected behavior:
/// - The ConfigMap, one Service per role and the data node PDB exist
/// - A root password Secret was generated for the SQL gateway
/// - Both StatefulSets and the SQL gateway Deployment exist
/// - Status reports the resources as just created, with nothing processed
#[tokio::test]
#[ignore = "requires a Kubernetes cluster - run with: cargo test --test kind -- --ignored"]
async fn story_first_pass_creates_owned_objects() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let namespace = "ndb-it-first-pass";
    fresh_namespace(&client, namespace).await;
    let cluster = create_cluster(&client, namespace, "orders").await;

    let outcome = engine(&client)
        .sync(&ObjectKey::new(namespace, "orders"))
        .await
        .expect("sync pass failed");
    assert!(matches!(outcome, SyncOutcome::Incomplete(_)));

    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let config = config_maps
        .get(&config_map_name(&cluster))
        .await
        .expect("config map missing");
    assert!(config
        .data
        .as_ref()
        .is_some_and(|d| d.contains_key(CONFIG_INI_KEY)));

    let services: Api<Service> = Api::namespaced(client.clone(), namespace);
    for role in NodeRole::ALL {
        services
            .get(&workload_name(&cluster, role))
            .await
            .unwrap_or_else(|e| panic!("service for {role} missing: {e}"));
    }

    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = secrets
        .get("orders-mysqld-root-password")
        .await
        .expect("root password secret missing");
    assert!(secret
        .data
        .as_ref()
        .is_some_and(|d| d.contains_key(ROOT_PASSWORD_KEY)));

    let pdbs: Api<PodDisruptionBudget> = Api::namespaced(client.clone(), namespace);
    pdbs.get(&pdb_name(&cluster)).await.expect("pdb missing");

    let statefulsets: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    for role in [NodeRole::Management, NodeRole::DataNode] {
        let sts = statefulsets
            .get(&workload_name(&cluster, role))
            .await
            .unwrap_or_else(|e| panic!("statefulset for {role} missing: {e}"));
        assert_eq!(sts.spec.and_then(|s| s.replicas), Some(2));
    }

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let mysqld = deployments
        .get(&workload_name(&cluster, NodeRole::SqlGateway))
        .await
        .expect("deployment missing");
    assert_eq!(mysqld.spec.and_then(|s| s.replicas), Some(1));

    let clusters: Api<NdbCluster> = Api::namespaced(client, namespace);
    let cluster = clusters.get("orders").await.expect("cluster missing");
    assert_eq!(cluster.processed_generation(), 0);
    let status = cluster.status.expect("status not written");
    let up_to_date = status
        .get_condition(CONDITION_UP_TO_DATE)
        .expect("UpToDate condition missing");
    assert_eq!(up_to_date.status, ConditionStatus::False);
    assert_eq!(up_to_date.reason, "CreatingResources");
    assert_eq!(status.config_version, Some(1));
}

/// Story: Someone deletes the SQL gateway by hand
///
/// The next pass puts it back before doing anything else.
#[tokio::test]
#[ignore = "requires a Kubernetes cluster - run with: cargo test --test kind -- --ignored"]
async fn story_deleted_workload_is_recreated() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let namespace = "ndb-it-recreate";
    fresh_namespace(&client, namespace).await;
    let cluster = create_cluster(&client, namespace, "orders").await;
    let engine = engine(&client);
    let key = ObjectKey::new(namespace, "orders");

    engine.sync(&key).await.expect("first pass failed");

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let name = workload_name(&cluster, NodeRole::SqlGateway);
    deployments
        .delete(&name, &DeleteParams::default().grace_period(0))
        .await
        .expect("failed to delete deployment");
    for _ in 0..30 {
        if deployments.get_opt(&name).await.ok().flatten().is_none() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }

    let outcome = engine.sync(&key).await.expect("second pass failed");
    assert!(matches!(outcome, SyncOutcome::Incomplete(_)));
    assert!(deployments.get_opt(&name).await.expect("get failed").is_some());
}

/// Story: A cluster deleted before the controller gets to it
///
/// The pass finds nothing and asks for no requeue.
#[tokio::test]
#[ignore = "requires a Kubernetes cluster - run with: cargo test --test kind -- --ignored"]
async fn story_missing_cluster_is_skipped() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let namespace = "ndb-it-missing";
    fresh_namespace(&client, namespace).await;

    let outcome = engine(&client)
        .sync(&ObjectKey::new(namespace, "never-created"))
        .await
        .expect("sync pass failed");
    assert_eq!(outcome, SyncOutcome::Skip);
}
