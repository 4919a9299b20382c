//! Integration tests for CRD operations
//!
//! These tests tell the story of how users interact with NdbCluster resources
//! through the Kubernetes API, and of the API server behavior the operator
//! relies on.

use kube::api::{Api, Patch, PatchParams, PostParams};
use serde_json::json;

use ndb_operator::crd::NdbCluster;
use ndb_operator::FIELD_MANAGER;

use super::helpers::{ensure_test_cluster, fresh_namespace, sample_cluster};

/// Story: Database operator declares a new NDB cluster
///
/// The resource is persisted as written, starts at generation 1 and has no
/// status until the controller's first pass.
#[tokio::test]
#[ignore = "requires a Kubernetes cluster - run with: cargo test --test kind -- --ignored"]
async fn story_operator_creates_cluster() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let namespace = "ndb-it-create";
    fresh_namespace(&client, namespace).await;
    let api: Api<NdbCluster> = Api::namespaced(client, namespace);

    let created = api
        .create(&PostParams::default(), &sample_cluster("orders"))
        .await
        .expect("failed to create cluster");

    assert_eq!(created.generation(), 1);
    assert_eq!(created.processed_generation(), 0);
    assert!(!created.is_spec_processed());

    let fetched = api.get("orders").await.expect("failed to get cluster");
    assert_eq!(fetched.spec, created.spec);
    assert_eq!(fetched.spec.management_node_count(), 2);
    assert_eq!(fetched.spec.max_sql_gateway_node_count(), 2);
}

/// Story: The controller records progress without disturbing the spec
///
/// Writes through the status subresource must not bump the generation,
/// otherwise every status write would look like a new spec to sync.
#[tokio::test]
#[ignore = "requires a Kubernetes cluster - run with: cargo test --test kind -- --ignored"]
async fn story_status_writes_keep_generation() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let namespace = "ndb-it-status";
    fresh_namespace(&client, namespace).await;
    let api: Api<NdbCluster> = Api::namespaced(client, namespace);
    api.create(&PostParams::default(), &sample_cluster("orders"))
        .await
        .expect("failed to create cluster");

    let patch = json!({
        "apiVersion": "ndb.dev/v1alpha1",
        "kind": "NdbCluster",
        "status": { "processedGeneration": 1, "configVersion": 1 }
    });
    let updated = api
        .patch_status(
            "orders",
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&patch),
        )
        .await
        .expect("failed to patch status");

    assert_eq!(updated.generation(), 1);
    assert!(updated.is_spec_processed());
    assert_eq!(updated.status.and_then(|s| s.config_version), Some(1));
}

/// Story: Database operator grows the data tier
///
/// A spec change bumps the generation past the processed one, which is what
/// holds further changes back until the controller catches up.
#[tokio::test]
#[ignore = "requires a Kubernetes cluster - run with: cargo test --test kind -- --ignored"]
async fn story_spec_change_bumps_generation() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let namespace = "ndb-it-scale";
    fresh_namespace(&client, namespace).await;
    let api: Api<NdbCluster> = Api::namespaced(client, namespace);
    api.create(&PostParams::default(), &sample_cluster("orders"))
        .await
        .expect("failed to create cluster");

    let patch = json!({ "spec": { "dataNode": { "nodeCount": 4 } } });
    let updated = api
        .patch("orders", &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .expect("failed to patch spec");

    assert_eq!(updated.generation(), 2);
    assert_eq!(updated.spec.data_node.node_count, 4);
    assert!(!updated.is_spec_processed());
}
