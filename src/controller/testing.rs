//! In-memory API server for multi-pass tests
//!
//! Implements both client traits over one store with resourceVersion
//! preconditions. Replacing a pod controller bumps its generation and keeps
//! the old status, so it reads as not ready until [`FakeCluster::mark_all_ready`]
//! plays the part of the platform. Disruption budgets start without status
//! for the same reason.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DeploymentStatus, StatefulSetStatus};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::api::policy::v1::PodDisruptionBudgetStatus;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::ErrorResponse;
use kube::ResourceExt;

use super::client::{ClusterClient, WorkloadClient};
use super::key::ObjectKey;
use super::workload::{OwnedWorkload, WorkloadKind};
use crate::crd::{NdbCluster, NdbClusterStatus};
use crate::Error;

type Hook = Box<dyn FnOnce(&mut NdbCluster) + Send>;

#[derive(Default)]
struct Store {
    clusters: BTreeMap<String, NdbCluster>,
    workloads: BTreeMap<(WorkloadKind, String), OwnedWorkload>,
    next_version: u64,
    failing_status_writes: u32,
    on_status_conflict: Option<Hook>,
    writes: Vec<String>,
}

impl Store {
    fn bump(&mut self) -> Option<String> {
        self.next_version += 1;
        Some(self.next_version.to_string())
    }

    fn edit_cluster(&mut self, id: &str, edit: impl FnOnce(&mut NdbCluster)) {
        let version = self.bump();
        let cluster = self.clusters.get_mut(id).expect("unknown cluster");
        let before = cluster.spec.clone();
        edit(cluster);
        if cluster.spec != before {
            cluster.metadata.generation = Some(cluster.generation() + 1);
        }
        cluster.metadata.resource_version = version;
    }
}

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

fn workload_id(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Shared handle to the in-memory store
#[derive(Clone, Default)]
pub struct FakeCluster {
    store: Arc<Mutex<Store>>,
}

impl FakeCluster {
    fn store(&self) -> std::sync::MutexGuard<'_, Store> {
        self.store.lock().unwrap()
    }

    /// Persist a new NdbCluster as the API server would on create
    pub fn create_cluster(&self, mut cluster: NdbCluster) -> NdbCluster {
        let mut store = self.store();
        let meta = &mut cluster.metadata;
        meta.namespace.get_or_insert_with(|| "db".to_string());
        meta.uid
            .get_or_insert_with(|| "4b1f7c2e-0000-4000-8000-000000000001".to_string());
        meta.generation = Some(1);
        meta.resource_version = store.bump();
        store.clusters.insert(cluster.key(), cluster.clone());
        cluster
    }

    /// Edit a stored cluster; a spec change bumps the generation
    pub fn update_cluster(&self, key: &ObjectKey, edit: impl FnOnce(&mut NdbCluster)) {
        self.store().edit_cluster(key.as_str(), edit);
    }

    /// Stored copy of a cluster
    pub fn cluster(&self, key: &ObjectKey) -> NdbCluster {
        self.store().clusters[key.as_str()].clone()
    }

    /// Stored copy of an owned object
    pub fn workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Option<OwnedWorkload> {
        self.store()
            .workloads
            .get(&(kind, workload_id(namespace, name)))
            .cloned()
    }

    /// Remove an owned object
    pub fn delete_workload(&self, kind: WorkloadKind, namespace: &str, name: &str) {
        self.store().workloads.remove(&(kind, workload_id(namespace, name)));
    }

    /// Store a config ConfigMap that cannot be parsed
    pub fn corrupt_config_map(&self, key: &ObjectKey) {
        let cluster = self.cluster(key);
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(crate::resources::config_map_name(&cluster)),
                namespace: cluster.namespace(),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                crate::resources::CONFIG_VERSION_KEY.to_string(),
                "not-a-number".to_string(),
            )])),
            ..Default::default()
        };
        self.put(OwnedWorkload::from(cm));
    }

    /// Store a Secret the way a user would, outside the write log
    pub fn put_secret(&self, namespace: &str, name: &str) {
        self.put(OwnedWorkload::from(Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            string_data: Some(BTreeMap::from([(
                crate::resources::ROOT_PASSWORD_KEY.to_string(),
                "hunter2".to_string(),
            )])),
            ..Default::default()
        }));
    }

    fn put(&self, mut object: OwnedWorkload) {
        let mut store = self.store();
        object.meta_mut().resource_version = store.bump();
        let id = workload_id(object.namespace(), object.name());
        store.workloads.insert((object.kind(), id), object);
    }

    /// Make every pod controller report all replicas updated and ready, and
    /// every disruption budget healthy
    pub fn mark_all_ready(&self) {
        let mut store = self.store();
        let keys: Vec<_> = store.workloads.keys().cloned().collect();
        for key in keys {
            let version = store.bump();
            let Some(object) = store.workloads.get_mut(&key) else {
                continue;
            };
            let generation = object.meta().generation;
            let replicas = object.desired_replicas().unwrap_or(0);
            match object {
                OwnedWorkload::StatefulSet(sts) => {
                    sts.status = Some(StatefulSetStatus {
                        replicas,
                        ready_replicas: Some(replicas),
                        updated_replicas: Some(replicas),
                        current_replicas: Some(replicas),
                        observed_generation: generation,
                        ..Default::default()
                    });
                }
                OwnedWorkload::Deployment(deploy) => {
                    deploy.status = Some(DeploymentStatus {
                        replicas: Some(replicas),
                        ready_replicas: Some(replicas),
                        updated_replicas: Some(replicas),
                        available_replicas: Some(replicas),
                        observed_generation: generation,
                        ..Default::default()
                    });
                }
                OwnedWorkload::PodDisruptionBudget(pdb) => {
                    pdb.status = Some(PodDisruptionBudgetStatus {
                        current_healthy: 2,
                        desired_healthy: 1,
                        disruptions_allowed: 1,
                        expected_pods: 2,
                        observed_generation: generation,
                        ..Default::default()
                    });
                }
                _ => continue,
            }
            object.meta_mut().resource_version = version;
        }
    }

    /// Make every disruption budget report fewer healthy pods than it needs
    pub fn degrade_disruption_budgets(&self) {
        let mut store = self.store();
        let version = store.bump();
        for object in store.workloads.values_mut() {
            if let OwnedWorkload::PodDisruptionBudget(pdb) = object {
                pdb.status = Some(PodDisruptionBudgetStatus {
                    current_healthy: 1,
                    desired_healthy: 2,
                    disruptions_allowed: 0,
                    expected_pods: 2,
                    observed_generation: pdb.metadata.generation,
                    ..Default::default()
                });
                pdb.metadata.resource_version = version.clone();
            }
        }
    }

    /// Fail the next `n` status writes with a 409, as if another writer won
    pub fn fail_next_status_writes(&self, n: u32) {
        self.store().failing_status_writes = n;
    }

    /// Edit the stored cluster when the next injected status conflict fires
    pub fn on_status_conflict(&self, edit: impl FnOnce(&mut NdbCluster) + Send + 'static) {
        self.store().on_status_conflict = Some(Box::new(edit));
    }

    /// Log of writes: `create|replace Kind ns/name` and `status ns/name`
    pub fn writes(&self) -> Vec<String> {
        self.store().writes.clone()
    }

    /// Forget the write log
    pub fn clear_writes(&self) {
        self.store().writes.clear();
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<NdbCluster>, Error> {
        Ok(self
            .store()
            .clusters
            .get(&workload_id(namespace, name))
            .cloned())
    }

    async fn patch_status(
        &self,
        cluster: &NdbCluster,
        status: &NdbClusterStatus,
    ) -> Result<NdbCluster, Error> {
        let mut store = self.store();
        let id = cluster.key();

        if store.failing_status_writes > 0 {
            store.failing_status_writes -= 1;
            let hook = store.on_status_conflict.take();
            store.edit_cluster(&id, |c| {
                if let Some(hook) = hook {
                    hook(c);
                }
            });
            return Err(api_error(409, "Conflict", format!("{id} was modified")));
        }

        let version = store.bump();
        let stored = store
            .clusters
            .get_mut(&id)
            .ok_or_else(|| api_error(404, "NotFound", format!("{id} not found")))?;
        if stored.metadata.resource_version != cluster.metadata.resource_version {
            return Err(api_error(409, "Conflict", format!("{id} was modified")));
        }
        stored.status = Some(status.clone());
        stored.metadata.resource_version = version;
        let stored = stored.clone();
        store.writes.push(format!("status {id}"));
        Ok(stored)
    }
}

#[async_trait]
impl WorkloadClient for FakeCluster {
    async fn get(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<OwnedWorkload>, Error> {
        Ok(self.workload(kind, namespace, name))
    }

    async fn create(&self, workload: &OwnedWorkload) -> Result<OwnedWorkload, Error> {
        let mut store = self.store();
        let key = (workload.kind(), workload_id(workload.namespace(), workload.name()));
        if store.workloads.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists", format!("{} exists", workload.describe())));
        }
        let mut object = workload.clone();
        object.meta_mut().generation = Some(1);
        object.meta_mut().resource_version = store.bump();
        store.workloads.insert(key, object.clone());
        store.writes.push(format!("create {}", workload.describe()));
        Ok(object)
    }

    async fn replace(&self, workload: &OwnedWorkload) -> Result<OwnedWorkload, Error> {
        let mut store = self.store();
        let key = (workload.kind(), workload_id(workload.namespace(), workload.name()));
        let version = store.bump();
        let what = workload.describe();
        let current = store
            .workloads
            .get(&key)
            .ok_or_else(|| api_error(404, "NotFound", format!("{what} not found")))?;
        if current.meta().resource_version != workload.meta().resource_version {
            return Err(api_error(409, "Conflict", format!("{what} was modified")));
        }

        let mut object = workload.clone();
        let generation = current.meta().generation.unwrap_or(1);
        // Status is owned by the platform and survives a replace
        match (&mut object, current) {
            (OwnedWorkload::StatefulSet(new), OwnedWorkload::StatefulSet(old)) => {
                new.status = old.status.clone();
                new.metadata.generation = Some(generation + 1);
            }
            (OwnedWorkload::Deployment(new), OwnedWorkload::Deployment(old)) => {
                new.status = old.status.clone();
                new.metadata.generation = Some(generation + 1);
            }
            _ => object.meta_mut().generation = Some(generation),
        }
        object.meta_mut().resource_version = version;
        store.workloads.insert(key, object.clone());
        store.writes.push(format!("replace {}", workload.describe()));
        Ok(object)
    }
}

/// End-to-end scenarios: admission, then sync passes against the fake
#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{SyncEngine, SyncOutcome, SyncSettings, WorkloadState};
    use crate::events::NoopEventPublisher;
    use crate::webhook::{AdmissionController, AdmissionDecision, NdbClusterAdmission};
    use serde_json::json;

    fn engine(fake: &FakeCluster) -> SyncEngine {
        SyncEngine::new(
            Arc::new(fake.clone()),
            Arc::new(fake.clone()),
            Arc::new(NoopEventPublisher),
            SyncSettings::default(),
        )
    }

    fn key() -> ObjectKey {
        ObjectKey::new("db", "shop")
    }

    /// Admit a manifest the way the API server would: mutate, then validate
    fn admit(manifest: serde_json::Value) -> NdbCluster {
        let admission = NdbClusterAdmission::new();
        let submitted: NdbCluster = serde_json::from_value(manifest.clone()).unwrap();
        let mut object = manifest;
        if let Some(ops) = admission.mutate(&submitted) {
            json_patch::patch(&mut object, &ops).unwrap();
        }
        let defaulted: NdbCluster = serde_json::from_value(object).unwrap();
        assert_eq!(admission.validate_create(&defaulted), AdmissionDecision::Allow);
        defaulted
    }

    fn manifest() -> serde_json::Value {
        json!({
            "apiVersion": "ndb.dev/v1alpha1",
            "kind": "NdbCluster",
            "metadata": { "name": "shop", "namespace": "db" },
            "spec": {
                "redundancyLevel": 2,
                "dataNode": { "nodeCount": 2 },
                "sqlGateway": { "nodeCount": 0 }
            }
        })
    }

    fn pod_controllers_complete(fake: &FakeCluster) -> bool {
        ["shop-mgmd", "shop-ndbmtd"]
            .iter()
            .filter_map(|name| fake.workload(WorkloadKind::StatefulSet, "db", name))
            .chain(fake.workload(WorkloadKind::Deployment, "db", "shop-mysqld"))
            .all(|w| w.is_complete())
    }

    /// Story: a cluster asking for zero SQL nodes is defaulted and converges
    ///
    /// Admission rewrites nodeCount 0 to 1 and fills in maxNodeCount and the
    /// management count; the sync engine then needs a few passes (create,
    /// wait for readiness) before it records the generation as processed.
    #[tokio::test]
    async fn story_zero_sql_nodes_defaulted_then_converged() {
        let cluster = admit(manifest());
        let sql = cluster.spec.sql_gateway.clone().unwrap();
        assert_eq!(sql.node_count, 1);
        assert_eq!(sql.max_node_count, Some(1));
        assert_eq!(cluster.spec.management.as_ref().unwrap().node_count, Some(2));

        let fake = FakeCluster::default();
        fake.create_cluster(cluster);
        let engine = engine(&fake);

        let mut passes = 0;
        loop {
            passes += 1;
            match engine.sync(&key()).await.unwrap() {
                SyncOutcome::Complete => break,
                SyncOutcome::Incomplete(_) => fake.mark_all_ready(),
                SyncOutcome::Skip => panic!("cluster vanished"),
            }
            assert!(passes < 10, "cluster never converged");
        }
        assert!(passes > 1);

        let stored = fake.cluster(&key());
        assert_eq!(stored.processed_generation(), stored.generation());
        let mysqld = fake
            .workload(WorkloadKind::Deployment, "db", "shop-mysqld")
            .unwrap();
        assert_eq!(mysqld.desired_replicas(), Some(1));
    }

    /// Story: an update during a rollout is deferred and changes nothing
    #[tokio::test]
    async fn story_update_while_unprocessed_is_denied() {
        let fake = FakeCluster::default();
        fake.create_cluster(admit(manifest()));
        engine(&fake).sync(&key()).await.unwrap();

        let old = fake.cluster(&key());
        assert!(!old.is_spec_processed());
        let mut new = old.clone();
        new.spec.data_node.node_count = 4;

        let decision = NdbClusterAdmission::new().validate_update(&old, &new);
        assert!(matches!(decision, AdmissionDecision::Conflict(_)));
        // The API server drops a denied request; the store keeps the old object
        assert_eq!(fake.cluster(&key()), old);
    }

    /// Story: a restarted operator resumes the rollout it was in
    ///
    /// The accepted config lives in the ConfigMap, so a fresh engine picks up
    /// at the convergence step and does not write another config version.
    #[tokio::test]
    async fn story_restart_resumes_at_convergence() {
        let fake = FakeCluster::default();
        fake.create_cluster(admit(manifest()));
        let first = engine(&fake);
        while first.sync(&key()).await.unwrap() != SyncOutcome::Complete {
            fake.mark_all_ready();
        }

        fake.update_cluster(&key(), |c| c.spec.data_node.node_count = 4);
        assert!(matches!(
            first.sync(&key()).await.unwrap(),
            SyncOutcome::Incomplete(_)
        ));
        assert_eq!(fake.cluster(&key()).status.unwrap().config_version, Some(2));
        drop(first);

        fake.clear_writes();
        let restarted = engine(&fake);
        restarted.sync(&key()).await.unwrap();
        let writes = fake.writes();
        assert!(writes.contains(&"replace StatefulSet db/shop-mgmd".to_string()));
        assert!(!writes.iter().any(|w| w.contains("ConfigMap")), "{writes:?}");
        assert_eq!(fake.cluster(&key()).status.unwrap().config_version, Some(2));
    }

    /// Story: processedGeneration only moves on a fully healthy pass
    #[tokio::test]
    async fn story_processed_generation_moves_only_when_healthy() {
        let fake = FakeCluster::default();
        fake.create_cluster(admit(manifest()));
        let engine = engine(&fake);

        let mut converged_twice = 0;
        for pass in 0..30 {
            let healthy_before = pod_controllers_complete(&fake);
            let processed_before = fake.cluster(&key()).processed_generation();

            let outcome = engine.sync(&key()).await.unwrap();
            let processed_after = fake.cluster(&key()).processed_generation();
            if processed_after != processed_before {
                assert!(healthy_before, "pass {pass} moved processedGeneration while unhealthy");
            }

            if outcome == SyncOutcome::Complete {
                converged_twice += 1;
                if converged_twice == 1 {
                    fake.update_cluster(&key(), |c| c.spec.data_node.node_count = 4);
                } else {
                    break;
                }
            }
            // Platform catches up every other pass
            if pass % 2 == 1 {
                fake.mark_all_ready();
            }
        }
        assert_eq!(converged_twice, 2);
        assert_eq!(fake.cluster(&key()).processed_generation(), 2);
    }
}
