//! Objects owned by an NdbCluster
//!
//! [`OwnedWorkload`] is the closed set of kinds the operator creates. The
//! router and the sync engine work through its capabilities
//! ([`WorkloadState`], [`OwnedWorkload::ensure_exists`]) rather than the
//! concrete kinds.

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::debug;

use super::client::WorkloadClient;
use super::key::ObjectKey;
use crate::crd::NodeRole;
use crate::{Error, CLUSTER_LABEL, CONFIG_VERSION_ANNOTATION, NODE_TYPE_LABEL};

/// Readiness capabilities of an owned object
pub trait WorkloadState {
    /// All desired pods run the current template and are ready
    fn is_ready(&self) -> bool;

    /// Rollout finished: no pods from an older template remain
    fn is_complete(&self) -> bool {
        self.is_ready()
    }
}

impl WorkloadState for StatefulSet {
    fn is_ready(&self) -> bool {
        let desired = self.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let Some(status) = &self.status else {
            return false;
        };
        let observed =
            status.observed_generation.unwrap_or(0) >= self.metadata.generation.unwrap_or(0);
        let revision_settled = match (&status.current_revision, &status.update_revision) {
            (Some(current), Some(update)) => current == update,
            _ => true,
        };
        observed
            && status.replicas == desired
            && status.ready_replicas.unwrap_or(0) == desired
            && status.updated_replicas.unwrap_or(0) == desired
            && revision_settled
    }
}

impl WorkloadState for Deployment {
    fn is_ready(&self) -> bool {
        let desired = self.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let Some(status) = &self.status else {
            return false;
        };
        status.observed_generation.unwrap_or(0) >= self.metadata.generation.unwrap_or(0)
            && status.ready_replicas.unwrap_or(0) == desired
    }

    fn is_complete(&self) -> bool {
        let desired = self.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let Some(status) = &self.status else {
            return false;
        };
        self.is_ready()
            && status.replicas.unwrap_or(0) == desired
            && status.updated_replicas.unwrap_or(0) == desired
            && status.available_replicas.unwrap_or(0) == desired
    }
}

// Objects without pods have nothing to roll out
impl WorkloadState for ConfigMap {
    fn is_ready(&self) -> bool {
        true
    }
}

impl WorkloadState for Service {
    fn is_ready(&self) -> bool {
        true
    }
}

impl WorkloadState for Secret {
    fn is_ready(&self) -> bool {
        true
    }
}

// Violated while fewer pods are healthy than the budget requires
impl WorkloadState for PodDisruptionBudget {
    fn is_ready(&self) -> bool {
        let Some(status) = &self.status else {
            return false;
        };
        status.observed_generation.unwrap_or(0) >= self.metadata.generation.unwrap_or(0)
            && status.current_healthy >= status.desired_healthy
    }
}

/// Kind of an owned object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkloadKind {
    /// Rendered config.ini / my.cnf and the config-version marker
    ConfigMap,
    /// MySQL root password
    Secret,
    /// Governing or client Service
    Service,
    /// Data node disruption budget
    PodDisruptionBudget,
    /// Management servers and data nodes
    StatefulSet,
    /// SQL gateway
    Deployment,
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ConfigMap => "ConfigMap",
            Self::Secret => "Secret",
            Self::Service => "Service",
            Self::PodDisruptionBudget => "PodDisruptionBudget",
            Self::StatefulSet => "StatefulSet",
            Self::Deployment => "Deployment",
        };
        f.write_str(s)
    }
}

/// An object owned by an NdbCluster
#[derive(Clone, Debug, PartialEq)]
pub enum OwnedWorkload {
    /// See [`WorkloadKind::ConfigMap`]
    ConfigMap(ConfigMap),
    /// See [`WorkloadKind::Secret`]
    Secret(Secret),
    /// See [`WorkloadKind::Service`]
    Service(Service),
    /// See [`WorkloadKind::PodDisruptionBudget`]
    PodDisruptionBudget(PodDisruptionBudget),
    /// See [`WorkloadKind::StatefulSet`]
    StatefulSet(StatefulSet),
    /// See [`WorkloadKind::Deployment`]
    Deployment(Deployment),
}

/// Result of [`OwnedWorkload::ensure_exists`]
#[derive(Clone, Debug, PartialEq)]
pub enum Ensured {
    /// The object was already there; the live copy
    Existing(OwnedWorkload),
    /// The object was created; the stored copy
    Created(OwnedWorkload),
}

impl Ensured {
    /// True if this call created the object
    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    /// The live object
    pub fn into_inner(self) -> OwnedWorkload {
        match self {
            Self::Existing(w) | Self::Created(w) => w,
        }
    }
}

macro_rules! each_variant {
    ($self:expr, $obj:ident => $body:expr) => {
        match $self {
            OwnedWorkload::ConfigMap($obj) => $body,
            OwnedWorkload::Secret($obj) => $body,
            OwnedWorkload::Service($obj) => $body,
            OwnedWorkload::PodDisruptionBudget($obj) => $body,
            OwnedWorkload::StatefulSet($obj) => $body,
            OwnedWorkload::Deployment($obj) => $body,
        }
    };
}

impl WorkloadState for OwnedWorkload {
    fn is_ready(&self) -> bool {
        each_variant!(self, w => w.is_ready())
    }

    fn is_complete(&self) -> bool {
        each_variant!(self, w => w.is_complete())
    }
}

impl OwnedWorkload {
    /// Kind of this object
    pub fn kind(&self) -> WorkloadKind {
        match self {
            Self::ConfigMap(_) => WorkloadKind::ConfigMap,
            Self::Secret(_) => WorkloadKind::Secret,
            Self::Service(_) => WorkloadKind::Service,
            Self::PodDisruptionBudget(_) => WorkloadKind::PodDisruptionBudget,
            Self::StatefulSet(_) => WorkloadKind::StatefulSet,
            Self::Deployment(_) => WorkloadKind::Deployment,
        }
    }

    /// Object metadata
    pub fn meta(&self) -> &ObjectMeta {
        each_variant!(self, w => &w.metadata)
    }

    /// Mutable object metadata
    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        each_variant!(self, w => &mut w.metadata)
    }

    /// `metadata.name`, empty if unset
    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    /// `metadata.namespace`, empty if unset
    pub fn namespace(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or_default()
    }

    /// `Kind namespace/name`, for logs
    pub fn describe(&self) -> String {
        format!("{} {}/{}", self.kind(), self.namespace(), self.name())
    }

    /// Key of the owning NdbCluster, from the cluster label
    pub fn cluster_key(&self) -> Option<ObjectKey> {
        let cluster = self.meta().labels.as_ref()?.get(CLUSTER_LABEL)?;
        Some(ObjectKey::new(self.namespace(), cluster))
    }

    /// Node role of a pod controller; `None` for supporting objects
    pub fn pod_role(&self) -> Option<NodeRole> {
        if !matches!(self, Self::StatefulSet(_) | Self::Deployment(_)) {
            return None;
        }
        let label = self.meta().labels.as_ref()?.get(NODE_TYPE_LABEL)?;
        NodeRole::ALL.into_iter().find(|r| r.as_str() == label)
    }

    /// Config version recorded on the pod template
    pub fn config_version(&self) -> Option<i64> {
        let template = match self {
            Self::StatefulSet(s) => s.spec.as_ref()?.template.metadata.as_ref()?,
            Self::Deployment(d) => d.spec.as_ref()?.template.metadata.as_ref()?,
            _ => return None,
        };
        template
            .annotations
            .as_ref()?
            .get(CONFIG_VERSION_ANNOTATION)?
            .parse()
            .ok()
    }

    /// Desired pod count of a pod controller
    pub fn desired_replicas(&self) -> Option<i32> {
        match self {
            Self::StatefulSet(s) => Some(s.spec.as_ref()?.replicas.unwrap_or(1)),
            Self::Deployment(d) => Some(d.spec.as_ref()?.replicas.unwrap_or(1)),
            _ => None,
        }
    }

    /// Ready pod count of a pod controller
    pub fn ready_replicas(&self) -> Option<i32> {
        let ready = match self {
            Self::StatefulSet(s) => s.status.as_ref().and_then(|st| st.ready_replicas),
            Self::Deployment(d) => d.status.as_ref().and_then(|st| st.ready_replicas),
            _ => return None,
        };
        Some(ready.unwrap_or(0))
    }

    /// The state the router waits for before re-examining the owner:
    /// ready for StatefulSets, rollout complete for Deployments
    pub fn is_settled(&self) -> bool {
        match self {
            Self::Deployment(_) => self.is_complete(),
            _ => self.is_ready(),
        }
    }

    /// Create this object unless an object with the same kind, namespace and
    /// name exists. Existing objects are left untouched.
    pub async fn ensure_exists(&self, client: &dyn WorkloadClient) -> Result<Ensured, Error> {
        if let Some(live) = client.get(self.kind(), self.namespace(), self.name()).await? {
            return Ok(Ensured::Existing(live));
        }

        match client.create(self).await {
            Ok(created) => {
                debug!(workload = %self.describe(), "Created owned object");
                Ok(Ensured::Created(created))
            }
            // Lost a race with a concurrent create. If the winner is gone
            // again the conflict stands and the pass is retried.
            Err(e) if e.is_conflict() => {
                match client.get(self.kind(), self.namespace(), self.name()).await? {
                    Some(live) => Ok(Ensured::Existing(live)),
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }
}

impl From<ConfigMap> for OwnedWorkload {
    fn from(value: ConfigMap) -> Self {
        Self::ConfigMap(value)
    }
}

impl From<Secret> for OwnedWorkload {
    fn from(value: Secret) -> Self {
        Self::Secret(value)
    }
}

impl From<Service> for OwnedWorkload {
    fn from(value: Service) -> Self {
        Self::Service(value)
    }
}

impl From<PodDisruptionBudget> for OwnedWorkload {
    fn from(value: PodDisruptionBudget) -> Self {
        Self::PodDisruptionBudget(value)
    }
}

impl From<StatefulSet> for OwnedWorkload {
    fn from(value: StatefulSet) -> Self {
        Self::StatefulSet(value)
    }
}

impl From<Deployment> for OwnedWorkload {
    fn from(value: Deployment) -> Self {
        Self::Deployment(value)
    }
}
