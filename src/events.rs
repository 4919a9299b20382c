//! Kubernetes Events on NdbCluster objects
//!
//! Sync passes report their milestones through [`EventPublisher`] so they
//! show up in `kubectl describe ndbcluster`. Publishing never fails a pass:
//! errors are logged and dropped.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

/// Publishes Kubernetes Events about an object
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on `resource_ref`; failures are only logged
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// [`EventPublisher`] backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "failed to publish event");
        }
    }
}

/// Publisher that drops every Event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons, shown in the REASON column of `kubectl get events`
pub mod reasons {
    /// Missing owned objects were created
    pub const RESOURCES_CREATED: &str = "ResourcesCreated";
    /// A role started rolling out a new config version
    pub const ROLLING_OUT: &str = "RollingOut";
    /// A new generation was accepted as the next config version
    pub const SPEC_ACCEPTED: &str = "SpecAccepted";
    /// The current generation is fully applied
    pub const SYNC_COMPLETE: &str = "SyncComplete";
    /// A pass failed in a way that needs attention
    pub const SYNC_FAILED: &str = "SyncFailed";
}

/// Event actions, shown in the ACTION column of `kubectl get events`
pub mod actions {
    /// A sync pass
    pub const SYNC: &str = "Sync";
}
