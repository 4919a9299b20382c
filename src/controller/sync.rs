//! Sync Engine
//!
//! One pass over one NdbCluster, run in order until a step cannot finish:
//!
//! 1. ensure every owned object exists (created from the last accepted config)
//! 2. health gate: every pod controller has finished its rollout and the
//!    data node disruption budget holds
//! 3. converge the first stale role (mgmd, then ndbmtd, then mysqld) to the
//!    last accepted config version
//! 4. accept the current generation by writing the next config version
//! 5. write status; `processedGeneration` only moves on a pass that got
//!    through steps 2 to 4 without acting
//!
//! Steps 1, 3 and 4 act at most once per pass and end it early, so a rollout
//! advances one role per pass and every pass starts from fresh API state.
//!
//! A config ConfigMap lost after the cluster recorded a config version is
//! recreated as the next version, so recreating it counts as accepting the
//! current generation and goes through validation like step 4 does.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use super::client::{ClusterClient, WorkloadClient};
use super::key::ObjectKey;
use super::secret::ensure_root_password_secret;
use super::workload::{Ensured, OwnedWorkload, WorkloadKind, WorkloadState};
use crate::crd::{Condition, ConditionStatus, NdbCluster, NdbClusterStatus, NodeRole};
use crate::events::{actions, reasons, EventPublisher};
use crate::resources::{
    config_map, config_map_name, desired_workloads, pod_controller, ConfigSummary,
};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::Error;

/// Condition type: every pod controller is ready and the disruption budget holds
pub const CONDITION_AVAILABLE: &str = "Available";
/// Condition type: workloads run the latest accepted spec
pub const CONDITION_UP_TO_DATE: &str = "UpToDate";

/// Timing for the sync engine
#[derive(Clone, Debug)]
pub struct SyncSettings {
    /// Requeue delay while waiting for workloads
    pub poll_interval: Duration,
    /// Requeue delay after a new config version was written
    pub accept_requeue: Duration,
    /// Retries for the status write
    pub status_retry: RetryConfig,
}

impl Default for SyncSettings {
    fn default() -> Self {
        crate::config::ControllerConfig::default().sync_settings()
    }
}

/// Result of a pass that did not fail
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing to do for this key (malformed, deleted or being deleted)
    Skip,
    /// Fully converged; no requeue needed
    Complete,
    /// More work remains; look again after the delay
    Incomplete(Duration),
}

/// Where a pass stopped
#[derive(Clone, Debug, PartialEq)]
enum Step {
    ResourcesCreated,
    /// An owned object was deleted between the read and the write
    Vanished(String),
    Waiting(String),
    RollingOut(NodeRole, i64),
    Accepted(i64),
    Converged,
}

/// What a pass saw, for the status write
struct Observed {
    step: Step,
    summary: ConfigSummary,
    live: Vec<OwnedWorkload>,
}

/// Runs sync passes against the API
#[derive(Clone)]
pub struct SyncEngine {
    clusters: Arc<dyn ClusterClient>,
    workloads: Arc<dyn WorkloadClient>,
    events: Arc<dyn EventPublisher>,
    settings: SyncSettings,
}

impl SyncEngine {
    /// Create an engine
    pub fn new(
        clusters: Arc<dyn ClusterClient>,
        workloads: Arc<dyn WorkloadClient>,
        events: Arc<dyn EventPublisher>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            clusters,
            workloads,
            events,
            settings,
        }
    }

    /// Run one pass for `key`
    #[instrument(skip(self), fields(cluster = %key))]
    pub async fn sync(&self, key: &ObjectKey) -> Result<SyncOutcome, Error> {
        let (namespace, name) = match key.split() {
            Ok(parts) => parts,
            Err(e) => {
                error!(error = %e, "dropping malformed work item");
                return Ok(SyncOutcome::Skip);
            }
        };

        let Some(cluster) = self.clusters.get(namespace, name).await? else {
            debug!("NdbCluster no longer exists");
            return Ok(SyncOutcome::Skip);
        };
        if cluster.metadata.deletion_timestamp.is_some() {
            debug!("NdbCluster is being deleted");
            return Ok(SyncOutcome::Skip);
        }

        let mut ctx = SyncContext {
            cluster,
            clusters: self.clusters.as_ref(),
            workloads: self.workloads.as_ref(),
            events: self.events.as_ref(),
            settings: &self.settings,
        };
        match ctx.run().await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if e.should_report() {
                    ctx.record_failure(&e).await;
                }
                Err(e)
            }
        }
    }
}

/// State of a single pass; owns the working copy of the cluster
struct SyncContext<'a> {
    cluster: NdbCluster,
    clusters: &'a dyn ClusterClient,
    workloads: &'a dyn WorkloadClient,
    events: &'a dyn EventPublisher,
    settings: &'a SyncSettings,
}

impl SyncContext<'_> {
    async fn run(&mut self) -> Result<SyncOutcome, Error> {
        let was_processed = self.cluster.is_spec_processed();
        let observed = self.converge().await?;
        self.write_status(&observed).await?;
        self.announce(&observed.step, was_processed).await;

        Ok(match observed.step {
            Step::Converged => {
                info!(generation = self.cluster.generation(), "NdbCluster is in sync");
                SyncOutcome::Complete
            }
            Step::Accepted(_) => SyncOutcome::Incomplete(self.settings.accept_requeue),
            _ => SyncOutcome::Incomplete(self.settings.poll_interval),
        })
    }

    /// Steps 1 to 4
    async fn converge(&mut self) -> Result<Observed, Error> {
        // Step 1: the config first, everything else is rendered from it
        let namespace = self.cluster.namespace().unwrap_or_default();
        let existing = self
            .workloads
            .get(WorkloadKind::ConfigMap, &namespace, &config_map_name(&self.cluster))
            .await?;
        let mut created = false;
        let mut reseeded = None;
        let config = match existing {
            Some(live) => live,
            None => {
                let (version, ensured) = self.seed_config().await?;
                created = ensured.was_created();
                if created && version > 1 {
                    reseeded = Some(version);
                }
                ensured.into_inner()
            }
        };
        let OwnedWorkload::ConfigMap(config_map_live) = &config else {
            return Err(Error::internal(format!(
                "expected a ConfigMap, got {}",
                config.describe()
            )));
        };
        let summary = ConfigSummary::from_config_map(config_map_live)?;
        debug!(
            config_version = summary.config_version,
            config_generation = summary.generation,
            "loaded config summary"
        );

        if let Some(secret) =
            ensure_root_password_secret(&self.cluster, &summary, self.workloads).await?
        {
            created |= secret.was_created();
        }

        let mut live = Vec::new();
        for desired in desired_workloads(&self.cluster, &summary)? {
            let ensured = desired.ensure_exists(self.workloads).await?;
            created |= ensured.was_created();
            live.push(ensured.into_inner());
        }
        if let Some(version) = reseeded {
            info!(
                generation = self.cluster.generation(),
                config_version = version,
                "recreated missing config as a new version"
            );
            return Ok(Observed {
                step: Step::Accepted(version),
                summary,
                live,
            });
        }
        if created {
            info!(config_version = summary.config_version, "created missing resources");
            return Ok(Observed {
                step: Step::ResourcesCreated,
                summary,
                live,
            });
        }

        // Step 2: objects without pods are always complete
        let pending: Vec<String> = live
            .iter()
            .filter(|w| !w.is_complete())
            .map(OwnedWorkload::describe)
            .collect();
        if !pending.is_empty() {
            debug!(?pending, "waiting for workloads");
            return Ok(Observed {
                step: Step::Waiting(format!("waiting for {}", pending.join(", "))),
                summary,
                live,
            });
        }

        // Step 3
        for role in NodeRole::ALL {
            let Some(mut desired) = pod_controller(&self.cluster, &summary, role) else {
                continue;
            };
            let Some(current) = live.iter().find(|w| w.pod_role() == Some(role)) else {
                continue;
            };
            if current.config_version() == Some(summary.config_version)
                && current.desired_replicas() == desired.desired_replicas()
            {
                continue;
            }

            info!(
                %role,
                from = ?current.config_version(),
                to = summary.config_version,
                "rolling out config"
            );
            desired.meta_mut().resource_version = current.meta().resource_version.clone();
            if let Err(e) = self.workloads.replace(&desired).await {
                return deleted_during_pass(e, desired.describe(), summary, live);
            }
            return Ok(Observed {
                step: Step::RollingOut(role, summary.config_version),
                summary,
                live,
            });
        }

        // Step 4
        if summary.generation != self.cluster.generation() {
            self.cluster.spec.validate()?;
            let next = ConfigSummary::from_cluster(&self.cluster, summary.config_version + 1);
            let mut replacement = config_map(&self.cluster, &next)?;
            replacement.metadata.resource_version = config.meta().resource_version.clone();
            if let Err(e) = self.workloads.replace(&replacement.into()).await {
                return deleted_during_pass(e, config.describe(), summary, live);
            }
            info!(
                generation = next.generation,
                config_version = next.config_version,
                "accepted new generation"
            );
            return Ok(Observed {
                step: Step::Accepted(next.config_version),
                summary,
                live,
            });
        }

        Ok(Observed {
            step: Step::Converged,
            summary,
            live,
        })
    }

    /// Create the config ConfigMap; returns the version it was seeded with.
    ///
    /// A cluster that already recorded a config version lost its marker;
    /// the new one continues the sequence rather than restarting it at 1.
    async fn seed_config(&self) -> Result<(i64, Ensured), Error> {
        let version = self
            .cluster
            .status
            .as_ref()
            .and_then(|s| s.config_version)
            .map_or(1, |v| v + 1);
        self.cluster.spec.validate()?;
        if version > 1 {
            warn!(config_version = version, "config ConfigMap is missing");
        }
        let seed = ConfigSummary::from_cluster(&self.cluster, version);
        let ensured = OwnedWorkload::from(config_map(&self.cluster, &seed)?)
            .ensure_exists(self.workloads)
            .await?;
        Ok((version, ensured))
    }

    /// Events for the milestones of a pass
    async fn announce(&self, step: &Step, was_processed: bool) {
        let generation = self.cluster.generation();
        let (reason, note) = match step {
            Step::ResourcesCreated => (
                reasons::RESOURCES_CREATED,
                "created missing resources".to_string(),
            ),
            Step::RollingOut(role, version) => (
                reasons::ROLLING_OUT,
                format!("updating {role} to config version {version}"),
            ),
            Step::Accepted(version) => (
                reasons::SPEC_ACCEPTED,
                format!("generation {generation} accepted as config version {version}"),
            ),
            // Only the pass that moved processedGeneration
            Step::Converged if !was_processed && self.cluster.is_spec_processed() => (
                reasons::SYNC_COMPLETE,
                format!("generation {generation} is applied"),
            ),
            _ => return,
        };
        self.events
            .publish(
                &self.cluster.object_ref(&()),
                EventType::Normal,
                reason,
                actions::SYNC,
                Some(note),
            )
            .await;
    }

    /// Step 5
    async fn write_status(&mut self, observed: &Observed) -> Result<(), Error> {
        let report = StatusReport::new(observed, self.cluster.generation());
        if let Some(stored) = self.patch_status(&report).await? {
            self.cluster = stored;
        }
        Ok(())
    }

    /// Patch status until it sticks, re-reading the cluster after a conflict.
    ///
    /// Returns `None` when the write was abandoned because a newer generation
    /// appeared or the cluster was deleted.
    async fn patch_status(&self, report: &StatusReport) -> Result<Option<NdbCluster>, Error> {
        let clusters = self.clusters;
        let working_copy = &self.cluster;
        let namespace = working_copy.namespace().unwrap_or_default();
        let name = working_copy.name_any();
        let attempts = AtomicU32::new(0);

        retry_with_backoff(
            &self.settings.status_retry,
            "patch_status",
            Error::is_conflict,
            || {
                let attempt = attempts.fetch_add(1, Ordering::Relaxed);
                let (namespace, name) = (namespace.clone(), name.clone());
                async move {
                    let cluster = if attempt == 0 {
                        working_copy.clone()
                    } else {
                        match clusters.get(&namespace, &name).await? {
                            Some(c) => c,
                            None => return Ok(None),
                        }
                    };
                    if cluster.generation() != report.generation {
                        debug!(
                            observed = report.generation,
                            current = cluster.generation(),
                            "newer generation appeared, skipping status write"
                        );
                        return Ok(None);
                    }

                    let status = report.apply(cluster.status.clone().unwrap_or_default());
                    if cluster.status.as_ref() == Some(&status) {
                        return Ok(Some(cluster));
                    }
                    clusters.patch_status(&cluster, &status).await.map(Some)
                }
            },
        )
        .await
    }

    /// Best-effort `UpToDate=False` and a Warning event for an error that
    /// needs attention
    async fn record_failure(&self, err: &Error) {
        self.events
            .publish(
                &self.cluster.object_ref(&()),
                EventType::Warning,
                reasons::SYNC_FAILED,
                actions::SYNC,
                Some(err.to_string()),
            )
            .await;

        let status = self
            .cluster
            .status
            .clone()
            .unwrap_or_default()
            .condition(Condition::new(
                CONDITION_UP_TO_DATE,
                ConditionStatus::False,
                "SyncFailed",
                err.to_string(),
            ));
        if let Err(e) = self.clusters.patch_status(&self.cluster, &status).await {
            warn!(error = %e, "failed to record sync failure");
        }
    }
}

/// A replace that found its object gone ends the pass; step 1 of the next
/// pass recreates the object
fn deleted_during_pass(
    err: Error,
    what: String,
    summary: ConfigSummary,
    live: Vec<OwnedWorkload>,
) -> Result<Observed, Error> {
    if !err.is_not_found() {
        return Err(err);
    }
    info!(workload = %what, "deleted during the pass");
    Ok(Observed {
        step: Step::Vanished(what),
        summary,
        live,
    })
}

/// Status fields computed once per pass and applied to whichever copy of
/// the cluster the status write ends up using
struct StatusReport {
    generation: i64,
    processed: bool,
    config_version: i64,
    available: Condition,
    up_to_date: Condition,
    ready: [Option<String>; 3],
}

impl StatusReport {
    fn new(observed: &Observed, generation: i64) -> Self {
        let ready = NodeRole::ALL.map(|role| {
            observed
                .live
                .iter()
                .find(|w| w.pod_role() == Some(role))
                .map(|w| {
                    format!(
                        "{}/{}",
                        w.ready_replicas().unwrap_or(0),
                        w.desired_replicas().unwrap_or(0)
                    )
                })
        });

        let unready: Vec<&str> = observed
            .live
            .iter()
            .filter(|w| !w.is_ready())
            .map(OwnedWorkload::name)
            .collect();
        let available = if unready.is_empty() {
            Condition::new(
                CONDITION_AVAILABLE,
                ConditionStatus::True,
                "AllNodesReady",
                "all NDB nodes are ready",
            )
        } else {
            Condition::new(
                CONDITION_AVAILABLE,
                ConditionStatus::False,
                "NodesNotReady",
                format!("not ready: {}", unready.join(", ")),
            )
        };

        let version = observed.summary.config_version;
        let (status, reason, message) = match &observed.step {
            Step::ResourcesCreated => (
                ConditionStatus::False,
                "CreatingResources",
                format!("creating resources for config version {version}"),
            ),
            Step::Vanished(what) => (
                ConditionStatus::False,
                "CreatingResources",
                format!("{what} was deleted, recreating it"),
            ),
            Step::Waiting(message) => (ConditionStatus::False, "WaitingForNodes", message.clone()),
            Step::RollingOut(role, version) => (
                ConditionStatus::False,
                "RollingOut",
                format!("updating {role} to config version {version}"),
            ),
            Step::Accepted(next) => (
                ConditionStatus::False,
                "SpecAccepted",
                format!("generation {generation} accepted as config version {next}"),
            ),
            Step::Converged => (
                ConditionStatus::True,
                "SyncComplete",
                format!("config version {version} is applied"),
            ),
        };

        let config_version = match observed.step {
            Step::Accepted(next) => next,
            _ => version,
        };

        Self {
            generation,
            processed: observed.step == Step::Converged,
            config_version,
            available,
            up_to_date: Condition::new(CONDITION_UP_TO_DATE, status, reason, message),
            ready,
        }
    }

    fn apply(&self, base: NdbClusterStatus) -> NdbClusterStatus {
        let mut status = base
            .condition(self.available.clone())
            .condition(self.up_to_date.clone());
        if self.processed {
            status.processed_generation = self.generation;
        }
        let [management, data, sql] = self.ready.clone();
        status.ready_management_nodes = management;
        status.ready_data_nodes = data;
        status.ready_sql_gateway_nodes = sql;
        status.config_version = Some(self.config_version);
        status
    }
}
