//! Controller settings
//!
//! Values come from CLI flags (with environment fallbacks, see `main.rs`);
//! this module only holds them, supplies defaults and rejects nonsense.

use std::time::Duration;

use crate::controller::SyncSettings;
use crate::retry::RetryConfig;
use crate::workqueue::{ExponentialBackoff, QueueKey, WorkQueue};
use crate::Error;

/// Default number of sync workers
pub const DEFAULT_WORKERS: usize = 2;
/// Default requeue delay while workloads are not yet ready
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Default requeue delay after a new config version was written
pub const DEFAULT_ACCEPT_REQUEUE: Duration = Duration::from_secs(1);
/// Default period for re-examining every known cluster
pub const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(300);

/// Settings for the controller process
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerConfig {
    /// Number of concurrent sync workers
    pub workers: usize,
    /// Requeue delay while a rollout is in progress
    pub poll_interval: Duration,
    /// Requeue delay after accepting a new generation
    pub accept_requeue: Duration,
    /// Periodic resync of cached clusters; `None` disables it
    pub resync_period: Option<Duration>,
    /// Restrict watches to one namespace
    pub namespace: Option<String>,
    /// First failure backoff
    pub backoff_base: Duration,
    /// Failure backoff cap
    pub backoff_max: Duration,
    /// Attempts for a status write that keeps losing resourceVersion races
    pub status_write_attempts: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            accept_requeue: DEFAULT_ACCEPT_REQUEUE,
            resync_period: Some(DEFAULT_RESYNC_PERIOD),
            namespace: None,
            backoff_base: crate::workqueue::DEFAULT_BASE_DELAY,
            backoff_max: crate::workqueue::DEFAULT_MAX_DELAY,
            status_write_attempts: 5,
        }
    }
}

impl ControllerConfig {
    /// Check settings for values the controller cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        if self.workers == 0 {
            return Err(Error::config("workers must be at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::config("poll interval must be greater than zero"));
        }
        if self.backoff_base > self.backoff_max {
            return Err(Error::config(format!(
                "backoff base {:?} exceeds backoff max {:?}",
                self.backoff_base, self.backoff_max
            )));
        }
        if self.status_write_attempts == 0 {
            return Err(Error::config("status write attempts must be at least 1"));
        }
        if let Some(ns) = &self.namespace {
            if ns.is_empty() {
                return Err(Error::config("namespace must not be empty when set"));
            }
        }
        Ok(())
    }

    /// Settings handed to the sync engine
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            poll_interval: self.poll_interval,
            accept_requeue: self.accept_requeue,
            status_retry: RetryConfig {
                max_attempts: self.status_write_attempts,
                initial_delay: Duration::from_millis(50),
                max_delay: Duration::from_secs(2),
                backoff_multiplier: 2.0,
            },
        }
    }

    /// A work queue using the configured failure backoff
    pub fn work_queue<K: QueueKey>(&self) -> WorkQueue<K> {
        WorkQueue::new(ExponentialBackoff::new(self.backoff_base, self.backoff_max))
    }
}
