//! Watch tasks feeding the Event Router
//!
//! Each task runs a kube watcher and keeps the last seen copy of every
//! object, which is what turns the watcher's bare "this object exists now"
//! notifications into `Added` / `Updated { old, new }` / `Deleted` events.
//! A relist after a watch restart is diffed against the cache, so objects
//! deleted during the gap still produce `Deleted`.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::router::{RouterEvent, WatchEvent};
use super::workload::OwnedWorkload;
use crate::crd::NdbCluster;
use crate::CLUSTER_LABEL;

/// Last seen state of every object on one watch stream
#[derive(Debug)]
pub struct LastSeen<T> {
    objects: HashMap<String, T>,
    relisted: Option<HashSet<String>>,
}

impl<T> Default for LastSeen<T> {
    fn default() -> Self {
        Self {
            objects: HashMap::new(),
            relisted: None,
        }
    }
}

impl<T: Clone> LastSeen<T> {
    /// A new object version; `Added` or `Updated` depending on the cache
    pub fn apply(&mut self, id: String, object: T) -> WatchEvent<T> {
        if let Some(relisted) = &mut self.relisted {
            relisted.insert(id.clone());
        }
        match self.objects.insert(id, object.clone()) {
            Some(old) => WatchEvent::Updated { old, new: object },
            None => WatchEvent::Added(object),
        }
    }

    /// The object was deleted
    pub fn delete(&mut self, id: &str, object: T) -> WatchEvent<T> {
        let last = self.objects.remove(id).unwrap_or(object);
        WatchEvent::Deleted(last)
    }

    /// A relist started
    pub fn begin_relist(&mut self) {
        self.relisted = Some(HashSet::new());
    }

    /// A relist finished; cached objects it did not mention are gone
    pub fn end_relist(&mut self) -> Vec<WatchEvent<T>> {
        let Some(relisted) = self.relisted.take() else {
            return Vec::new();
        };
        let gone: Vec<String> = self
            .objects
            .keys()
            .filter(|id| !relisted.contains(*id))
            .cloned()
            .collect();
        gone.into_iter()
            .filter_map(|id| self.objects.remove(&id))
            .map(WatchEvent::Deleted)
            .collect()
    }

    /// `Updated { old = new }` for every cached object
    pub fn resync(&self) -> Vec<WatchEvent<T>> {
        self.objects
            .values()
            .map(|o| WatchEvent::Updated {
                old: o.clone(),
                new: o.clone(),
            })
            .collect()
    }

    /// Number of cached objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

fn identity<K: ResourceExt>(object: &K) -> String {
    format!("{}/{}", object.namespace().unwrap_or_default(), object.name_any())
}

/// Convert one watcher event into router events, updating the cache
pub fn translate<K, T>(cache: &mut LastSeen<T>, event: Event<K>) -> Vec<WatchEvent<T>>
where
    K: ResourceExt + Into<T>,
    T: Clone,
{
    match event {
        Event::Apply(object) => {
            let id = identity(&object);
            vec![cache.apply(id, object.into())]
        }
        Event::Delete(object) => {
            let id = identity(&object);
            vec![cache.delete(&id, object.into())]
        }
        Event::Init => {
            cache.begin_relist();
            Vec::new()
        }
        Event::InitApply(object) => {
            let id = identity(&object);
            vec![cache.apply(id, object.into())]
        }
        Event::InitDone => cache.end_relist(),
    }
}

async fn tick(resync: &mut Option<Interval>) {
    match resync {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn pump<K, T>(
    api: Api<K>,
    config: watcher::Config,
    resync_period: Option<Duration>,
    events: mpsc::Sender<RouterEvent>,
    cancel: CancellationToken,
) where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + 'static + Into<T>,
    T: Clone + Send + 'static,
    WatchEvent<T>: Into<RouterEvent>,
{
    let kind = K::kind(&());
    let stream = watcher::watcher(api, config).default_backoff();
    let mut stream = std::pin::pin!(stream);

    let mut resync = resync_period.map(|period| {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    });

    let mut cache = LastSeen::<T>::default();
    info!(%kind, "watch started");

    loop {
        let batch = tokio::select! {
            _ = cancel.cancelled() => break,
            next = stream.next() => match next {
                Some(Ok(event)) => translate(&mut cache, event),
                Some(Err(e)) => {
                    warn!(%kind, error = %e, "watch error, backing off");
                    continue;
                }
                None => break,
            },
            _ = tick(&mut resync) => {
                debug!(%kind, objects = cache.len(), "resync");
                cache.resync()
            }
        };

        for event in batch {
            if events.send(event.into()).await.is_err() {
                debug!(%kind, "router gone, stopping watch");
                return;
            }
        }
    }
    info!(%kind, "watch stopped");
}

/// Where to watch
#[derive(Clone)]
pub struct WatchScope {
    client: Client,
    namespace: Option<String>,
}

impl WatchScope {
    /// Watch `namespace`, or every namespace when `None`
    pub fn new(client: Client, namespace: Option<String>) -> Self {
        Self { client, namespace }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

/// Spawn the NdbCluster watch and one watch per owned kind the router
/// reacts to: pod controllers, disruption budgets and config markers
pub fn spawn_watches(
    scope: &WatchScope,
    resync_period: Option<Duration>,
    events: mpsc::Sender<RouterEvent>,
    cancel: CancellationToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    // Only objects we created carry the cluster label
    let owned = watcher::Config::default().labels(CLUSTER_LABEL);

    vec![
        tokio::spawn(pump::<NdbCluster, NdbCluster>(
            scope.api(),
            watcher::Config::default(),
            resync_period,
            events.clone(),
            cancel.clone(),
        )),
        tokio::spawn(pump::<StatefulSet, OwnedWorkload>(
            scope.api(),
            owned.clone(),
            None,
            events.clone(),
            cancel.clone(),
        )),
        tokio::spawn(pump::<Deployment, OwnedWorkload>(
            scope.api(),
            owned.clone(),
            None,
            events.clone(),
            cancel.clone(),
        )),
        tokio::spawn(pump::<PodDisruptionBudget, OwnedWorkload>(
            scope.api(),
            owned.clone(),
            None,
            events.clone(),
            cancel.clone(),
        )),
        tokio::spawn(pump::<ConfigMap, OwnedWorkload>(
            scope.api(),
            owned,
            None,
            events,
            cancel,
        )),
    ]
}
