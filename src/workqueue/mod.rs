//! De-duplicating work queue shared by the event router and sync workers
//!
//! Semantics:
//! - a key is queued at most once while it is waiting;
//! - a key handed out by [`WorkQueue::get`] is *processing* until
//!   [`WorkQueue::done`]; adding it meanwhile marks it dirty and it is
//!   queued again exactly once on `done`, so one key is never processed by
//!   two workers at the same time;
//! - [`WorkQueue::shut_down`] stops accepting keys, lets workers drain what
//!   is already queued, then makes every `get` return `None`.

mod rate_limiter;

pub use rate_limiter::{ExponentialBackoff, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY};

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Bounds on a work queue key
pub trait QueueKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}
impl<T: Clone + Eq + Hash + Debug + Send + Sync + 'static> QueueKey for T {}

#[derive(Debug)]
struct State<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    /// Earliest pending `add_after` deadline per key
    waiting: HashMap<K, Instant>,
    shutting_down: bool,
}

#[derive(Debug)]
struct Inner<K> {
    state: Mutex<State<K>>,
    limiter: Mutex<ExponentialBackoff<K>>,
    notify: Notify,
    shutdown: CancellationToken,
}

/// Cloneable handle to a shared work queue
#[derive(Debug)]
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: QueueKey> Default for WorkQueue<K> {
    fn default() -> Self {
        Self::new(ExponentialBackoff::default())
    }
}

impl<K: QueueKey> WorkQueue<K> {
    /// Create a queue using `limiter` for [`WorkQueue::add_rate_limited`]
    pub fn new(limiter: ExponentialBackoff<K>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    waiting: HashMap::new(),
                    shutting_down: false,
                }),
                limiter: Mutex::new(limiter),
                notify: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State<K>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn limiter(&self) -> MutexGuard<'_, ExponentialBackoff<K>> {
        self.inner
            .limiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `key` unless it is already waiting. Ignored after shutdown.
    pub fn add(&self, key: K) {
        let mut state = self.state();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            trace!(?key, "Key is processing, will requeue on done");
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Wait for the next key. Returns `None` once the queue is shut down
    /// and drained.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a wakeup between the check and
            // the await is not lost
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    if !state.queue.is_empty() {
                        self.inner.notify.notify_one();
                    }
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark `key` as finished; queue it again if it was added meanwhile
    pub fn done(&self, key: &K) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Reset the failure history of `key`
    pub fn forget(&self, key: &K) {
        self.limiter().forget(key);
    }

    /// Consecutive rate-limited requeues of `key` since the last `forget`
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.limiter().num_requeues(key)
    }

    /// Requeue `key` after its exponential failure delay
    pub fn add_rate_limited(&self, key: K) {
        let delay = self.limiter().when(&key);
        self.add_after(key, delay);
    }

    /// Queue `key` after `delay`. Of several pending delays for the same key
    /// only the earliest is kept.
    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let deadline = Instant::now() + delay;
        {
            let mut state = self.state();
            if state.shutting_down {
                return;
            }
            match state.waiting.get(&key) {
                Some(existing) if *existing <= deadline => return,
                _ => {
                    state.waiting.insert(key.clone(), deadline);
                }
            }
        }

        let queue = self.clone();
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    let due = {
                        let mut state = queue.state();
                        match state.waiting.get(&key) {
                            Some(d) if *d == deadline => {
                                state.waiting.remove(&key);
                                true
                            }
                            // Superseded by an earlier deadline
                            _ => false,
                        }
                    };
                    if due {
                        queue.add(key);
                    }
                }
                _ = shutdown.cancelled() => {}
            }
        });
    }

    /// Stop accepting keys and wake every waiting worker
    pub fn shut_down(&self) {
        {
            let mut state = self.state();
            state.shutting_down = true;
            state.waiting.clear();
        }
        self.inner.shutdown.cancel();
        self.inner.notify.notify_waiters();
    }

    /// True once [`WorkQueue::shut_down`] was called
    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    /// Keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    /// True if no key is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
