//! Work queues
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ ShardedQueue<T>                                              │
//! │   shard = fnv1a(key) % shards   (one worker per shard)       │
//! │   ┌──────────────┐ ┌──────────────┐       ┌──────────────┐   │
//! │   │ order: FIFO  │ │ order: FIFO  │  ...  │ order: FIFO  │   │
//! │   │ pending: map │ │ pending: map │       │ pending: map │   │
//! │   └──────────────┘ └──────────────┘       └──────────────┘   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ DelayQueue<T>: due-time heap, one entry per key              │
//! │   fast-retry / slow-retry / tombstone reaper                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! A key always hashes to the same shard and each shard has a single
//! worker, so items for one key are processed in order and never
//! concurrently. A key waiting in a shard is merged with newer items
//! instead of being queued twice.

use crate::cache::Change;
use crate::lock::safe_lock;
use common::WorkKey;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Anything that can sit in a keyed queue
pub trait QueueItem: Send + 'static {
    fn key(&self) -> &WorkKey;

    /// Fold a newer item for the same key into this one
    fn merge(&mut self, newer: Self);
}

// =============================================================================
// Work items
// =============================================================================

/// What a graph work item has to recompute
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Refresh {
    /// Rebuild the whole graph
    pub full: bool,
    /// Only TLS references changed
    pub tls: bool,
    /// Only route bindings changed
    pub routes: bool,
}

impl Refresh {
    pub const FULL: Refresh = Refresh {
        full: true,
        tls: false,
        routes: false,
    };
    pub const TLS: Refresh = Refresh {
        full: false,
        tls: true,
        routes: false,
    };
    pub const ROUTES: Refresh = Refresh {
        full: false,
        tls: false,
        routes: true,
    };

    pub fn merge(self, other: Refresh) -> Refresh {
        Refresh {
            full: self.full || other.full,
            tls: self.tls || other.tls,
            routes: self.routes || other.routes,
        }
    }
}

/// Canonical work item for the graph stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub key: WorkKey,
    pub refresh: Refresh,
}

impl WorkItem {
    pub fn new(key: WorkKey, refresh: Refresh) -> Self {
        Self { key, refresh }
    }

    pub fn full(key: WorkKey) -> Self {
        Self::new(key, Refresh::FULL)
    }
}

impl QueueItem for WorkItem {
    fn key(&self) -> &WorkKey {
        &self.key
    }

    fn merge(&mut self, newer: Self) {
        self.refresh = self.refresh.merge(newer.refresh);
    }
}

impl QueueItem for Change {
    fn key(&self) -> &WorkKey {
        &self.key
    }

    // The cache only needs the latest state of the object
    fn merge(&mut self, newer: Self) {
        self.object = newer.object;
    }
}

// =============================================================================
// ShardedQueue
// =============================================================================

struct ShardState<T> {
    order: VecDeque<WorkKey>,
    pending: HashMap<WorkKey, T>,
}

struct Shard<T> {
    state: Mutex<ShardState<T>>,
    notify: Notify,
}

struct QueueInner<T> {
    name: &'static str,
    shards: Vec<Shard<T>>,
    closed: AtomicBool,
    /// Keys queued or held by a worker that has not called `done`
    outstanding: AtomicUsize,
}

/// Keyed FIFO queue sharded by stable key hash
pub struct ShardedQueue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T: QueueItem> ShardedQueue<T> {
    pub fn new(name: &'static str, shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| Shard {
                state: Mutex::new(ShardState {
                    order: VecDeque::new(),
                    pending: HashMap::new(),
                }),
                notify: Notify::new(),
            })
            .collect();
        Self {
            inner: Arc::new(QueueInner {
                name,
                shards,
                closed: AtomicBool::new(false),
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn shards(&self) -> usize {
        self.inner.shards.len()
    }

    pub fn shard_for(&self, key: &WorkKey) -> usize {
        key.shard(self.inner.shards.len())
    }

    /// Enqueue an item, merging it into a pending item with the same key
    ///
    /// Returns `false` once the queue is closed.
    pub fn add(&self, item: T) -> bool {
        if self.is_closed() {
            return false;
        }
        let shard = &self.inner.shards[self.shard_for(item.key())];
        {
            let mut state = safe_lock(&shard.state);
            if let Some(existing) = state.pending.get_mut(item.key()) {
                existing.merge(item);
                return true;
            }
            state.order.push_back(item.key().clone());
            state.pending.insert(item.key().clone(), item);
            self.inner.outstanding.fetch_add(1, Ordering::SeqCst);
        }
        shard.notify.notify_one();
        true
    }

    /// Next item of `shard`; `None` once the queue is closed and drained
    pub async fn next(&self, shard: usize) -> Option<T> {
        let shard = self.inner.shards.get(shard)?;
        loop {
            {
                let mut state = safe_lock(&shard.state);
                while let Some(key) = state.order.pop_front() {
                    if let Some(item) = state.pending.remove(&key) {
                        return Some(item);
                    }
                }
                if self.is_closed() {
                    return None;
                }
            }
            shard.notify.notified().await;
        }
    }

    /// Mark one item returned by `next` as fully processed
    pub fn done(&self) {
        let _ = self
            .inner
            .outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Stop accepting items; workers drain what is queued then stop
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        for shard in &self.inner.shards {
            shard.notify.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Items waiting in all shards
    pub fn len(&self) -> usize {
        self.inner
            .shards
            .iter()
            .map(|s| safe_lock(&s.state).pending.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queued plus in-flight items
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::SeqCst)
    }
}

impl<T> Clone for ShardedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

// =============================================================================
// DelayQueue
// =============================================================================

struct DelayState<T> {
    heap: BinaryHeap<Reverse<(Instant, WorkKey)>>,
    entries: HashMap<WorkKey, (Instant, T)>,
}

struct DelayInner<T> {
    name: &'static str,
    state: Mutex<DelayState<T>>,
    notify: Notify,
    closed: AtomicBool,
}

/// Keyed timer queue: an item becomes available once its due time passes
///
/// Scheduling a key that is already waiting merges the items and keeps the
/// earlier due time. Closing drops everything still waiting.
pub struct DelayQueue<T> {
    inner: Arc<DelayInner<T>>,
}

impl<T: QueueItem> DelayQueue<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(DelayInner {
                name,
                state: Mutex::new(DelayState {
                    heap: BinaryHeap::new(),
                    entries: HashMap::new(),
                }),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn schedule(&self, delay: Duration, item: T) -> bool {
        if self.is_closed() {
            return false;
        }
        let due = Instant::now() + delay;
        let key = item.key().clone();
        {
            let mut state = safe_lock(&self.inner.state);
            let due = match state.entries.get_mut(&key) {
                Some((existing_due, existing)) => {
                    existing.merge(item);
                    if due >= *existing_due {
                        return true;
                    }
                    *existing_due = due;
                    due
                }
                None => {
                    state.entries.insert(key.clone(), (due, item));
                    due
                }
            };
            state.heap.push(Reverse((due, key)));
        }
        self.inner.notify.notify_one();
        true
    }

    /// Next due item; `None` once closed
    pub async fn next(&self) -> Option<T> {
        loop {
            let wait = {
                let mut state = safe_lock(&self.inner.state);
                if self.is_closed() {
                    state.heap.clear();
                    state.entries.clear();
                    return None;
                }
                let now = Instant::now();
                let mut wait = None;
                while let Some(Reverse((due, key))) = state.heap.peek().cloned() {
                    // Heap entries superseded by an earlier reschedule are stale
                    let current = state.entries.get(&key).map(|(d, _)| *d);
                    if current != Some(due) {
                        state.heap.pop();
                        continue;
                    }
                    if due <= now {
                        state.heap.pop();
                        if let Some((_, item)) = state.entries.remove(&key) {
                            return Some(item);
                        }
                        continue;
                    }
                    wait = Some(due - now);
                    break;
                }
                wait
            };

            match wait {
                Some(delay) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.inner.notify.notified() => {}
                    }
                }
                None => self.inner.notify.notified().await,
            }
        }
    }

    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        safe_lock(&self.inner.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &WorkKey) -> bool {
        safe_lock(&self.inner.state).entries.contains_key(key)
    }
}

impl<T> Clone for DelayQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
