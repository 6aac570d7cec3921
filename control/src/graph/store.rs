//! Graph Store - shared tri-state store of derived configuration graphs
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         GraphStore                               │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ shard = fnv1a(model) % 16                                        │
//! │ ┌──────────────────────────────┐  ┌───────────────────────────┐  │
//! │ │ RwLock<HashMap<Model,Entry>> │  │ Mutex<HashSet<Model>>     │  │
//! │ │ Entry { graph?, revision }   │  │ held writer sections      │  │
//! │ └──────────────────────────────┘  └───────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! An entry is either absent, present with a graph, or a tombstone
//! (present, no graph). Graphs are immutable `Arc`s built completely before
//! they are stored, so a reader never sees a half-built graph.

use crate::error::ControllerError;
use crate::lock::{safe_lock, safe_read, safe_write};
use common::{ConfigGraph, ModelName};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use tracing::debug;

const SHARD_COUNT: usize = 16;

/// Typed view of a store entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Absent,
    Present(Arc<ConfigGraph>),
    Tombstone,
}

impl Lookup {
    pub fn graph(&self) -> Option<&Arc<ConfigGraph>> {
        match self {
            Lookup::Present(graph) => Some(graph),
            _ => None,
        }
    }
}

/// Result of [`GraphStore::set`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publish {
    /// New graph stored under this revision
    Published(u64),
    /// Stored graph was already identical
    Unchanged(u64),
}

impl Publish {
    pub fn revision(&self) -> u64 {
        match self {
            Publish::Published(r) | Publish::Unchanged(r) => *r,
        }
    }
}

#[derive(Debug)]
struct Entry {
    graph: Option<Arc<ConfigGraph>>,
    revision: u64,
}

#[derive(Debug, Default)]
struct StoreShard {
    entries: RwLock<HashMap<ModelName, Entry>>,
    sections: Mutex<HashSet<ModelName>>,
}

/// Lock-free counters for store operations
#[derive(Debug, Default)]
pub struct GraphStoreMetrics {
    publishes: AtomicU64,
    unchanged: AtomicU64,
    tombstones: AtomicU64,
    purges: AtomicU64,
}

impl GraphStoreMetrics {
    pub fn publishes(&self) -> u64 {
        self.publishes.load(Ordering::Relaxed)
    }

    pub fn unchanged(&self) -> u64 {
        self.unchanged.load(Ordering::Relaxed)
    }

    pub fn tombstones(&self) -> u64 {
        self.tombstones.load(Ordering::Relaxed)
    }

    pub fn purges(&self) -> u64 {
        self.purges.load(Ordering::Relaxed)
    }
}

/// Concurrent store of configuration graphs keyed by model name
#[derive(Debug)]
pub struct GraphStore {
    shards: Arc<Vec<StoreShard>>,
    metrics: Arc<GraphStoreMetrics>,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore {
    pub fn new() -> Self {
        Self {
            shards: Arc::new((0..SHARD_COUNT).map(|_| StoreShard::default()).collect()),
            metrics: Arc::new(GraphStoreMetrics::default()),
        }
    }

    #[inline]
    fn shard(&self, model: &ModelName) -> &StoreShard {
        &self.shards[(model.stable_hash() % SHARD_COUNT as u64) as usize]
    }

    /// `(found, graph)`: a tombstone is found with no graph
    pub fn get(&self, model: &ModelName) -> (bool, Option<Arc<ConfigGraph>>) {
        match self.lookup(model) {
            Lookup::Absent => (false, None),
            Lookup::Present(graph) => (true, Some(graph)),
            Lookup::Tombstone => (true, None),
        }
    }

    pub fn lookup(&self, model: &ModelName) -> Lookup {
        let entries = safe_read(&self.shard(model).entries);
        match entries.get(model) {
            None => Lookup::Absent,
            Some(Entry {
                graph: Some(graph), ..
            }) => Lookup::Present(Arc::clone(graph)),
            Some(Entry { graph: None, .. }) => Lookup::Tombstone,
        }
    }

    /// Revision of the entry, bumped by every publish and tombstone
    pub fn revision(&self, model: &ModelName) -> Option<u64> {
        safe_read(&self.shard(model).entries)
            .get(model)
            .map(|e| e.revision)
    }

    /// Claim the writer section of `model`
    pub fn section(&self, model: &ModelName) -> Result<WriteSection<'_>, ControllerError> {
        let mut held = safe_lock(&self.shard(model).sections);
        if !held.insert(model.clone()) {
            return Err(ControllerError::StoreContention(model.clone()));
        }
        Ok(WriteSection {
            store: self,
            model: model.clone(),
        })
    }

    /// Publish a graph under its model name
    ///
    /// An identical graph is not stored again and keeps its revision.
    pub fn set(&self, graph: impl Into<Arc<ConfigGraph>>) -> Publish {
        let graph = graph.into();
        let model = graph.model_name.clone();
        let mut entries = safe_write(&self.shard(&model).entries);
        let entry = entries.entry(model.clone()).or_insert(Entry {
            graph: None,
            revision: 0,
        });

        if entry.graph.as_deref() == Some(&*graph) {
            self.metrics.unchanged.fetch_add(1, Ordering::Relaxed);
            return Publish::Unchanged(entry.revision);
        }

        entry.graph = Some(graph);
        entry.revision += 1;
        self.metrics.publishes.fetch_add(1, Ordering::Relaxed);
        debug!(model = %model, revision = entry.revision, "Published graph");
        Publish::Published(entry.revision)
    }

    /// Mark a present model as pending deletion
    ///
    /// Returns `false` when there was no graph to retire.
    pub fn tombstone(&self, model: &ModelName) -> bool {
        let mut entries = safe_write(&self.shard(model).entries);
        match entries.get_mut(model) {
            Some(entry) if entry.graph.is_some() => {
                entry.graph = None;
                entry.revision += 1;
                self.metrics.tombstones.fetch_add(1, Ordering::Relaxed);
                debug!(model = %model, "Tombstoned graph");
                true
            }
            _ => false,
        }
    }

    /// Remove an entry whatever its state
    pub fn purge(&self, model: &ModelName) -> bool {
        let removed = safe_write(&self.shard(model).entries)
            .remove(model)
            .is_some();
        if removed {
            self.metrics.purges.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Remove an entry only if it is still a tombstone
    pub fn purge_tombstone(&self, model: &ModelName) -> bool {
        let mut entries = safe_write(&self.shard(model).entries);
        if matches!(entries.get(model), Some(Entry { graph: None, .. })) {
            entries.remove(model);
            self.metrics.purges.fetch_add(1, Ordering::Relaxed);
            debug!(model = %model, "Purged tombstone");
            return true;
        }
        false
    }

    /// Number of models holding a graph
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| {
                safe_read(&s.entries)
                    .values()
                    .filter(|e| e.graph.is_some())
                    .count()
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted names of every entry, tombstones included
    pub fn models(&self) -> Vec<ModelName> {
        let mut models: Vec<ModelName> = self
            .shards
            .iter()
            .flat_map(|s| safe_read(&s.entries).keys().cloned().collect::<Vec<_>>())
            .collect();
        models.sort();
        models
    }

    /// Drop every entry (shutdown)
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            safe_write(&shard.entries).clear();
        }
    }

    pub fn metrics(&self) -> &GraphStoreMetrics {
        &self.metrics
    }
}

// Implement Clone to share the same underlying data
impl Clone for GraphStore {
    fn clone(&self) -> Self {
        Self {
            shards: Arc::clone(&self.shards),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl fmt::Display for GraphStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let models = self.models();
        if models.is_empty() {
            return write!(f, "GraphStore: empty");
        }
        let shown: Vec<_> = models.iter().take(3).map(|m| m.to_string()).collect();
        let more = if models.len() > 3 { ", ..." } else { "" };
        write!(
            f,
            "GraphStore: {} model(s) [{}{}]",
            models.len(),
            shown.join(", "),
            more
        )
    }
}

/// Exclusive writer for one model, released on drop
pub struct WriteSection<'a> {
    store: &'a GraphStore,
    model: ModelName,
}

impl WriteSection<'_> {
    pub fn model(&self) -> &ModelName {
        &self.model
    }

    pub fn lookup(&self) -> Lookup {
        self.store.lookup(&self.model)
    }

    pub fn set(&self, graph: ConfigGraph) -> Publish {
        debug_assert_eq!(graph.model_name, self.model);
        self.store.set(graph)
    }

    pub fn tombstone(&self) -> bool {
        self.store.tombstone(&self.model)
    }

    pub fn purge_tombstone(&self) -> bool {
        self.store.purge_tombstone(&self.model)
    }
}

impl Drop for WriteSection<'_> {
    fn drop(&mut self) {
        safe_lock(&self.store.shard(&self.model).sections).remove(&self.model);
    }
}

// =============================================================================
// Global access (downstream readers)
// =============================================================================

static GLOBAL_GRAPH_STORE: OnceLock<GraphStore> = OnceLock::new();

/// Register the process-wide store for downstream readers
///
/// Safe to call multiple times - only the first call takes effect.
pub fn register_global_graph_store(store: &GraphStore) {
    if GLOBAL_GRAPH_STORE.set(store.clone()).is_err() {
        debug!("GraphStore already registered globally");
    }
}

/// The registered store, if any
pub fn shared_graph_store() -> Option<GraphStore> {
    GLOBAL_GRAPH_STORE.get().cloned()
}
