//! Gateway controller
//!
//! ## Pipeline
//!
//! ```text
//! watchers ─► ingestion queue ─► cache + KeyNormalizer ─► graph queue
//!                                                          │
//!                      ┌──────── fast/slow retry ◄── error ┤
//!                      ▼                                   ▼
//!                 graph queue            admission ─► GraphBuilder ─► GraphStore
//!                                            │
//!                                            └──► StatusWriter ─► status queue ─► StatusSink
//!                                                                   ▲               │
//!                                                                   └─ status retry ◄┘
//! ```
//!
//! Every queue is drained by a fixed worker pool. Sharded queues get one
//! worker per shard, so a key is never processed by two workers at once.

use crate::apis::gateway::admission::Verdict;
use crate::apis::gateway::gateway::{self, GatewayAdmission};
use crate::apis::gateway::gateway_class;
use crate::apis::gateway::gateway_index::{register_global_gateway_index, GatewayIndex};
use crate::apis::gateway::http_route::{self, ParentState};
use crate::apis::gateway::key_normalizer::KeyNormalizer;
use crate::apis::metrics::{
    record_retry, record_status_update, record_work_item, set_graph_store_models,
};
use crate::apis::status::{StatusSink, StatusWriter};
use crate::cache::{Change, Gateway, HttpRoute, ObjectCache, ObjectSnapshot};
use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result, RetryClass};
use crate::graph::{GraphBuilder, GraphStore, Lookup};
use crate::lock::safe_lock;
use crate::queue::{DelayQueue, QueueItem, ShardedQueue, WorkItem};
use common::{ModelName, NamespacedName, ObjectKind, WorkKey};
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

// =============================================================================
// Worker classes
// =============================================================================

/// Worker pools, in shutdown order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerClass {
    Ingestion,
    Graph,
    FastRetry,
    SlowRetry,
    Reaper,
    StatusRetry,
    Status,
}

impl WorkerClass {
    pub const ALL: [WorkerClass; 7] = [
        WorkerClass::Ingestion,
        WorkerClass::Graph,
        WorkerClass::FastRetry,
        WorkerClass::SlowRetry,
        WorkerClass::Reaper,
        WorkerClass::StatusRetry,
        WorkerClass::Status,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            WorkerClass::Ingestion => "ingestion",
            WorkerClass::Graph => "graph",
            WorkerClass::FastRetry => "fast-retry",
            WorkerClass::SlowRetry => "slow-retry",
            WorkerClass::Reaper => "reaper",
            WorkerClass::StatusRetry => "status-retry",
            WorkerClass::Status => "status",
        }
    }

    const fn slot(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for WorkerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Purge request for a tombstoned model
#[derive(Debug, Clone)]
struct Reap {
    key: WorkKey,
    model: ModelName,
}

impl QueueItem for Reap {
    fn key(&self) -> &WorkKey {
        &self.key
    }

    fn merge(&mut self, newer: Self) {
        self.model = newer.model;
    }
}

/// Redelivery of the recorded status of an object
#[derive(Debug, Clone)]
struct Resend {
    key: WorkKey,
}

impl QueueItem for Resend {
    fn key(&self) -> &WorkKey {
        &self.key
    }

    fn merge(&mut self, _newer: Self) {}
}

/// Next step of a key that failed with a retryable error
struct Backoff {
    attempt: u32,
    tier: WorkerClass,
    delay: Duration,
}

// =============================================================================
// GatewayController
// =============================================================================

struct Inner {
    config: ControllerConfig,
    cache: Arc<ObjectCache>,
    index: GatewayIndex,
    normalizer: KeyNormalizer,
    store: GraphStore,
    builder: GraphBuilder,
    status: StatusWriter,
    sink: Arc<dyn StatusSink>,
    ingestion: ShardedQueue<Change>,
    graph: ShardedQueue<WorkItem>,
    fast_retry: DelayQueue<WorkItem>,
    slow_retry: DelayQueue<WorkItem>,
    reaper: DelayQueue<Reap>,
    status_retry: DelayQueue<Resend>,
    /// Backoff attempts per key since its last success
    attempts: Mutex<HashMap<WorkKey, u32>>,
    /// Failed status deliveries per key since its last delivery
    status_attempts: Mutex<HashMap<WorkKey, u32>>,
    /// GatewayClasses this controller has accepted, kept after their deletion
    accepted_classes: Mutex<HashSet<String>>,
    handles: Mutex<HashMap<WorkerClass, Vec<JoinHandle<()>>>>,
    running: [AtomicUsize; 7],
    started: AtomicBool,
}

/// Decrements the running count of a worker class when a worker exits
struct RunningGuard {
    inner: Arc<Inner>,
    class: WorkerClass,
}

impl RunningGuard {
    fn enter(inner: &Arc<Inner>, class: WorkerClass) -> Self {
        inner.running[class.slot()].fetch_add(1, Ordering::SeqCst);
        Self {
            inner: Arc::clone(inner),
            class,
        }
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.inner.running[self.class.slot()].fetch_sub(1, Ordering::SeqCst);
    }
}

/// Reconciliation engine for GatewayClasses, Gateways, HTTPRoutes and Secrets
#[derive(Clone)]
pub struct GatewayController {
    inner: Arc<Inner>,
}

impl GatewayController {
    pub fn new(config: ControllerConfig, sink: Arc<dyn StatusSink>) -> Self {
        let cache = Arc::new(ObjectCache::new());
        let index = GatewayIndex::new();
        let status_queue = ShardedQueue::new("status", config.workers.status);

        let inner = Inner {
            normalizer: KeyNormalizer::new(Arc::clone(&cache), index.clone()),
            builder: GraphBuilder::from_config(&config),
            status: StatusWriter::new(status_queue),
            ingestion: ShardedQueue::new("ingestion", config.workers.ingestion),
            graph: ShardedQueue::new("graph", config.workers.graph),
            fast_retry: DelayQueue::new("fast-retry"),
            slow_retry: DelayQueue::new("slow-retry"),
            reaper: DelayQueue::new("reaper"),
            status_retry: DelayQueue::new("status-retry"),
            store: GraphStore::new(),
            attempts: Mutex::new(HashMap::new()),
            status_attempts: Mutex::new(HashMap::new()),
            accepted_classes: Mutex::new(HashSet::new()),
            handles: Mutex::new(HashMap::new()),
            running: Default::default(),
            started: AtomicBool::new(false),
            cache,
            index,
            sink,
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Spawn every worker pool; calling it again is a no-op
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        register_global_gateway_index(&self.inner.index);

        let mut handles = safe_lock(&self.inner.handles);
        for class in WorkerClass::ALL {
            let spawned: Vec<JoinHandle<()>> = match class {
                WorkerClass::Ingestion => (0..self.inner.ingestion.shards())
                    .map(|shard| tokio::spawn(ingestion_worker(self.inner.clone(), shard)))
                    .collect(),
                WorkerClass::Graph => (0..self.inner.graph.shards())
                    .map(|shard| tokio::spawn(graph_worker(self.inner.clone(), shard)))
                    .collect(),
                WorkerClass::FastRetry => {
                    vec![tokio::spawn(retry_worker(self.inner.clone(), class))]
                }
                WorkerClass::SlowRetry => {
                    vec![tokio::spawn(retry_worker(self.inner.clone(), class))]
                }
                WorkerClass::Reaper => vec![tokio::spawn(reaper_worker(self.inner.clone()))],
                WorkerClass::StatusRetry => {
                    vec![tokio::spawn(status_retry_worker(self.inner.clone()))]
                }
                WorkerClass::Status => (0..self.inner.status.queue().shards())
                    .map(|shard| tokio::spawn(status_worker(self.inner.clone(), shard)))
                    .collect(),
            };
            handles.insert(class, spawned);
        }

        info!(
            controller = %self.inner.config.controller_name,
            ingestion = self.inner.ingestion.shards(),
            graph = self.inner.graph.shards(),
            status = self.inner.status.queue().shards(),
            "Gateway controller started"
        );
    }

    /// Queue an added or updated object
    pub fn apply(&self, object: impl Into<ObjectSnapshot>) -> bool {
        self.inner.ingestion.add(Change::apply(object.into()))
    }

    /// Queue a deletion
    pub fn delete(&self, key: WorkKey) -> bool {
        self.inner.ingestion.add(Change::delete(key))
    }

    pub fn store(&self) -> &GraphStore {
        &self.inner.store
    }

    pub fn cache(&self) -> &ObjectCache {
        &self.inner.cache
    }

    pub fn index(&self) -> &GatewayIndex {
        &self.inner.index
    }

    pub fn status(&self) -> &StatusWriter {
        &self.inner.status
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    /// Model name the Gateway `gateway` publishes under
    pub fn model_name(&self, gateway: &NamespacedName) -> ModelName {
        self.inner.builder.model_name(gateway)
    }

    pub fn running_workers(&self, class: WorkerClass) -> usize {
        self.inner.running[class.slot()].load(Ordering::SeqCst)
    }

    /// Running workers per class, in shutdown order
    pub fn worker_counts(&self) -> Vec<(WorkerClass, usize)> {
        WorkerClass::ALL
            .into_iter()
            .map(|class| (class, self.running_workers(class)))
            .collect()
    }

    /// Keys waiting in a retry tier, status redeliveries included
    pub fn pending_retries(&self) -> usize {
        WorkerClass::ALL
            .into_iter()
            .map(|class| self.retry_backlog(class))
            .sum()
    }

    /// Keys waiting in the retry tier drained by `class`
    pub fn retry_backlog(&self, class: WorkerClass) -> usize {
        match class {
            WorkerClass::FastRetry => self.inner.fast_retry.len(),
            WorkerClass::SlowRetry => self.inner.slow_retry.len(),
            WorkerClass::StatusRetry => self.inner.status_retry.len(),
            _ => 0,
        }
    }

    /// No queued or in-flight work in the ingestion, graph and status stages
    pub fn is_idle(&self) -> bool {
        self.inner.ingestion.outstanding() == 0
            && self.inner.graph.outstanding() == 0
            && self.inner.status.queue().outstanding() == 0
    }

    /// Wait until the pipeline is idle; `false` on timeout
    pub async fn settle(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            while !self.is_idle() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }

    /// Close the queues class by class, drain, then clear the store
    pub async fn shutdown(&self) {
        let grace = self.inner.config.shutdown_grace();
        info!(grace_secs = grace.as_secs(), "Shutting down gateway controller");

        for class in WorkerClass::ALL {
            match class {
                WorkerClass::Ingestion => self.inner.ingestion.close(),
                WorkerClass::Graph => self.inner.graph.close(),
                WorkerClass::FastRetry => self.inner.fast_retry.close(),
                WorkerClass::SlowRetry => self.inner.slow_retry.close(),
                WorkerClass::Reaper => self.inner.reaper.close(),
                WorkerClass::StatusRetry => self.inner.status_retry.close(),
                WorkerClass::Status => self.inner.status.queue().close(),
            }

            let mut handles = safe_lock(&self.inner.handles)
                .remove(&class)
                .unwrap_or_default();
            if handles.is_empty() {
                continue;
            }
            let drained = tokio::time::timeout(grace, join_all(handles.iter_mut()))
                .await
                .is_ok();
            if !drained {
                warn!(class = %class, "Workers did not drain within grace period, aborting");
                for handle in &handles {
                    handle.abort();
                }
            }
            debug!(class = %class, "Worker class stopped");
        }

        self.inner.store.clear();
        set_graph_store_models(0);
        info!("Gateway controller stopped");
    }
}

// =============================================================================
// Workers
// =============================================================================

async fn ingestion_worker(inner: Arc<Inner>, shard: usize) {
    let _running = RunningGuard::enter(&inner, WorkerClass::Ingestion);
    while let Some(change) = inner.ingestion.next(shard).await {
        let event = inner.cache.ingest(change);
        for item in inner.normalizer.normalize(&event) {
            if !inner.graph.add(item) {
                debug!(key = %event.key, "Graph queue closed, dropping work item");
            }
        }
        inner.ingestion.done();
    }
}

async fn graph_worker(inner: Arc<Inner>, shard: usize) {
    let _running = RunningGuard::enter(&inner, WorkerClass::Graph);
    while let Some(item) = inner.graph.next(shard).await {
        let started = Instant::now();
        let result = inner.process(&item);
        let elapsed = started.elapsed().as_secs_f64();
        match &result {
            Ok(()) => record_work_item(item.key.kind.as_str(), elapsed, "success"),
            Err(err) => record_work_item(item.key.kind.as_str(), elapsed, err.label()),
        }
        inner.handle_result(item, result).await;
        inner.graph.done();
    }
}

async fn retry_worker(inner: Arc<Inner>, class: WorkerClass) {
    let _running = RunningGuard::enter(&inner, class);
    let queue = match class {
        WorkerClass::SlowRetry => &inner.slow_retry,
        _ => &inner.fast_retry,
    };
    while let Some(item) = queue.next().await {
        debug!(key = %item.key, tier = queue.name(), "Retrying work item");
        if !inner.graph.add(item) {
            break;
        }
    }
}

async fn reaper_worker(inner: Arc<Inner>) {
    let _running = RunningGuard::enter(&inner, WorkerClass::Reaper);
    while let Some(reap) = inner.reaper.next().await {
        if inner.store.purge_tombstone(&reap.model) {
            info!(key = %reap.key, model = %reap.model, "Purged tombstoned model");
        }
    }
}

async fn status_worker(inner: Arc<Inner>, shard: usize) {
    let _running = RunningGuard::enter(&inner, WorkerClass::Status);
    let queue = inner.status.queue().clone();
    while let Some(update) = queue.next(shard).await {
        let key = update.report.key.clone();
        match inner.sink.deliver(&update).await {
            Ok(()) => {
                safe_lock(&inner.status_attempts).remove(&key);
                record_status_update(key.kind.as_str(), "success");
            }
            Err(err) => {
                record_status_update(key.kind.as_str(), "error");
                inner.status.invalidate(&key);
                inner.retry_status(key, err);
            }
        }
        queue.done();
    }
}

async fn status_retry_worker(inner: Arc<Inner>) {
    let _running = RunningGuard::enter(&inner, WorkerClass::StatusRetry);
    while let Some(Resend { key }) = inner.status_retry.next().await {
        if !inner.status.requeue(&key) {
            debug!(key = %key, "Status no longer tracked, dropping redelivery");
            safe_lock(&inner.status_attempts).remove(&key);
        }
    }
}

// =============================================================================
// Processing
// =============================================================================

impl Inner {
    fn controller_name(&self) -> &str {
        &self.config.controller_name
    }

    fn process(&self, item: &WorkItem) -> Result<()> {
        match item.key.kind {
            ObjectKind::GatewayClass => self.process_class(&item.key),
            ObjectKind::Gateway => self.process_gateway(item),
            ObjectKind::HTTPRoute => self.process_route(&item.key),
            // Secrets only matter through the Gateways referencing them
            ObjectKind::Secret => Ok(()),
        }
    }

    fn process_class(&self, key: &WorkKey) -> Result<()> {
        let Some(class) = self.cache.gateway_class(&key.name) else {
            self.status.forget(key);
            return Ok(());
        };

        let verdict = gateway_class::admit(&class, self.controller_name());
        {
            let mut accepted = safe_lock(&self.accepted_classes);
            if verdict.is_accepted() {
                accepted.insert(class.name.clone());
            } else {
                accepted.remove(&class.name);
            }
        }
        if let Some(report) = gateway_class::status_report(&class, &verdict, self.controller_name())
        {
            self.status.report(report);
        }
        match verdict {
            Verdict::Rejected(rejection) if !rejection.is_silent() => {
                Err(ControllerError::Validation {
                    key: key.clone(),
                    reason: rejection.message,
                })
            }
            _ => Ok(()),
        }
    }

    /// Admit `gateway` against its class; a deleted class that was accepted
    /// rejects the Gateway instead of leaving it pending
    fn gateway_admission(&self, gateway: &Gateway) -> GatewayAdmission {
        let class = self.cache.gateway_class(&gateway.class_name);
        if class.is_none() && safe_lock(&self.accepted_classes).contains(&gateway.class_name) {
            return gateway::class_removed(gateway);
        }
        gateway::admit(gateway, class.as_deref(), self.controller_name())
    }

    fn routes_for(&self, gateway: &NamespacedName) -> Vec<Arc<HttpRoute>> {
        self.index
            .routes_for_gateway(gateway)
            .iter()
            .filter_map(|route| self.cache.http_route(route))
            .collect()
    }

    /// Tombstone the model of a Gateway and schedule its purge
    fn retire(&self, key: &WorkKey, model: &ModelName) -> Result<()> {
        let section = self.store.section(model)?;
        if section.tombstone() {
            info!(key = %key, model = %model, "Tombstoned model");
            self.reaper.schedule(
                self.config.tombstone_ttl(),
                Reap {
                    key: key.clone(),
                    model: model.clone(),
                },
            );
            set_graph_store_models(self.store.len());
        }
        Ok(())
    }

    fn process_gateway(&self, item: &WorkItem) -> Result<()> {
        let key = &item.key;
        let owner = key.object_ref();
        let model = self.builder.model_name(&owner);

        let Some(gateway) = self.cache.gateway(&owner) else {
            self.status.forget(key);
            return self.retire(key, &model);
        };

        let mut admission = self.gateway_admission(&gateway);
        if matches!(admission.verdict, Verdict::Pending { .. })
            && matches!(self.store.lookup(&model), Lookup::Present(_))
        {
            admission = gateway::class_removed(&gateway);
        }
        match &admission.verdict {
            Verdict::Pending { message } => {
                debug!(key = %key, reason = %message, "Gateway pending");
                if let Some(report) = gateway::status_report(&gateway, &admission, None, &[]) {
                    self.status.report(report);
                }
                return Ok(());
            }
            Verdict::Rejected(rejection) if rejection.is_silent() => {
                debug!(key = %key, "Gateway belongs to another controller");
                return self.retire(key, &model);
            }
            Verdict::Rejected(rejection) => {
                self.retire(key, &model)?;
                if let Some(report) = gateway::status_report(&gateway, &admission, None, &[]) {
                    self.status.report(report);
                }
                return Err(ControllerError::Validation {
                    key: key.clone(),
                    reason: rejection.message.clone(),
                });
            }
            Verdict::Accepted => {}
        }

        let section = self.store.section(&model)?;
        let lookup = section.lookup();
        if let Some(existing) = lookup.graph() {
            if existing.owner != owner {
                return Err(ControllerError::BuildConflict {
                    model,
                    existing: existing.owner.clone(),
                    incoming: owner,
                });
            }
        }

        let routes = self.routes_for(&owner);
        let build = lookup
            .graph()
            .and_then(|existing| {
                self.builder.patch(
                    existing,
                    item.refresh,
                    &gateway,
                    &admission.valid,
                    &routes,
                    &self.cache,
                )
            })
            .unwrap_or_else(|| {
                self.builder
                    .build(&gateway, &admission.valid, &routes, &self.cache)
            });

        let publish = section.set(build.graph.clone());
        drop(section);
        debug!(key = %key, model = %model, revision = publish.revision(), "Published graph");
        set_graph_store_models(self.store.len());

        if let Some(report) =
            gateway::status_report(&gateway, &admission, Some(&build.graph), &build.unresolved)
        {
            self.status.report(report);
        }

        match build.unresolved.first() {
            Some(secret) => Err(ControllerError::UnresolvedDependency {
                key: key.clone(),
                dependency: WorkKey::secret(&secret.namespace, &secret.name),
            }),
            None => Ok(()),
        }
    }

    fn parent_state(&self, gateway: &NamespacedName) -> ParentState {
        let Some(gateway) = self.cache.gateway(gateway) else {
            return ParentState::Missing;
        };
        let admission = self.gateway_admission(&gateway);
        match admission.verdict {
            Verdict::Accepted => ParentState::Listeners(admission.valid),
            Verdict::Pending { .. } => ParentState::Missing,
            Verdict::Rejected(rejection) if rejection.is_silent() => ParentState::Unmanaged,
            Verdict::Rejected(_) => ParentState::Listeners(Vec::new()),
        }
    }

    fn process_route(&self, key: &WorkKey) -> Result<()> {
        let Some(route) = self.cache.http_route(&key.object_ref()) else {
            self.status.forget(key);
            return Ok(());
        };

        let parents: BTreeMap<NamespacedName, ParentState> = route
            .parent_gateways()
            .into_iter()
            .map(|gateway| {
                let state = self.parent_state(&gateway);
                (gateway, state)
            })
            .collect();

        let admission = http_route::admit(
            &route,
            &parents,
            self.config.allow_wildcard_route_hostnames,
        );
        if let Some(report) = http_route::status_report(&route, &admission) {
            self.status.report(report);
        }

        match admission.verdict {
            Verdict::Rejected(rejection) => Err(ControllerError::Validation {
                key: key.clone(),
                reason: rejection.message,
            }),
            Verdict::Pending { message } => {
                debug!(key = %key, reason = %message, "HTTPRoute pending");
                Ok(())
            }
            Verdict::Accepted => Ok(()),
        }
    }

    /// Count a failed attempt for `key` and pick its retry tier
    fn backoff(&self, attempts: &Mutex<HashMap<WorkKey, u32>>, key: &WorkKey) -> Backoff {
        let attempt = {
            let mut attempts = safe_lock(attempts);
            let attempt = attempts.entry(key.clone()).or_insert(0);
            *attempt = attempt.saturating_add(1);
            *attempt
        };
        let retry = &self.config.retry;
        if attempt <= retry.fast_max_attempts {
            Backoff {
                attempt,
                tier: WorkerClass::FastRetry,
                delay: retry.fast_delay(attempt),
            }
        } else {
            Backoff {
                attempt,
                tier: WorkerClass::SlowRetry,
                delay: retry.slow_interval(),
            }
        }
    }

    /// Schedule the redelivery of a failed status report
    fn retry_status(&self, key: WorkKey, err: ControllerError) {
        if err.retry_class() == RetryClass::Terminal {
            safe_lock(&self.status_attempts).remove(&key);
            warn!(key = %key, error = %err, "Status delivery failed, not retrying");
            return;
        }
        let backoff = self.backoff(&self.status_attempts, &key);
        warn!(
            key = %key,
            attempt = backoff.attempt,
            tier = %backoff.tier,
            delay_ms = backoff.delay.as_millis() as u64,
            error = %err,
            "Status delivery failed, scheduling redelivery"
        );
        record_retry("status");
        self.status_retry.schedule(backoff.delay, Resend { key });
    }

    /// Classify a failed item at the queue boundary
    async fn handle_result(&self, item: WorkItem, result: Result<()>) {
        let err = match result {
            Ok(()) => {
                safe_lock(&self.attempts).remove(&item.key);
                return;
            }
            Err(err) => err,
        };

        match err.retry_class() {
            RetryClass::Immediate => {
                debug!(key = %item.key, error = %err, "Requeueing immediately");
                record_retry("immediate");
                tokio::task::yield_now().await;
                self.graph.add(item);
            }
            RetryClass::Backoff => {
                let backoff = self.backoff(&self.attempts, &item.key);
                if backoff.tier == WorkerClass::FastRetry {
                    debug!(
                        key = %item.key,
                        attempt = backoff.attempt,
                        delay_ms = backoff.delay.as_millis() as u64,
                        error = %err,
                        "Scheduling fast retry"
                    );
                    record_retry("fast");
                    self.fast_retry.schedule(backoff.delay, item);
                } else {
                    warn!(
                        key = %item.key,
                        attempt = backoff.attempt,
                        error = %err,
                        "Fast retries exhausted, moving to slow retry"
                    );
                    record_retry("slow");
                    self.slow_retry.schedule(backoff.delay, item);
                }
            }
            RetryClass::Terminal => {
                safe_lock(&self.attempts).remove(&item.key);
                match &err {
                    ControllerError::BuildConflict { .. } => {
                        error!(key = %item.key, error = %err, "Build conflict, dropping work item")
                    }
                    _ => warn!(key = %item.key, error = %err, "Dropping work item"),
                }
            }
        }
    }
}
