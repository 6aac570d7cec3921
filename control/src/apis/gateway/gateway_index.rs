//! Gateway Index - reverse references between Gateways and their dependencies
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          GatewayIndex                                 │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  Refs (Arc<RwLock<..>>)                │  Metrics (Atomics)           │
//! │  class   → {gateway}   gateway → class │  lookups: AtomicU64          │
//! │  secret  → {gateway}   gateway → {sec} │  hits: AtomicU64             │
//! │  route   → {gateway}   gateway → {rt}  │  updates: AtomicU64          │
//! │                                        │  removes: AtomicU64          │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every forward edge has its reverse edge, so a change to a class, Secret or
//! route maps to the Gateways it affects without scanning the cache.

use crate::lock::{safe_read, safe_write};
use common::NamespacedName;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use tracing::debug;

// =============================================================================
// GatewayIndexMetrics - Lock-free atomic counters
// =============================================================================

/// Lock-free metrics for GatewayIndex operations
///
/// Only formatted to strings when Prometheus scrapes `/metrics`.
#[derive(Debug, Default)]
pub struct GatewayIndexMetrics {
    /// Reverse lookups (`gateways_for_*`, `routes_for_gateway`)
    lookups: AtomicU64,
    /// Lookups that found at least one dependent
    hits: AtomicU64,
    updates: AtomicU64,
    removes: AtomicU64,
}

impl GatewayIndexMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn record_lookup(&self, hit: bool) {
        // Relaxed ordering is fine for counters
        self.lookups.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline(always)]
    pub fn record_update(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_remove(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    pub fn removes(&self) -> u64 {
        self.removes.load(Ordering::Relaxed)
    }

    /// Calculate hit rate (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.lookups();
        if lookups == 0 {
            return 0.0;
        }
        self.hits() as f64 / lookups as f64
    }

    /// Format metrics in Prometheus exposition format
    pub fn to_prometheus(&self) -> String {
        format!(
            r#"# HELP gateway_index_lookups_total Reverse dependency lookups
# TYPE gateway_index_lookups_total counter
gateway_index_lookups_total {lookups}
# HELP gateway_index_hits_total Reverse lookups that found dependents
# TYPE gateway_index_hits_total counter
gateway_index_hits_total {hits}
# HELP gateway_index_updates_total Gateway and route reference updates
# TYPE gateway_index_updates_total counter
gateway_index_updates_total {updates}
# HELP gateway_index_removes_total Gateway and route reference removals
# TYPE gateway_index_removes_total counter
gateway_index_removes_total {removes}
# HELP gateway_index_hit_rate Reverse lookup hit rate
# TYPE gateway_index_hit_rate gauge
gateway_index_hit_rate {hit_rate}"#,
            lookups = self.lookups(),
            hits = self.hits(),
            updates = self.updates(),
            removes = self.removes(),
            hit_rate = self.hit_rate(),
        )
    }
}

// =============================================================================
// GatewayIndex
// =============================================================================

#[derive(Debug, Default)]
struct Refs {
    class_gateways: HashMap<String, BTreeSet<NamespacedName>>,
    gateway_class: HashMap<NamespacedName, String>,
    secret_gateways: HashMap<NamespacedName, BTreeSet<NamespacedName>>,
    gateway_secrets: HashMap<NamespacedName, BTreeSet<NamespacedName>>,
    route_gateways: HashMap<NamespacedName, BTreeSet<NamespacedName>>,
    gateway_routes: HashMap<NamespacedName, BTreeSet<NamespacedName>>,
}

/// Drop `value` from the set under `key`, removing the set once empty
fn unlink<K, V>(map: &mut HashMap<K, BTreeSet<V>>, key: &K, value: &V)
where
    K: std::hash::Hash + Eq,
    V: Ord,
{
    if let Some(set) = map.get_mut(key) {
        set.remove(value);
        if set.is_empty() {
            map.remove(key);
        }
    }
}

impl Refs {
    fn unlink_gateway(&mut self, gateway: &NamespacedName) -> bool {
        let class = self.gateway_class.remove(gateway);
        if let Some(class) = &class {
            unlink(&mut self.class_gateways, class, gateway);
        }
        let secrets = self.gateway_secrets.remove(gateway).unwrap_or_default();
        for secret in &secrets {
            unlink(&mut self.secret_gateways, secret, gateway);
        }
        class.is_some() || !secrets.is_empty()
    }

    fn unlink_route(&mut self, route: &NamespacedName) -> BTreeSet<NamespacedName> {
        let parents = self.route_gateways.remove(route).unwrap_or_default();
        for gateway in &parents {
            unlink(&mut self.gateway_routes, gateway, route);
        }
        parents
    }
}

/// Thread-safe reverse index of Gateway dependencies
///
/// ```ignore
/// let index = GatewayIndex::new();
/// index.update_gateway(&gw, "gateway-class-01", secrets);
///
/// // Secret changed: which Gateways must be rebuilt?
/// for gw in index.gateways_for_secret(&secret) { ... }
/// ```
#[derive(Debug)]
pub struct GatewayIndex {
    inner: Arc<RwLock<Refs>>,
    /// Lock-free metrics (shared across clones)
    metrics: Arc<GatewayIndexMetrics>,
}

impl Default for GatewayIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayIndex {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Refs::default())),
            metrics: Arc::new(GatewayIndexMetrics::new()),
        }
    }

    /// Replace the class and Secret references of a Gateway
    pub fn update_gateway(
        &self,
        gateway: &NamespacedName,
        class: &str,
        secrets: impl IntoIterator<Item = NamespacedName>,
    ) {
        let mut inner = safe_write(&self.inner);
        inner.unlink_gateway(gateway);

        inner.gateway_class.insert(gateway.clone(), class.to_string());
        inner
            .class_gateways
            .entry(class.to_string())
            .or_default()
            .insert(gateway.clone());

        let secrets: BTreeSet<NamespacedName> = secrets.into_iter().collect();
        for secret in &secrets {
            inner
                .secret_gateways
                .entry(secret.clone())
                .or_default()
                .insert(gateway.clone());
        }
        if !secrets.is_empty() {
            inner.gateway_secrets.insert(gateway.clone(), secrets);
        }
        self.metrics.record_update();
        debug!(
            "GatewayIndex: updated {} (class: {}, gateways: {})",
            gateway,
            class,
            inner.gateway_class.len()
        );
    }

    /// Drop a Gateway's class and Secret references
    ///
    /// Routes naming the Gateway keep their edges; they still point at it
    /// and must be re-evaluated if it comes back.
    pub fn remove_gateway(&self, gateway: &NamespacedName) -> bool {
        let was_present = safe_write(&self.inner).unlink_gateway(gateway);
        self.metrics.record_remove();
        if was_present {
            debug!("GatewayIndex: removed {}", gateway);
        }
        was_present
    }

    /// Replace the parent Gateways of a route, returning the previous ones
    pub fn update_route(
        &self,
        route: &NamespacedName,
        parents: impl IntoIterator<Item = NamespacedName>,
    ) -> BTreeSet<NamespacedName> {
        let mut inner = safe_write(&self.inner);
        let previous = inner.unlink_route(route);

        let parents: BTreeSet<NamespacedName> = parents.into_iter().collect();
        for gateway in &parents {
            inner
                .gateway_routes
                .entry(gateway.clone())
                .or_default()
                .insert(route.clone());
        }
        if !parents.is_empty() {
            inner.route_gateways.insert(route.clone(), parents);
        }
        self.metrics.record_update();
        previous
    }

    /// Drop a route, returning the Gateways it named
    pub fn remove_route(&self, route: &NamespacedName) -> BTreeSet<NamespacedName> {
        let previous = safe_write(&self.inner).unlink_route(route);
        self.metrics.record_remove();
        previous
    }

    fn lookup(
        &self,
        select: impl FnOnce(&Refs) -> Option<&BTreeSet<NamespacedName>>,
    ) -> Vec<NamespacedName> {
        let inner = safe_read(&self.inner);
        let found: Vec<NamespacedName> = select(&inner)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        self.metrics.record_lookup(!found.is_empty());
        found
    }

    /// Gateways with a listener referencing `secret`, sorted
    pub fn gateways_for_secret(&self, secret: &NamespacedName) -> Vec<NamespacedName> {
        self.lookup(|refs| refs.secret_gateways.get(secret))
    }

    /// Gateways of class `class`, sorted
    pub fn gateways_for_class(&self, class: &str) -> Vec<NamespacedName> {
        self.lookup(|refs| refs.class_gateways.get(class))
    }

    /// Routes with a parentRef naming `gateway`, sorted
    pub fn routes_for_gateway(&self, gateway: &NamespacedName) -> Vec<NamespacedName> {
        self.lookup(|refs| refs.gateway_routes.get(gateway))
    }

    /// Gateways named by the parentRefs of `route`, sorted
    pub fn gateways_for_route(&self, route: &NamespacedName) -> Vec<NamespacedName> {
        self.lookup(|refs| refs.route_gateways.get(route))
    }

    /// Class last recorded for `gateway`
    pub fn class_of(&self, gateway: &NamespacedName) -> Option<String> {
        safe_read(&self.inner).gateway_class.get(gateway).cloned()
    }

    /// Number of indexed Gateways
    pub fn len(&self) -> usize {
        safe_read(&self.inner).gateway_class.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Indexed Gateways, sorted
    pub fn gateways(&self) -> Vec<NamespacedName> {
        let inner = safe_read(&self.inner);
        let mut gateways: Vec<_> = inner.gateway_class.keys().cloned().collect();
        gateways.sort();
        gateways
    }

    /// Get metrics reference (for testing/debugging)
    pub fn metrics(&self) -> &GatewayIndexMetrics {
        &self.metrics
    }

    /// Format metrics in Prometheus exposition format
    pub fn prometheus_metrics(&self) -> String {
        let (gateways, routes) = {
            let inner = safe_read(&self.inner);
            (inner.gateway_class.len(), inner.route_gateways.len())
        };
        format!(
            "{}\n# HELP gateway_index_gateways Gateways with indexed references\n# TYPE gateway_index_gateways gauge\ngateway_index_gateways {}\n# HELP gateway_index_routes Routes with indexed parent references\n# TYPE gateway_index_routes gauge\ngateway_index_routes {}",
            self.metrics.to_prometheus(),
            gateways,
            routes,
        )
    }
}

// Clone shares the same underlying data
impl Clone for GatewayIndex {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl fmt::Display for GatewayIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let gateways = self.gateways();
        let count = gateways.len();

        if count == 0 {
            return write!(f, "GatewayIndex: empty");
        }
        let shown: Vec<_> = gateways.iter().take(3).map(|k| k.to_string()).collect();
        let more = if count > 3 { ", ..." } else { "" };
        write!(
            f,
            "GatewayIndex: {} gateway(s) [{}{}]",
            count,
            shown.join(", "),
            more
        )
    }
}

// =============================================================================
// Global Metrics Access (for /metrics endpoint)
// =============================================================================

static GLOBAL_GATEWAY_INDEX: OnceLock<GatewayIndex> = OnceLock::new();

/// Register a GatewayIndex for global metrics access
///
/// Only the first call takes effect.
pub fn register_global_gateway_index(index: &GatewayIndex) {
    if GLOBAL_GATEWAY_INDEX.set(index.clone()).is_err() {
        debug!("GatewayIndex already registered globally");
    }
}

/// GatewayIndex metrics in Prometheus format, empty if none is registered
pub fn gateway_index_metrics() -> String {
    GLOBAL_GATEWAY_INDEX
        .get()
        .map(|index| index.prometheus_metrics())
        .unwrap_or_default()
}
