//! In-process object cache
//!
//! Snapshots of the watched Gateway API objects, fed by the watchers and read
//! by admission and the graph builder. Objects are stored behind `Arc` so a
//! reader keeps a consistent view while the watcher replaces the entry.

use crate::lock::{safe_read, safe_write};
use common::{NamespacedName, ObjectKind, Op, ResourceEvent, WorkKey};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use tracing::debug;

// =============================================================================
// Snapshot types
// =============================================================================

/// GatewayClass snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayClass {
    pub name: String,
    pub controller_name: String,
    /// `group/kind/name` of the parameters object, if one is referenced
    pub parameters_ref: Option<String>,
}

/// TLS mode of a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    Terminate,
    Passthrough,
}

/// Listener TLS block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerTls {
    pub mode: TlsMode,
    pub certificate_refs: Vec<NamespacedName>,
}

/// Gateway listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    pub name: String,
    pub port: i32,
    pub protocol: String,
    pub hostname: Option<String>,
    pub tls: Option<ListenerTls>,
}

impl Listener {
    /// SSL is enabled by a terminating TLS block, whatever the protocol
    pub fn enable_ssl(&self) -> bool {
        matches!(
            self.tls,
            Some(ListenerTls {
                mode: TlsMode::Terminate,
                ..
            })
        )
    }
}

/// Gateway snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gateway {
    pub namespace: String,
    pub name: String,
    pub class_name: String,
    pub listeners: Vec<Listener>,
    pub addresses: Vec<String>,
}

impl Gateway {
    pub fn object_ref(&self) -> NamespacedName {
        NamespacedName::new(&self.namespace, &self.name)
    }

    pub fn key(&self) -> WorkKey {
        WorkKey::gateway(&self.namespace, &self.name)
    }

    /// Every Secret referenced by a listener, in any TLS mode
    pub fn secret_refs(&self) -> BTreeSet<NamespacedName> {
        self.listeners
            .iter()
            .filter_map(|l| l.tls.as_ref())
            .flat_map(|tls| tls.certificate_refs.iter().cloned())
            .collect()
    }
}

/// HTTPRoute parent reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRef {
    pub gateway_name: String,
    /// Defaults to the route's namespace
    pub namespace: Option<String>,
    pub port: Option<i32>,
    pub section_name: Option<String>,
}

impl ParentRef {
    pub fn gateway_ref(&self, route_namespace: &str) -> NamespacedName {
        NamespacedName::new(
            self.namespace.as_deref().unwrap_or(route_namespace),
            &self.gateway_name,
        )
    }
}

/// HTTPRoute snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRoute {
    pub namespace: String,
    pub name: String,
    pub parent_refs: Vec<ParentRef>,
    pub hostnames: Vec<String>,
}

impl HttpRoute {
    pub fn object_ref(&self) -> NamespacedName {
        NamespacedName::new(&self.namespace, &self.name)
    }

    /// Distinct Gateways named in `parentRefs`
    pub fn parent_gateways(&self) -> BTreeSet<NamespacedName> {
        self.parent_refs
            .iter()
            .map(|p| p.gateway_ref(&self.namespace))
            .collect()
    }
}

/// TLS Secret snapshot (`tls.crt` / `tls.key`)
#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    pub namespace: String,
    pub name: String,
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

impl Secret {
    pub fn object_ref(&self) -> NamespacedName {
        NamespacedName::new(&self.namespace, &self.name)
    }

    /// Usable by a listener: both halves present
    pub fn is_resolved(&self) -> bool {
        !self.cert.is_empty() && !self.key.is_empty()
    }
}

// Key material stays out of logs
impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("cert_len", &self.cert.len())
            .field("key_len", &self.key.len())
            .finish()
    }
}

/// Tagged snapshot of any watched kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectSnapshot {
    GatewayClass(Arc<GatewayClass>),
    Gateway(Arc<Gateway>),
    HttpRoute(Arc<HttpRoute>),
    Secret(Arc<Secret>),
}

impl ObjectSnapshot {
    pub fn key(&self) -> WorkKey {
        match self {
            ObjectSnapshot::GatewayClass(c) => WorkKey::gateway_class(&c.name),
            ObjectSnapshot::Gateway(g) => g.key(),
            ObjectSnapshot::HttpRoute(r) => WorkKey::http_route(&r.namespace, &r.name),
            ObjectSnapshot::Secret(s) => WorkKey::secret(&s.namespace, &s.name),
        }
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            ObjectSnapshot::GatewayClass(_) => ObjectKind::GatewayClass,
            ObjectSnapshot::Gateway(_) => ObjectKind::Gateway,
            ObjectSnapshot::HttpRoute(_) => ObjectKind::HTTPRoute,
            ObjectSnapshot::Secret(_) => ObjectKind::Secret,
        }
    }
}

impl From<GatewayClass> for ObjectSnapshot {
    fn from(value: GatewayClass) -> Self {
        ObjectSnapshot::GatewayClass(Arc::new(value))
    }
}

impl From<Gateway> for ObjectSnapshot {
    fn from(value: Gateway) -> Self {
        ObjectSnapshot::Gateway(Arc::new(value))
    }
}

impl From<HttpRoute> for ObjectSnapshot {
    fn from(value: HttpRoute) -> Self {
        ObjectSnapshot::HttpRoute(Arc::new(value))
    }
}

impl From<Secret> for ObjectSnapshot {
    fn from(value: Secret) -> Self {
        ObjectSnapshot::Secret(Arc::new(value))
    }
}

/// Change delivered to the ingestion queue
///
/// `object: None` is a deletion.
#[derive(Debug, Clone)]
pub struct Change {
    pub key: WorkKey,
    pub object: Option<ObjectSnapshot>,
}

impl Change {
    pub fn apply(object: ObjectSnapshot) -> Self {
        Self {
            key: object.key(),
            object: Some(object),
        }
    }

    pub fn delete(key: WorkKey) -> Self {
        Self { key, object: None }
    }
}

// =============================================================================
// ObjectCache
// =============================================================================

/// Per-kind snapshot maps
#[derive(Debug, Default)]
pub struct ObjectCache {
    classes: RwLock<HashMap<String, Arc<GatewayClass>>>,
    gateways: RwLock<HashMap<NamespacedName, Arc<Gateway>>>,
    routes: RwLock<HashMap<NamespacedName, Arc<HttpRoute>>>,
    secrets: RwLock<HashMap<NamespacedName, Arc<Secret>>>,
}

impl ObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a snapshot, returning `Add` for a new object and `Update` otherwise
    pub fn apply(&self, object: ObjectSnapshot) -> Op {
        let existed = match object {
            ObjectSnapshot::GatewayClass(c) => {
                safe_write(&self.classes).insert(c.name.clone(), c).is_some()
            }
            ObjectSnapshot::Gateway(g) => safe_write(&self.gateways)
                .insert(g.object_ref(), g)
                .is_some(),
            ObjectSnapshot::HttpRoute(r) => {
                safe_write(&self.routes).insert(r.object_ref(), r).is_some()
            }
            ObjectSnapshot::Secret(s) => {
                safe_write(&self.secrets).insert(s.object_ref(), s).is_some()
            }
        };
        if existed {
            Op::Update
        } else {
            Op::Add
        }
    }

    /// Drop an object; returns the removed snapshot
    pub fn remove(&self, key: &WorkKey) -> Option<ObjectSnapshot> {
        let object_ref = key.object_ref();
        let removed = match key.kind {
            ObjectKind::GatewayClass => safe_write(&self.classes)
                .remove(&key.name)
                .map(ObjectSnapshot::GatewayClass),
            ObjectKind::Gateway => safe_write(&self.gateways)
                .remove(&object_ref)
                .map(ObjectSnapshot::Gateway),
            ObjectKind::HTTPRoute => safe_write(&self.routes)
                .remove(&object_ref)
                .map(ObjectSnapshot::HttpRoute),
            ObjectKind::Secret => safe_write(&self.secrets)
                .remove(&object_ref)
                .map(ObjectSnapshot::Secret),
        };
        if removed.is_some() {
            debug!(key = %key, "Removed object from cache");
        }
        removed
    }

    /// Apply a queued change and describe it as a resource event
    pub fn ingest(&self, change: Change) -> ResourceEvent {
        let op = match change.object {
            Some(object) => self.apply(object),
            None => {
                self.remove(&change.key);
                Op::Delete
            }
        };
        ResourceEvent {
            key: change.key,
            op,
        }
    }

    pub fn get(&self, key: &WorkKey) -> Option<ObjectSnapshot> {
        let object_ref = key.object_ref();
        match key.kind {
            ObjectKind::GatewayClass => self
                .gateway_class(&key.name)
                .map(ObjectSnapshot::GatewayClass),
            ObjectKind::Gateway => self.gateway(&object_ref).map(ObjectSnapshot::Gateway),
            ObjectKind::HTTPRoute => self.http_route(&object_ref).map(ObjectSnapshot::HttpRoute),
            ObjectKind::Secret => self.secret(&object_ref).map(ObjectSnapshot::Secret),
        }
    }

    pub fn gateway_class(&self, name: &str) -> Option<Arc<GatewayClass>> {
        safe_read(&self.classes).get(name).cloned()
    }

    pub fn gateway(&self, gateway: &NamespacedName) -> Option<Arc<Gateway>> {
        safe_read(&self.gateways).get(gateway).cloned()
    }

    pub fn http_route(&self, route: &NamespacedName) -> Option<Arc<HttpRoute>> {
        safe_read(&self.routes).get(route).cloned()
    }

    pub fn secret(&self, secret: &NamespacedName) -> Option<Arc<Secret>> {
        safe_read(&self.secrets).get(secret).cloned()
    }

    /// Sorted keys of every cached object of `kind`
    pub fn keys(&self, kind: ObjectKind) -> Vec<WorkKey> {
        let mut keys: Vec<WorkKey> = match kind {
            ObjectKind::GatewayClass => safe_read(&self.classes)
                .keys()
                .map(WorkKey::gateway_class)
                .collect(),
            ObjectKind::Gateway => safe_read(&self.gateways)
                .keys()
                .map(|k| WorkKey::gateway(&k.namespace, &k.name))
                .collect(),
            ObjectKind::HTTPRoute => safe_read(&self.routes)
                .keys()
                .map(|k| WorkKey::http_route(&k.namespace, &k.name))
                .collect(),
            ObjectKind::Secret => safe_read(&self.secrets)
                .keys()
                .map(|k| WorkKey::secret(&k.namespace, &k.name))
                .collect(),
        };
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        safe_read(&self.classes).len()
            + safe_read(&self.gateways).len()
            + safe_read(&self.routes).len()
            + safe_read(&self.secrets).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
