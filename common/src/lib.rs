//! lbgraph Common Types
//!
//! Core data structures shared by the reconciliation engine and the
//! downstream sync layer:
//!
//! - [`WorkKey`]: canonical `Kind/Namespace/Name` identity of a work item
//! - [`ModelName`]: storage key of a Gateway's derived configuration graph
//! - [`ConfigGraph`] / [`VsNode`]: the derived load-balancer configuration

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Separator between the cluster name and the Gateway identity in a parent name
pub const PARENT_NAME_SEPARATOR: &str = "--";

/// Suffix of the VS VIP object derived for every Gateway
pub const VSVIP_SUFFIX: &str = "-vsvip";

// =============================================================================
// ObjectKind / Op / ResourceEvent
// =============================================================================

/// Kubernetes object kinds flowing through the work queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ObjectKind {
    GatewayClass,
    Gateway,
    HTTPRoute,
    Secret,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 4] = [
        ObjectKind::GatewayClass,
        ObjectKind::Gateway,
        ObjectKind::HTTPRoute,
        ObjectKind::Secret,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::GatewayClass => "GatewayClass",
            ObjectKind::Gateway => "Gateway",
            ObjectKind::HTTPRoute => "HTTPRoute",
            ObjectKind::Secret => "Secret",
        }
    }

    /// GatewayClass is the only cluster-scoped kind we watch
    pub const fn is_namespaced(&self) -> bool {
        !matches!(self, ObjectKind::GatewayClass)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing kinds or work keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseKeyError(String);

impl fmt::Display for ParseKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid work key: {}", self.0)
    }
}

impl std::error::Error for ParseKeyError {}

impl FromStr for ObjectKind {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ObjectKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ParseKeyError(format!("unknown kind '{}'", s)))
    }
}

/// Change operation delivered by the watch source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Op {
    Add,
    Update,
    Delete,
}

/// Raw change notification: `(Kind, Namespace, Name, Op)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEvent {
    pub key: WorkKey,
    pub op: Op,
}

impl ResourceEvent {
    pub fn new(kind: ObjectKind, namespace: &str, name: &str, op: Op) -> Self {
        Self {
            key: WorkKey::new(kind, namespace, name),
            op,
        }
    }
}

// =============================================================================
// NamespacedName
// =============================================================================

/// Namespace + name pair used for every cross-object reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    #[inline]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// =============================================================================
// WorkKey
// =============================================================================

/// Canonical work key: `Kind/Namespace/Name` (`Kind/Name` for cluster-scoped kinds)
///
/// Ordering follows the string form so keys sort the same way in every
/// component that logs or indexes them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WorkKey {
    pub kind: ObjectKind,
    pub namespace: String,
    pub name: String,
}

impl WorkKey {
    pub fn new(kind: ObjectKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let namespace = if kind.is_namespaced() {
            namespace.into()
        } else {
            String::new()
        };
        Self {
            kind,
            namespace,
            name: name.into(),
        }
    }

    pub fn gateway_class(name: impl Into<String>) -> Self {
        Self::new(ObjectKind::GatewayClass, "", name)
    }

    pub fn gateway(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ObjectKind::Gateway, namespace, name)
    }

    pub fn http_route(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ObjectKind::HTTPRoute, namespace, name)
    }

    pub fn secret(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ObjectKind::Secret, namespace, name)
    }

    /// Namespace + name view of this key
    pub fn object_ref(&self) -> NamespacedName {
        NamespacedName::new(self.namespace.clone(), self.name.clone())
    }

    /// Stable hash of the string form (same value across processes)
    pub fn stable_hash(&self) -> u64 {
        fnv1a_hash(self.to_string().as_bytes())
    }

    /// Worker slot for this key in a pool of `slots` workers
    pub fn shard(&self, slots: usize) -> usize {
        if slots <= 1 {
            return 0;
        }
        (self.stable_hash() % slots as u64) as usize
    }
}

impl fmt::Display for WorkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind.is_namespaced() {
            write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
        } else {
            write!(f, "{}/{}", self.kind, self.name)
        }
    }
}

impl FromStr for WorkKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '/');
        let kind: ObjectKind = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ParseKeyError(s.to_string()))?
            .parse()?;

        let rest: Vec<&str> = parts.collect();
        let (namespace, name) = match (kind.is_namespaced(), rest.as_slice()) {
            (true, [namespace, name]) if !namespace.is_empty() && !name.is_empty() => {
                (*namespace, *name)
            }
            (false, [name]) if !name.is_empty() => ("", *name),
            _ => return Err(ParseKeyError(s.to_string())),
        };

        Ok(WorkKey::new(kind, namespace, name))
    }
}

impl PartialOrd for WorkKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl WorkKey {
    /// Bytes of the string form, without allocating it
    fn key_bytes(&self) -> impl Iterator<Item = u8> + '_ {
        let (namespace, separator): (&[u8], &[u8]) = if self.kind.is_namespaced() {
            (self.namespace.as_bytes(), b"/")
        } else {
            (b"", b"")
        };
        self.kind
            .as_str()
            .bytes()
            .chain(b"/".iter().copied())
            .chain(namespace.iter().copied())
            .chain(separator.iter().copied())
            .chain(self.name.bytes())
    }
}

impl Ord for WorkKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key_bytes().cmp(other.key_bytes())
    }
}

// =============================================================================
// ModelName
// =============================================================================

/// Parent VS name for a Gateway: `{cluster}--{namespace}.{name}`
///
/// Namespaces are DNS-1123 labels and never contain '.', so the pair
/// (namespace, name) is recoverable from the result.
pub fn gateway_parent_name(cluster: &str, namespace: &str, name: &str) -> String {
    format!("{}{}{}.{}", cluster, PARENT_NAME_SEPARATOR, namespace, name)
}

/// Storage key of a Gateway's derived graph: `{tenant}/{parent_name}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModelName(String);

impl ModelName {
    pub fn new(tenant: &str, parent_name: &str) -> Self {
        Self(format!("{}/{}", tenant, parent_name))
    }

    /// Model name of the Gateway `namespace/name`
    pub fn for_gateway(tenant: &str, cluster: &str, namespace: &str, name: &str) -> Self {
        Self::new(tenant, &gateway_parent_name(cluster, namespace, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn stable_hash(&self) -> u64 {
        fnv1a_hash(self.0.as_bytes())
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Configuration graph
// =============================================================================

/// Listener protocols understood by the load balancer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Protocol {
    Http,
    Https,
    Tls,
    Tcp,
    Udp,
}

impl Protocol {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "HTTP",
            Protocol::Https => "HTTPS",
            Protocol::Tls => "TLS",
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }

    /// Parse a Gateway API protocol name (case-insensitive)
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "HTTP" => Some(Protocol::Http),
            "HTTPS" => Some(Protocol::Https),
            "TLS" => Some(Protocol::Tls),
            "TCP" => Some(Protocol::Tcp),
            "UDP" => Some(Protocol::Udp),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One port/protocol binding of a virtual service
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortProto {
    pub port: u16,
    pub protocol: Protocol,
    pub enable_ssl: bool,
}

/// TLS certificate bound to a listener
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SslKeyCertRef {
    /// Listener name the certificate terminates
    pub listener: String,
    pub secret: NamespacedName,
}

/// Virtual IP object associated with a Gateway
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VipRef {
    pub name: String,
    /// Static address requested in `spec.addresses`, if any
    pub address: Option<String>,
    pub fqdns: Vec<String>,
}

/// HTTPRoute attached to one listener
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RouteRef {
    pub route: NamespacedName,
    pub listener: String,
    pub port: u16,
    pub hostnames: Vec<String>,
}

/// Virtual service node
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VsNode {
    pub name: String,
    pub port_proto: Vec<PortProto>,
    pub ssl_key_cert_refs: Vec<SslKeyCertRef>,
    pub vs_vip_refs: Vec<VipRef>,
    pub route_bindings: Vec<RouteRef>,
}

impl VsNode {
    /// True if any route binding references `route`
    pub fn binds_route(&self, route: &NamespacedName) -> bool {
        self.route_bindings.iter().any(|b| &b.route == route)
    }

    /// Number of routes attached to `listener`
    pub fn attached_routes(&self, listener: &str) -> usize {
        self.route_bindings
            .iter()
            .filter(|b| b.listener == listener)
            .count()
    }
}

/// Derived configuration graph of one Gateway
///
/// Built completely before it is published; the store only ever hands out
/// shared immutable references.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConfigGraph {
    pub model_name: ModelName,
    /// Gateway that owns this model
    pub owner: NamespacedName,
    pub vs_nodes: Vec<VsNode>,
}

impl ConfigGraph {
    pub fn new(model_name: ModelName, owner: NamespacedName) -> Self {
        Self {
            model_name,
            owner,
            vs_nodes: Vec::new(),
        }
    }

    pub fn vs_nodes(&self) -> &[VsNode] {
        &self.vs_nodes
    }

    pub fn binds_route(&self, route: &NamespacedName) -> bool {
        self.vs_nodes.iter().any(|vs| vs.binds_route(route))
    }
}

/// FNV-1a hash used for stable key sharding
pub const fn fnv1a_hash(bytes: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut hash = FNV_OFFSET;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}
