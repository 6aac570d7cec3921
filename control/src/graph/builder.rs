//! Graph Builder
//!
//! Derives the configuration graph of one accepted Gateway. Builds are pure
//! functions of the Gateway, its valid listeners, the routes naming it and
//! the Secrets in the cache, so two builds over the same inputs are equal.

use crate::apis::gateway::gateway::ValidListener;
use crate::apis::gateway::http_route::bindings_for_gateway;
use crate::cache::{Gateway, HttpRoute, ObjectCache};
use crate::config::ControllerConfig;
use crate::queue::Refresh;
use common::{
    gateway_parent_name, ConfigGraph, ModelName, NamespacedName, PortProto, RouteRef,
    SslKeyCertRef, VipRef, VsNode, VSVIP_SUFFIX,
};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Result of a build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Build {
    pub graph: ConfigGraph,
    /// Secrets of TLS listeners left without a usable certificate
    pub unresolved: Vec<NamespacedName>,
}

#[derive(Debug, Clone)]
pub struct GraphBuilder {
    tenant: String,
    cluster: String,
    allow_wildcard: bool,
}

impl GraphBuilder {
    pub fn new(tenant: impl Into<String>, cluster: impl Into<String>, allow_wildcard: bool) -> Self {
        Self {
            tenant: tenant.into(),
            cluster: cluster.into(),
            allow_wildcard,
        }
    }

    pub fn from_config(config: &ControllerConfig) -> Self {
        Self::new(
            &config.tenant,
            &config.cluster_name,
            config.allow_wildcard_route_hostnames,
        )
    }

    pub fn parent_name(&self, gateway: &NamespacedName) -> String {
        gateway_parent_name(&self.cluster, &gateway.namespace, &gateway.name)
    }

    pub fn model_name(&self, gateway: &NamespacedName) -> ModelName {
        ModelName::new(&self.tenant, &self.parent_name(gateway))
    }

    /// Full build
    pub fn build(
        &self,
        gateway: &Gateway,
        listeners: &[ValidListener],
        routes: &[Arc<HttpRoute>],
        cache: &ObjectCache,
    ) -> Build {
        let owner = gateway.object_ref();
        let parent = self.parent_name(&owner);

        let vs = VsNode {
            port_proto: port_proto(listeners),
            ssl_key_cert_refs: ssl_key_cert_refs(listeners, cache),
            vs_vip_refs: vec![vip_ref(&parent, gateway, listeners)],
            route_bindings: self.route_bindings(&owner, listeners, routes),
            name: parent,
        };

        let mut graph = ConfigGraph::new(self.model_name(&owner), owner);
        graph.vs_nodes.push(vs);
        let unresolved = unresolved(&graph, listeners);
        Build { graph, unresolved }
    }

    /// Incremental build on top of `existing`
    ///
    /// Only the parts named by `refresh` are recomputed. Returns `None` when a
    /// full build is required: a full refresh, or a port/VIP layout that no
    /// longer matches the Gateway.
    pub fn patch(
        &self,
        existing: &ConfigGraph,
        refresh: Refresh,
        gateway: &Gateway,
        listeners: &[ValidListener],
        routes: &[Arc<HttpRoute>],
        cache: &ObjectCache,
    ) -> Option<Build> {
        if refresh.full {
            return None;
        }
        let owner = gateway.object_ref();
        if existing.owner != owner || existing.model_name != self.model_name(&owner) {
            return None;
        }
        let [current] = existing.vs_nodes() else {
            return None;
        };
        let parent = self.parent_name(&owner);
        if current.name != parent
            || current.port_proto != port_proto(listeners)
            || current.vs_vip_refs != [vip_ref(&parent, gateway, listeners)]
        {
            return None;
        }

        let mut graph = existing.clone();
        let vs = &mut graph.vs_nodes[0];
        if refresh.tls {
            vs.ssl_key_cert_refs = ssl_key_cert_refs(listeners, cache);
        }
        if refresh.routes {
            vs.route_bindings = self.route_bindings(&owner, listeners, routes);
        }
        let unresolved = unresolved(&graph, listeners);
        Some(Build { graph, unresolved })
    }

    fn route_bindings(
        &self,
        gateway: &NamespacedName,
        listeners: &[ValidListener],
        routes: &[Arc<HttpRoute>],
    ) -> Vec<RouteRef> {
        let mut bindings: Vec<RouteRef> = routes
            .iter()
            .flat_map(|r| bindings_for_gateway(r, gateway, listeners, self.allow_wildcard))
            .collect();
        bindings.sort_by(|a, b| (&a.route, &a.listener).cmp(&(&b.route, &b.listener)));
        bindings.dedup_by(|a, b| a.route == b.route && a.listener == b.listener);
        bindings
    }
}

/// One entry per distinct port, in listener order
///
/// SSL is enabled on a port if any listener on it terminates TLS.
fn port_proto(listeners: &[ValidListener]) -> Vec<PortProto> {
    let mut ports: Vec<PortProto> = Vec::new();
    for listener in listeners {
        match ports.iter_mut().find(|p| p.port == listener.port) {
            Some(existing) => existing.enable_ssl |= listener.enable_ssl(),
            None => ports.push(PortProto {
                port: listener.port,
                protocol: listener.protocol,
                enable_ssl: listener.enable_ssl(),
            }),
        }
    }
    ports
}

/// First resolved certificate of every TLS-terminating listener
fn ssl_key_cert_refs(listeners: &[ValidListener], cache: &ObjectCache) -> Vec<SslKeyCertRef> {
    listeners
        .iter()
        .filter(|l| l.enable_ssl())
        .filter_map(|l| {
            l.certificate_refs()
                .iter()
                .find(|r| cache.secret(r).is_some_and(|s| s.is_resolved()))
                .map(|secret| SslKeyCertRef {
                    listener: l.name.clone(),
                    secret: secret.clone(),
                })
        })
        .collect()
}

fn vip_ref(parent: &str, gateway: &Gateway, listeners: &[ValidListener]) -> VipRef {
    let fqdns: BTreeSet<String> = listeners.iter().filter_map(|l| l.hostname.clone()).collect();
    VipRef {
        name: format!("{}{}", parent, VSVIP_SUFFIX),
        address: gateway.addresses.first().cloned(),
        fqdns: fqdns.into_iter().collect(),
    }
}

/// Certificate refs of TLS listeners that ended up without a certificate
fn unresolved(graph: &ConfigGraph, listeners: &[ValidListener]) -> Vec<NamespacedName> {
    let bound: BTreeSet<&str> = graph
        .vs_nodes()
        .iter()
        .flat_map(|vs| vs.ssl_key_cert_refs.iter().map(|r| r.listener.as_str()))
        .collect();
    let missing: BTreeSet<NamespacedName> = listeners
        .iter()
        .filter(|l| l.enable_ssl() && !bound.contains(l.name.as_str()))
        .flat_map(|l| l.certificate_refs().iter().cloned())
        .collect();
    missing.into_iter().collect()
}
