//! Key normalization
//!
//! Turns a resource event into the graph work items it implies. The reverse
//! index is brought up to date with the cached object first, so dependents
//! are computed against the latest references.

use crate::apis::gateway::gateway_index::GatewayIndex;
use crate::cache::ObjectCache;
use crate::queue::{Refresh, WorkItem};
use common::{NamespacedName, ObjectKind, Op, ResourceEvent, WorkKey};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct KeyNormalizer {
    cache: Arc<ObjectCache>,
    index: GatewayIndex,
}

impl KeyNormalizer {
    pub fn new(cache: Arc<ObjectCache>, index: GatewayIndex) -> Self {
        Self { cache, index }
    }

    pub fn index(&self) -> &GatewayIndex {
        &self.index
    }

    /// Work items for `event`: the object's own key first, then dependents in
    /// key order
    pub fn normalize(&self, event: &ResourceEvent) -> Vec<WorkItem> {
        let key = &event.key;
        let items = match key.kind {
            ObjectKind::GatewayClass => self.class_items(key),
            ObjectKind::Gateway => self.gateway_items(key, event.op),
            ObjectKind::HTTPRoute => self.route_items(key, event.op),
            ObjectKind::Secret => self.secret_items(key),
        };
        debug!(key = %key, op = ?event.op, items = items.len(), "Normalized event");
        items
    }

    fn routes_of(&self, gateways: &[NamespacedName]) -> BTreeSet<NamespacedName> {
        gateways
            .iter()
            .flat_map(|gw| self.index.routes_for_gateway(gw))
            .collect()
    }

    fn class_items(&self, key: &WorkKey) -> Vec<WorkItem> {
        let gateways = self.index.gateways_for_class(&key.name);
        let routes = self.routes_of(&gateways);

        let mut items = vec![WorkItem::full(key.clone())];
        items.extend(
            gateways
                .iter()
                .map(|gw| WorkItem::full(WorkKey::gateway(&gw.namespace, &gw.name))),
        );
        items.extend(
            routes
                .iter()
                .map(|r| WorkItem::new(WorkKey::http_route(&r.namespace, &r.name), Refresh::ROUTES)),
        );
        items
    }

    fn gateway_items(&self, key: &WorkKey, op: Op) -> Vec<WorkItem> {
        let gateway = key.object_ref();
        match (op, self.cache.gateway(&gateway)) {
            (Op::Add | Op::Update, Some(gw)) => {
                self.index
                    .update_gateway(&gateway, &gw.class_name, gw.secret_refs());
            }
            _ => {
                self.index.remove_gateway(&gateway);
            }
        }

        let mut items = vec![WorkItem::full(key.clone())];
        items.extend(self.index.routes_for_gateway(&gateway).into_iter().map(|r| {
            WorkItem::new(WorkKey::http_route(&r.namespace, &r.name), Refresh::ROUTES)
        }));
        items
    }

    fn route_items(&self, key: &WorkKey, op: Op) -> Vec<WorkItem> {
        let route = key.object_ref();
        let (previous, current) = match (op, self.cache.http_route(&route)) {
            (Op::Add | Op::Update, Some(r)) => {
                let current = r.parent_gateways();
                (self.index.update_route(&route, current.clone()), current)
            }
            _ => (self.index.remove_route(&route), BTreeSet::new()),
        };

        let mut items = vec![WorkItem::new(key.clone(), Refresh::ROUTES)];
        items.extend(
            previous
                .union(&current)
                .map(|gw| WorkItem::new(WorkKey::gateway(&gw.namespace, &gw.name), Refresh::ROUTES)),
        );
        items
    }

    fn secret_items(&self, key: &WorkKey) -> Vec<WorkItem> {
        self.index
            .gateways_for_secret(&key.object_ref())
            .into_iter()
            .map(|gw| WorkItem::new(WorkKey::gateway(&gw.namespace, &gw.name), Refresh::TLS))
            .collect()
    }
}
