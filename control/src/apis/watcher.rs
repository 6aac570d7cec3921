//! Kubernetes watch adapters
//!
//! One watcher per kind feeds snapshots into the controller's ingestion
//! queue. On every (re)list the keys delivered between `Init` and `InitDone`
//! are recorded, and cached objects of that kind missing from the relist are
//! deleted.

use crate::apis::gateway::secret::tls_secret;
use crate::cache::{Gateway, GatewayClass, HttpRoute, ObjectSnapshot};
use crate::controller::GatewayController;
use common::{ObjectKind, WorkKey};
use futures::StreamExt;
use gateway_api::apis::standard::gatewayclasses::GatewayClass as KubeGatewayClass;
use gateway_api::apis::standard::gateways::Gateway as KubeGateway;
use gateway_api::apis::standard::httproutes::HTTPRoute as KubeHTTPRoute;
use k8s_openapi::api::core::v1::Secret as KubeSecret;
use kube::runtime::watcher;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fmt::Debug;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Work key of a watched object
pub fn object_key<K: ResourceExt>(kind: ObjectKind, object: &K) -> WorkKey {
    let namespace = object.namespace().unwrap_or_else(|| "default".to_string());
    WorkKey::new(kind, namespace, object.name_any())
}

/// Cached keys that a completed relist did not deliver
pub fn stale_keys(cached: Vec<WorkKey>, seen: &HashSet<WorkKey>) -> Vec<WorkKey> {
    cached.into_iter().filter(|key| !seen.contains(key)).collect()
}

/// Watch one kind until the stream ends
///
/// `convert` returns `None` for objects that carry nothing of interest; those
/// are handled as deletions.
pub async fn watch<K, F>(api: Api<K>, kind: ObjectKind, controller: GatewayController, convert: F)
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    F: Fn(&K) -> Option<ObjectSnapshot>,
{
    let stream = watcher(api, WatcherConfig::default()).default_backoff();
    futures::pin_mut!(stream);

    info!(kind = %kind, "Starting watcher");
    let mut relist: Option<HashSet<WorkKey>> = None;

    while let Some(event) = stream.next().await {
        match event {
            Ok(watcher::Event::Apply(object)) | Ok(watcher::Event::InitApply(object)) => {
                let key = object_key(kind, &object);
                if let Some(seen) = relist.as_mut() {
                    seen.insert(key.clone());
                }
                match convert(&object) {
                    Some(snapshot) => controller.apply(snapshot),
                    None => controller.delete(key),
                };
            }
            Ok(watcher::Event::Delete(object)) => {
                controller.delete(object_key(kind, &object));
            }
            Ok(watcher::Event::Init) => {
                debug!(kind = %kind, "Relist started");
                relist = Some(HashSet::new());
            }
            Ok(watcher::Event::InitDone) => {
                let seen = relist.take().unwrap_or_default();
                let stale = stale_keys(controller.cache().keys(kind), &seen);
                for key in &stale {
                    controller.delete(key.clone());
                }
                info!(kind = %kind, objects = seen.len(), pruned = stale.len(), "Relist complete");
            }
            Err(e) => {
                warn!(kind = %kind, error = %e, "Watcher error");
            }
        }
    }
}

/// Spawn the GatewayClass, Gateway, HTTPRoute and Secret watchers
pub fn spawn_watchers(client: Client, controller: &GatewayController) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(watch(
            Api::<KubeGatewayClass>::all(client.clone()),
            ObjectKind::GatewayClass,
            controller.clone(),
            |class| Some(GatewayClass::from(class).into()),
        )),
        tokio::spawn(watch(
            Api::<KubeGateway>::all(client.clone()),
            ObjectKind::Gateway,
            controller.clone(),
            |gateway| Some(Gateway::from(gateway).into()),
        )),
        tokio::spawn(watch(
            Api::<KubeHTTPRoute>::all(client.clone()),
            ObjectKind::HTTPRoute,
            controller.clone(),
            |route| Some(HttpRoute::from(route).into()),
        )),
        tokio::spawn(watch(
            Api::<KubeSecret>::all(client),
            ObjectKind::Secret,
            controller.clone(),
            |secret| tls_secret(secret).map(Into::into),
        )),
    ]
}
