//! Status Writer
//!
//! Keeps the last report per object and hands changed reports to the status
//! worker pool, which delivers them through a [`StatusSink`].
//!
//! - Identical reports are not re-sent; they only refresh `last_observed`
//! - A Pending report never replaces an Accepted one
//! - A failed delivery is queued again from the cached record
//! - `lastTransitionTime` only moves when a condition's status changes

use crate::apis::gateway::admission::Reason;
use crate::error::ControllerError;
use crate::lock::{safe_read, safe_write};
use crate::queue::{QueueItem, ShardedQueue};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use common::{NamespacedName, ObjectKind, WorkKey};
use gateway_api::apis::standard::gatewayclasses::GatewayClass as KubeGatewayClass;
use gateway_api::apis::standard::gateways::Gateway as KubeGateway;
use gateway_api::apis::standard::httproutes::HTTPRoute as KubeHTTPRoute;
use kube::api::{Api, Patch, PatchParams};
use kube::core::ErrorResponse;
use kube::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

// =============================================================================
// Conditions and reports
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionType {
    Accepted,
    Programmed,
    ResolvedRefs,
    Conflicted,
}

impl ConditionType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConditionType::Accepted => "Accepted",
            ConditionType::Programmed => "Programmed",
            ConditionType::ResolvedRefs => "ResolvedRefs",
            ConditionType::Conflicted => "Conflicted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }

    pub fn from_bool(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub type_: ConditionType,
    pub status: ConditionStatus,
    pub reason: Reason,
    pub message: String,
}

impl Condition {
    pub fn new(
        type_: ConditionType,
        status: ConditionStatus,
        reason: Reason,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_,
            status,
            reason,
            message: message.into(),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    fn to_json(&self, last_transition: &str) -> Value {
        json!({
            "type": self.type_.as_str(),
            "status": self.status.as_str(),
            "reason": self.reason.as_str(),
            "message": self.message,
            "lastTransitionTime": last_transition,
        })
    }
}

/// Where a condition sits within a report
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConditionScope {
    Object,
    Listener(String),
    Parent(NamespacedName, Option<String>),
}

/// Last transition time of every condition of a report
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transitions {
    stamps: HashMap<(ConditionScope, ConditionType), (ConditionStatus, DateTime<Utc>)>,
}

impl Transitions {
    /// Stamp the conditions of `report`, keeping the previous time of those
    /// whose status did not change
    pub fn advance(&self, report: &StatusReport, now: DateTime<Utc>) -> Self {
        let stamps = report
            .scoped_conditions()
            .map(|(scope, condition)| {
                let slot = (scope, condition.type_);
                let at = match self.stamps.get(&slot) {
                    Some((status, at)) if *status == condition.status => *at,
                    _ => now,
                };
                (slot, (condition.status, at))
            })
            .collect();
        Self { stamps }
    }

    pub fn get(&self, scope: &ConditionScope, type_: ConditionType) -> Option<DateTime<Utc>> {
        self.stamps
            .get(&(scope.clone(), type_))
            .map(|(_, at)| *at)
    }

    fn render(&self, scope: &ConditionScope, condition: &Condition, now: DateTime<Utc>) -> Value {
        let at = self.get(scope, condition.type_).unwrap_or(now);
        condition.to_json(&at.to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

fn find(conditions: &[Condition], type_: ConditionType) -> Option<&Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerStatus {
    pub name: String,
    pub attached_routes: usize,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteParentStatus {
    pub gateway: NamespacedName,
    pub section_name: Option<String>,
    pub conditions: Vec<Condition>,
}

impl RouteParentStatus {
    pub fn scope(&self) -> ConditionScope {
        ConditionScope::Parent(self.gateway.clone(), self.section_name.clone())
    }
}

/// Desired status of one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub key: WorkKey,
    pub conditions: Vec<Condition>,
    pub listeners: Vec<ListenerStatus>,
    pub parents: Vec<RouteParentStatus>,
}

impl StatusReport {
    pub fn new(key: WorkKey) -> Self {
        Self {
            key,
            conditions: Vec::new(),
            listeners: Vec::new(),
            parents: Vec::new(),
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn condition(&self, type_: ConditionType) -> Option<&Condition> {
        find(&self.conditions, type_)
    }

    pub fn listener(&self, name: &str) -> Option<&ListenerStatus> {
        self.listeners.iter().find(|l| l.name == name)
    }

    fn accepted_conditions(&self) -> impl Iterator<Item = &Condition> {
        find(&self.conditions, ConditionType::Accepted)
            .into_iter()
            .chain(
                self.parents
                    .iter()
                    .filter_map(|p| find(&p.conditions, ConditionType::Accepted)),
            )
    }

    /// Accepted by this controller (for routes: by at least one parent)
    pub fn is_accepted(&self) -> bool {
        self.accepted_conditions().any(Condition::is_true)
    }

    /// Every Accepted condition is waiting on a missing object
    pub fn is_pending(&self) -> bool {
        let mut accepted = self.accepted_conditions().peekable();
        accepted.peek().is_some() && accepted.all(|c| c.reason == Reason::Pending)
    }

    /// Every condition with its position in the report
    pub fn scoped_conditions(&self) -> impl Iterator<Item = (ConditionScope, &Condition)> {
        let object = self.conditions.iter().map(|c| (ConditionScope::Object, c));
        let listeners = self.listeners.iter().flat_map(|l| {
            l.conditions
                .iter()
                .map(move |c| (ConditionScope::Listener(l.name.clone()), c))
        });
        let parents = self
            .parents
            .iter()
            .flat_map(|p| p.conditions.iter().map(move |c| (p.scope(), c)));
        object.chain(listeners).chain(parents)
    }

    /// Merge patch body for the status subresource
    ///
    /// Conditions without a recorded transition are stamped with `now`.
    pub fn to_patch(
        &self,
        controller_name: &str,
        transitions: &Transitions,
        now: DateTime<Utc>,
    ) -> Value {
        let conditions: Vec<Value> = self
            .conditions
            .iter()
            .map(|c| transitions.render(&ConditionScope::Object, c, now))
            .collect();
        match self.key.kind {
            ObjectKind::HTTPRoute => {
                let parents: Vec<Value> = self
                    .parents
                    .iter()
                    .map(|p| {
                        let mut parent_ref = json!({
                            "group": "gateway.networking.k8s.io",
                            "kind": "Gateway",
                            "namespace": p.gateway.namespace,
                            "name": p.gateway.name,
                        });
                        if let Some(section) = &p.section_name {
                            parent_ref["sectionName"] = Value::String(section.clone());
                        }
                        let scope = p.scope();
                        json!({
                            "parentRef": parent_ref,
                            "controllerName": controller_name,
                            "conditions": p.conditions.iter().map(|c| transitions.render(&scope, c, now)).collect::<Vec<_>>(),
                        })
                    })
                    .collect();
                json!({ "status": { "parents": parents } })
            }
            ObjectKind::Gateway => {
                let listeners: Vec<Value> = self
                    .listeners
                    .iter()
                    .map(|l| {
                        let scope = ConditionScope::Listener(l.name.clone());
                        json!({
                            "name": l.name,
                            "attachedRoutes": l.attached_routes,
                            "supportedKinds": [{
                                "group": "gateway.networking.k8s.io",
                                "kind": "HTTPRoute"
                            }],
                            "conditions": l.conditions.iter().map(|c| transitions.render(&scope, c, now)).collect::<Vec<_>>(),
                        })
                    })
                    .collect();
                json!({ "status": { "conditions": conditions, "listeners": listeners } })
            }
            ObjectKind::GatewayClass | ObjectKind::Secret => {
                json!({ "status": { "conditions": conditions } })
            }
        }
    }
}

/// Queued delivery of one report
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub report: StatusReport,
    pub transitions: Transitions,
}

impl StatusUpdate {
    pub fn to_patch(&self, controller_name: &str, now: DateTime<Utc>) -> Value {
        self.report.to_patch(controller_name, &self.transitions, now)
    }
}

impl QueueItem for StatusUpdate {
    fn key(&self) -> &WorkKey {
        &self.report.key
    }

    // Only the newest report matters
    fn merge(&mut self, newer: Self) {
        self.report = newer.report;
        self.transitions = newer.transitions;
    }
}

// =============================================================================
// StatusWriter
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// New or different report, queued for delivery
    Changed,
    /// Same report as last time after a failed delivery, queued again
    Resent,
    /// Same report as last time
    Unchanged,
    /// Pending report kept out to preserve an Accepted status
    Suppressed,
}

#[derive(Debug, Clone)]
struct StatusRecord {
    report: StatusReport,
    transitions: Transitions,
    last_observed: DateTime<Utc>,
    changes: u64,
    stale: bool,
}

/// Idempotent status reporter
#[derive(Clone)]
pub struct StatusWriter {
    records: Arc<RwLock<HashMap<WorkKey, StatusRecord>>>,
    queue: ShardedQueue<StatusUpdate>,
}

impl StatusWriter {
    pub fn new(queue: ShardedQueue<StatusUpdate>) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            queue,
        }
    }

    pub fn report(&self, report: StatusReport) -> ReportOutcome {
        let now = Utc::now();
        let (outcome, transitions) = {
            let mut records = safe_write(&self.records);
            match records.get_mut(&report.key) {
                Some(record) if record.report == report => {
                    record.last_observed = now;
                    if !record.stale {
                        return ReportOutcome::Unchanged;
                    }
                    record.stale = false;
                    (ReportOutcome::Resent, record.transitions.clone())
                }
                Some(record) if report.is_pending() && record.report.is_accepted() => {
                    record.last_observed = now;
                    debug!(key = %report.key, "Keeping Accepted status over Pending report");
                    return ReportOutcome::Suppressed;
                }
                Some(record) => {
                    record.transitions = record.transitions.advance(&report, now);
                    record.report = report.clone();
                    record.last_observed = now;
                    record.changes += 1;
                    record.stale = false;
                    (ReportOutcome::Changed, record.transitions.clone())
                }
                None => {
                    let transitions = Transitions::default().advance(&report, now);
                    records.insert(
                        report.key.clone(),
                        StatusRecord {
                            report: report.clone(),
                            transitions: transitions.clone(),
                            last_observed: now,
                            changes: 1,
                            stale: false,
                        },
                    );
                    (ReportOutcome::Changed, transitions)
                }
            }
        };

        if !self.queue.add(StatusUpdate {
            report,
            transitions,
        }) {
            debug!("Status queue closed, report not delivered");
        }
        outcome
    }

    /// Queue the recorded report for `key` again; `false` once it is forgotten
    pub fn requeue(&self, key: &WorkKey) -> bool {
        let update = {
            let mut records = safe_write(&self.records);
            let Some(record) = records.get_mut(key) else {
                return false;
            };
            record.stale = false;
            StatusUpdate {
                report: record.report.clone(),
                transitions: record.transitions.clone(),
            }
        };
        self.queue.add(update)
    }

    /// Force the next report for `key` to be delivered
    pub fn invalidate(&self, key: &WorkKey) {
        if let Some(record) = safe_write(&self.records).get_mut(key) {
            record.stale = true;
        }
    }

    /// Drop everything known about a deleted object
    pub fn forget(&self, key: &WorkKey) {
        safe_write(&self.records).remove(key);
    }

    pub fn get(&self, key: &WorkKey) -> Option<StatusReport> {
        safe_read(&self.records).get(key).map(|r| r.report.clone())
    }

    pub fn transitions(&self, key: &WorkKey) -> Option<Transitions> {
        safe_read(&self.records).get(key).map(|r| r.transitions.clone())
    }

    pub fn last_observed(&self, key: &WorkKey) -> Option<DateTime<Utc>> {
        safe_read(&self.records).get(key).map(|r| r.last_observed)
    }

    /// Number of reports for `key` that differed from the previous one
    pub fn changes(&self, key: &WorkKey) -> u64 {
        safe_read(&self.records)
            .get(key)
            .map(|r| r.changes)
            .unwrap_or(0)
    }

    pub fn queue(&self) -> &ShardedQueue<StatusUpdate> {
        &self.queue
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// Destination of status reports
#[async_trait]
pub trait StatusSink: Send + Sync + 'static {
    async fn deliver(&self, update: &StatusUpdate) -> Result<(), ControllerError>;
}

/// Prepend the entries of other controllers in the current `status.parents`
/// of an HTTPRoute to the parents of `patch`
pub fn merge_route_parents(current: &Value, patch: &mut Value, controller_name: &str) {
    let foreign = current
        .get("parents")
        .and_then(Value::as_array)
        .map(|parents| {
            parents
                .iter()
                .filter(|p| p.get("controllerName").and_then(Value::as_str) != Some(controller_name))
                .cloned()
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    if foreign.is_empty() {
        return;
    }
    if let Some(Value::Array(ours)) = patch.pointer_mut("/status/parents") {
        let mut merged = foreign;
        merged.append(ours);
        *ours = merged;
    }
}

/// Patches the status subresource on the API server
pub struct KubeStatusSink {
    client: Client,
    controller_name: String,
}

impl KubeStatusSink {
    pub fn new(client: Client, controller_name: impl Into<String>) -> Self {
        Self {
            client,
            controller_name: controller_name.into(),
        }
    }
}

#[async_trait]
impl StatusSink for KubeStatusSink {
    async fn deliver(&self, update: &StatusUpdate) -> Result<(), ControllerError> {
        let mut status = update.to_patch(&self.controller_name, Utc::now());
        let params = PatchParams::apply("lbgraph-controller");
        let report = &update.report;
        let key = &report.key;

        match key.kind {
            ObjectKind::GatewayClass => {
                let api: Api<KubeGatewayClass> = Api::all(self.client.clone());
                api.patch_status(&key.name, &params, &Patch::Merge(&status))
                    .await?;
            }
            ObjectKind::Gateway => {
                let api: Api<KubeGateway> = Api::namespaced(self.client.clone(), &key.namespace);
                api.patch_status(&key.name, &params, &Patch::Merge(&status))
                    .await?;
            }
            ObjectKind::HTTPRoute => {
                let api: Api<KubeHTTPRoute> =
                    Api::namespaced(self.client.clone(), &key.namespace);
                // Parents written by other controllers share the array
                let current = api.get_status(&key.name).await?;
                let existing = serde_json::to_value(&current.status).unwrap_or(Value::Null);
                merge_route_parents(&existing, &mut status, &self.controller_name);
                // A concurrent writer turns this into a conflict, which is retried
                if let Some(version) = current.metadata.resource_version {
                    status["metadata"] = json!({ "resourceVersion": version });
                }
                api.patch_status(&key.name, &params, &Patch::Merge(&status))
                    .await?;
            }
            // Secrets carry no status
            ObjectKind::Secret => return Ok(()),
        }

        info!(
            key = %key,
            accepted = report.is_accepted(),
            "Updated status"
        );
        Ok(())
    }
}

/// Keeps delivered reports in memory (dry-run and tests)
#[derive(Default)]
pub struct MemoryStatusSink {
    delivered: RwLock<HashMap<WorkKey, StatusUpdate>>,
    deliveries: AtomicU64,
    /// Deliveries left to fail
    failures: AtomicU64,
}

impl MemoryStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last report delivered for `key`
    pub fn get(&self, key: &WorkKey) -> Option<StatusReport> {
        safe_read(&self.delivered)
            .get(key)
            .map(|update| update.report.clone())
    }

    /// Transition times sent with the last delivery for `key`
    pub fn transitions(&self, key: &WorkKey) -> Option<Transitions> {
        safe_read(&self.delivered)
            .get(key)
            .map(|update| update.transitions.clone())
    }

    pub fn deliveries(&self) -> u64 {
        self.deliveries.load(Ordering::SeqCst)
    }

    /// Make the next `count` deliveries fail like an unavailable API server
    pub fn fail_next(&self, count: u64) {
        self.failures.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl StatusSink for MemoryStatusSink {
    async fn deliver(&self, update: &StatusUpdate) -> Result<(), ControllerError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ControllerError::Kubernetes(kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: format!("injected status delivery failure for {}", update.report.key),
                reason: "ServiceUnavailable".to_string(),
                code: 503,
            })));
        }

        safe_write(&self.delivered).insert(update.report.key.clone(), update.clone());
        self.deliveries.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn writer() -> StatusWriter {
        StatusWriter::new(ShardedQueue::new("status", 1))
    }

    fn accepted(key: WorkKey) -> StatusReport {
        StatusReport::new(key).with_condition(Condition::new(
            ConditionType::Accepted,
            ConditionStatus::True,
            Reason::Accepted,
            "Gateway is accepted",
        ))
    }

    fn pending(key: WorkKey) -> StatusReport {
        StatusReport::new(key).with_condition(Condition::new(
            ConditionType::Accepted,
            ConditionStatus::Unknown,
            Reason::Pending,
            "GatewayClass not found",
        ))
    }

    #[test]
    fn test_identical_report_is_not_resent() {
        let writer = writer();
        let key = WorkKey::gateway("default", "gw");

        assert_eq!(writer.report(accepted(key.clone())), ReportOutcome::Changed);
        let first_seen = writer.last_observed(&key).expect("observed");

        assert_eq!(writer.report(accepted(key.clone())), ReportOutcome::Unchanged);
        assert_eq!(writer.changes(&key), 1);
        assert_eq!(writer.queue().len(), 1, "Only the first report is queued");
        assert!(writer.last_observed(&key).expect("observed") >= first_seen);
    }

    #[test]
    fn test_pending_never_regresses_accepted() {
        let writer = writer();
        let key = WorkKey::gateway("default", "gw");

        writer.report(accepted(key.clone()));
        assert_eq!(writer.report(pending(key.clone())), ReportOutcome::Suppressed);
        assert!(writer.get(&key).expect("report").is_accepted());
    }

    #[test]
    fn test_rejection_replaces_accepted() {
        let writer = writer();
        let key = WorkKey::gateway("default", "gw");
        writer.report(accepted(key.clone()));

        let rejected = StatusReport::new(key.clone()).with_condition(Condition::new(
            ConditionType::Accepted,
            ConditionStatus::False,
            Reason::ListenersNotValid,
            "no valid listeners",
        ));
        assert_eq!(writer.report(rejected), ReportOutcome::Changed);
        assert_eq!(writer.changes(&key), 2);
        assert!(!writer.get(&key).expect("report").is_accepted());
    }

    #[test]
    fn test_invalidate_forces_resend() {
        let writer = writer();
        let key = WorkKey::gateway_class("gateway-class-01");
        writer.report(accepted(key.clone()));

        writer.invalidate(&key);
        assert_eq!(writer.report(accepted(key.clone())), ReportOutcome::Resent);
        assert_eq!(writer.report(accepted(key.clone())), ReportOutcome::Unchanged);
        assert_eq!(writer.changes(&key), 1);
    }

    #[test]
    fn test_forget_drops_record() {
        let writer = writer();
        let key = WorkKey::http_route("default", "route");
        writer.report(accepted(key.clone()));
        writer.forget(&key);
        assert!(writer.get(&key).is_none());
        assert_eq!(writer.changes(&key), 0);
    }

    #[test]
    fn test_route_pending_detection_uses_parents() {
        let key = WorkKey::http_route("default", "route");
        let mut report = StatusReport::new(key);
        report.parents.push(RouteParentStatus {
            gateway: NamespacedName::new("default", "gw"),
            section_name: None,
            conditions: vec![Condition::new(
                ConditionType::Accepted,
                ConditionStatus::Unknown,
                Reason::Pending,
                "Gateway not found",
            )],
        });
        assert!(report.is_pending());
        assert!(!report.is_accepted());

        assert!(
            !StatusReport::new(WorkKey::http_route("default", "empty")).is_pending(),
            "A report without Accepted conditions is not pending"
        );
    }

    fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, second).unwrap()
    }

    #[test]
    fn test_gateway_patch_shape() {
        let mut report = accepted(WorkKey::gateway("default", "gw"));
        report.listeners.push(ListenerStatus {
            name: "https".to_string(),
            attached_routes: 2,
            conditions: vec![Condition::new(
                ConditionType::ResolvedRefs,
                ConditionStatus::False,
                Reason::InvalidCertificateRef,
                "Secret default/tls not found",
            )],
        });

        let patch = report.to_patch("lbgraph.io/gateway-controller", &Transitions::default(), at(0));
        assert_eq!(patch["status"]["conditions"][0]["type"], "Accepted");
        assert_eq!(patch["status"]["conditions"][0]["status"], "True");
        assert_eq!(patch["status"]["listeners"][0]["attachedRoutes"], 2);
        assert_eq!(
            patch["status"]["listeners"][0]["conditions"][0]["reason"],
            "InvalidCertificateRef"
        );
        assert_eq!(
            patch["status"]["conditions"][0]["lastTransitionTime"],
            "2026-01-01T00:00:00Z"
        );
    }

    #[test]
    fn test_route_patch_lists_parents() {
        let mut report = StatusReport::new(WorkKey::http_route("default", "route"));
        report.parents.push(RouteParentStatus {
            gateway: NamespacedName::new("infra", "gw"),
            section_name: Some("https".to_string()),
            conditions: vec![Condition::new(
                ConditionType::Accepted,
                ConditionStatus::True,
                Reason::Accepted,
                "Route is accepted",
            )],
        });

        let patch = report.to_patch("lbgraph.io/gateway-controller", &Transitions::default(), at(0));
        let parent = &patch["status"]["parents"][0];
        assert_eq!(parent["parentRef"]["namespace"], "infra");
        assert_eq!(parent["parentRef"]["sectionName"], "https");
        assert_eq!(parent["controllerName"], "lbgraph.io/gateway-controller");
    }

    #[test]
    fn test_transition_time_moves_only_with_status() {
        let key = WorkKey::gateway("default", "gw");
        let first = Transitions::default().advance(&accepted(key.clone()), at(1));

        let mut reworded = accepted(key.clone());
        reworded.conditions[0].message = "Gateway is still accepted".to_string();
        let second = first.advance(&reworded, at(2));
        assert_eq!(
            second.get(&ConditionScope::Object, ConditionType::Accepted),
            Some(at(1))
        );

        let rejected = StatusReport::new(key).with_condition(Condition::new(
            ConditionType::Accepted,
            ConditionStatus::False,
            Reason::Invalid,
            "GatewayClass gc not found",
        ));
        let third = second.advance(&rejected, at(3));
        assert_eq!(
            third.get(&ConditionScope::Object, ConditionType::Accepted),
            Some(at(3))
        );

        let patch = reworded.to_patch("lbgraph.io/gateway-controller", &second, at(9));
        assert_eq!(
            patch["status"]["conditions"][0]["lastTransitionTime"],
            "2026-01-01T00:00:01Z"
        );
    }

    #[test]
    fn test_writer_keeps_transition_time_across_reports() {
        let writer = writer();
        let key = WorkKey::gateway("default", "gw");
        writer.report(accepted(key.clone()));
        let stamped = writer
            .transitions(&key)
            .and_then(|t| t.get(&ConditionScope::Object, ConditionType::Accepted))
            .expect("stamped");

        let mut reworded = accepted(key.clone());
        reworded.conditions[0].message = "Gateway is still accepted".to_string();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(writer.report(reworded), ReportOutcome::Changed);
        assert_eq!(
            writer
                .transitions(&key)
                .and_then(|t| t.get(&ConditionScope::Object, ConditionType::Accepted)),
            Some(stamped)
        );
    }

    #[test]
    fn test_route_parents_of_other_controllers_survive() {
        let current = json!({
            "parents": [
                { "parentRef": { "name": "theirs" }, "controllerName": "example.com/other" },
                { "parentRef": { "name": "stale" }, "controllerName": "lbgraph.io/gateway-controller" },
            ]
        });
        let mut patch = json!({
            "status": { "parents": [
                { "parentRef": { "name": "gw" }, "controllerName": "lbgraph.io/gateway-controller" },
            ]}
        });

        merge_route_parents(&current, &mut patch, "lbgraph.io/gateway-controller");
        let names: Vec<_> = patch["status"]["parents"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["parentRef"]["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["theirs", "gw"]);

        let mut untouched = patch.clone();
        merge_route_parents(&Value::Null, &mut untouched, "lbgraph.io/gateway-controller");
        assert_eq!(untouched, patch);
    }

    #[test]
    fn test_requeue_sends_recorded_report() {
        let writer = writer();
        let key = WorkKey::gateway_class("gateway-class-01");
        writer.report(accepted(key.clone()));
        assert_eq!(writer.queue().len(), 1);

        assert!(writer.requeue(&key), "Recorded report is queued again");
        assert_eq!(writer.queue().len(), 1, "Pending delivery is merged");

        writer.forget(&key);
        assert!(!writer.requeue(&key));
    }

    #[tokio::test]
    async fn test_memory_sink_injected_failures() {
        let sink = MemoryStatusSink::new();
        let report = accepted(WorkKey::gateway("default", "gw"));
        let update = StatusUpdate {
            transitions: Transitions::default().advance(&report, at(0)),
            report: report.clone(),
        };

        sink.fail_next(1);
        let err = sink.deliver(&update).await.unwrap_err();
        assert_eq!(err.retry_class(), crate::error::RetryClass::Backoff);
        assert!(sink.deliver(&update).await.is_ok());
        assert_eq!(sink.deliveries(), 1);
        assert_eq!(sink.get(&report.key), Some(report));
    }
}
