//! HTTPRoute admission and listener binding
//!
//! A route binds to a listener when one of its parentRefs names the listener's
//! Gateway (optionally narrowed by sectionName and port), the listener carries
//! HTTP traffic, and at least one route hostname intersects the listener
//! hostname.

use crate::apis::gateway::admission::{Reason, Verdict};
use crate::apis::gateway::gateway::ValidListener;
use crate::apis::status::{
    Condition, ConditionStatus, ConditionType, RouteParentStatus, StatusReport,
};
use crate::cache::{HttpRoute, ParentRef};
use common::{NamespacedName, RouteRef};
use gateway_api::apis::standard::httproutes::HTTPRoute as KubeHTTPRoute;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};

impl From<&KubeHTTPRoute> for HttpRoute {
    fn from(route: &KubeHTTPRoute) -> Self {
        let parent_refs = route
            .spec
            .parent_refs
            .iter()
            .flatten()
            .filter(|p| p.kind.as_deref().map_or(true, |k| k == "Gateway"))
            .map(|p| ParentRef {
                gateway_name: p.name.clone(),
                namespace: p.namespace.clone(),
                port: p.port,
                section_name: p.section_name.clone(),
            })
            .collect();

        Self {
            namespace: route.namespace().unwrap_or_else(|| "default".to_string()),
            name: route.name_any(),
            parent_refs,
            hostnames: route.spec.hostnames.clone().unwrap_or_default(),
        }
    }
}

// =============================================================================
// Hostnames
// =============================================================================

/// Validate hostname according to DNS-1123 subdomain spec
///
/// Rules:
/// - Lowercase alphanumeric characters, hyphens, and dots only
/// - Labels must not start or end with a hyphen
/// - Can start with wildcard "*."
/// - Max length 253 characters, 63 per label
pub fn validate_hostname(hostname: &str) -> Result<(), String> {
    if hostname.is_empty() {
        return Err("hostname is empty".to_string());
    }

    if hostname.len() > 253 {
        return Err(format!("hostname '{}' is longer than 253 characters", hostname));
    }

    let labels = hostname.strip_prefix("*.").unwrap_or(hostname);
    if labels.is_empty() {
        return Err(format!("hostname '{}' has no labels after the wildcard", hostname));
    }

    for label in labels.split('.') {
        if label.is_empty() {
            return Err(format!("hostname '{}' has an empty label", hostname));
        }
        if label.len() > 63 {
            return Err(format!("label '{}' is longer than 63 characters", label));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(format!("label '{}' starts or ends with '-'", label));
        }
        if let Some(c) = label
            .chars()
            .find(|c| !c.is_ascii_lowercase() && !c.is_ascii_digit() && *c != '-')
        {
            return Err(format!(
                "hostname '{}' contains invalid character '{}'",
                hostname, c
            ));
        }
    }

    Ok(())
}

/// Route hostnames that pass validation and the wildcard policy
///
/// An empty result means the route has nothing to serve.
pub fn valid_hostnames(route: &HttpRoute, allow_wildcard: bool) -> Result<Vec<String>, String> {
    let mut valid = Vec::new();
    let mut last_error = format!("HTTPRoute {} has no hostnames", route.object_ref());

    for hostname in &route.hostnames {
        match validate_hostname(hostname) {
            Ok(()) if hostname.starts_with("*.") && !allow_wildcard => {
                last_error = format!("wildcard hostname '{}' is not allowed", hostname);
            }
            Ok(()) => valid.push(hostname.clone()),
            Err(err) => last_error = err,
        }
    }

    if valid.is_empty() {
        Err(last_error)
    } else {
        Ok(valid)
    }
}

/// `*.example.com` matches `foo.example.com` and `a.b.example.com`
fn wildcard_matches(suffix: &str, hostname: &str) -> bool {
    hostname.len() > suffix.len() + 1
        && hostname.ends_with(suffix)
        && hostname.as_bytes()[hostname.len() - suffix.len() - 1] == b'.'
}

/// Hostname served when a route hostname meets a listener hostname
///
/// Returns the more specific of the two, or `None` if they do not overlap.
pub fn intersect_hostname(route_hostname: &str, listener_hostname: Option<&str>) -> Option<String> {
    let Some(listener) = listener_hostname else {
        return Some(route_hostname.to_string());
    };
    if route_hostname == listener {
        return Some(route_hostname.to_string());
    }

    match (route_hostname.strip_prefix("*."), listener.strip_prefix("*.")) {
        (None, Some(suffix)) if wildcard_matches(suffix, route_hostname) => {
            Some(route_hostname.to_string())
        }
        (Some(suffix), None) if wildcard_matches(suffix, listener) => Some(listener.to_string()),
        (Some(route_suffix), Some(listener_suffix)) => {
            if wildcard_matches(listener_suffix, route_suffix) {
                Some(route_hostname.to_string())
            } else if wildcard_matches(route_suffix, listener_suffix) {
                Some(listener.to_string())
            } else {
                None
            }
        }
        _ => None,
    }
}

// =============================================================================
// Binding
// =============================================================================

/// Bindings of one parentRef against its Gateway's valid listeners
///
/// `Err` carries the reason no listener matched.
fn bind_parent_ref(
    route: &HttpRoute,
    parent: &ParentRef,
    listeners: &[ValidListener],
    hostnames: &[String],
) -> Result<Vec<RouteRef>, Reason> {
    let candidates: Vec<&ValidListener> = listeners
        .iter()
        .filter(|l| l.accepts_http_routes())
        .filter(|l| parent.section_name.as_ref().map_or(true, |s| s == &l.name))
        .filter(|l| parent.port.map_or(true, |p| p == i32::from(l.port)))
        .collect();

    if candidates.is_empty() {
        return Err(if parent.section_name.is_some() || parent.port.is_some() {
            Reason::NoMatchingParent
        } else {
            Reason::NotAllowedByListeners
        });
    }

    let bindings: Vec<RouteRef> = candidates
        .into_iter()
        .filter_map(|listener| {
            let served: BTreeSet<String> = hostnames
                .iter()
                .filter_map(|h| intersect_hostname(h, listener.hostname.as_deref()))
                .collect();
            if served.is_empty() {
                return None;
            }
            Some(RouteRef {
                route: route.object_ref(),
                listener: listener.name.clone(),
                port: listener.port,
                hostnames: served.into_iter().collect(),
            })
        })
        .collect();

    if bindings.is_empty() {
        Err(Reason::NoMatchingListenerHostname)
    } else {
        Ok(bindings)
    }
}

/// Every binding of `route` to listeners of the Gateway `gateway`
///
/// Parent refs naming the same listener are merged; the result is sorted by
/// listener name.
pub fn bindings_for_gateway(
    route: &HttpRoute,
    gateway: &NamespacedName,
    listeners: &[ValidListener],
    allow_wildcard: bool,
) -> Vec<RouteRef> {
    let Ok(hostnames) = valid_hostnames(route, allow_wildcard) else {
        return Vec::new();
    };

    let mut merged: BTreeMap<String, RouteRef> = BTreeMap::new();
    for parent in route
        .parent_refs
        .iter()
        .filter(|p| &p.gateway_ref(&route.namespace) == gateway)
    {
        for binding in bind_parent_ref(route, parent, listeners, &hostnames).unwrap_or_default() {
            match merged.get_mut(&binding.listener) {
                Some(existing) => {
                    existing.hostnames.extend(binding.hostnames);
                    existing.hostnames.sort();
                    existing.hostnames.dedup();
                }
                None => {
                    merged.insert(binding.listener.clone(), binding);
                }
            }
        }
    }
    merged.into_values().collect()
}

// =============================================================================
// Admission
// =============================================================================

/// What the route's parent Gateway looks like to this controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentState {
    /// Gateway not in the cache, or waiting for its class
    Missing,
    /// Gateway belongs to another controller
    Unmanaged,
    /// Gateway is ours; its valid listeners (empty when rejected)
    Listeners(Vec<ValidListener>),
}

/// Admission outcome for one parentRef
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentOutcome {
    pub gateway: NamespacedName,
    pub section_name: Option<String>,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteAdmission {
    pub verdict: Verdict,
    pub parents: Vec<ParentOutcome>,
}

pub fn admit(
    route: &HttpRoute,
    parents: &BTreeMap<NamespacedName, ParentState>,
    allow_wildcard: bool,
) -> RouteAdmission {
    let hostnames = valid_hostnames(route, allow_wildcard);
    let mut outcomes: Vec<ParentOutcome> = Vec::new();

    for parent in &route.parent_refs {
        let gateway = parent.gateway_ref(&route.namespace);
        if outcomes
            .iter()
            .any(|o| o.gateway == gateway && o.section_name == parent.section_name)
        {
            continue;
        }

        let verdict = match (parents.get(&gateway), &hostnames) {
            (None | Some(ParentState::Missing), _) => {
                Verdict::pending(format!("Gateway {} not found", gateway))
            }
            (Some(ParentState::Unmanaged), _) => continue,
            (Some(ParentState::Listeners(_)), Err(message)) => {
                Verdict::rejected(Reason::UnsupportedValue, message.clone())
            }
            (Some(ParentState::Listeners(listeners)), Ok(hostnames)) => {
                match bind_parent_ref(route, parent, listeners, hostnames) {
                    Ok(_) => Verdict::Accepted,
                    Err(reason) => Verdict::rejected(
                        reason,
                        format!("no listener of Gateway {} accepts this route", gateway),
                    ),
                }
            }
        };

        outcomes.push(ParentOutcome {
            gateway,
            section_name: parent.section_name.clone(),
            verdict,
        });
    }

    let verdict = if let Err(message) = &hostnames {
        Verdict::rejected(Reason::UnsupportedValue, message.clone())
    } else if outcomes.iter().any(|o| o.verdict.is_accepted()) {
        Verdict::Accepted
    } else if let Some(rejected) = outcomes.iter().find_map(|o| match &o.verdict {
        Verdict::Rejected(r) => Some(r),
        _ => None,
    }) {
        Verdict::rejected(Reason::NoMatchingParent, rejected.message.clone())
    } else {
        Verdict::pending(format!(
            "no managed parent Gateway for HTTPRoute {}",
            route.object_ref()
        ))
    };

    RouteAdmission {
        verdict,
        parents: outcomes,
    }
}

/// Status report for a route; `None` when no parent is ours
pub fn status_report(route: &HttpRoute, admission: &RouteAdmission) -> Option<StatusReport> {
    if admission.parents.is_empty() {
        return None;
    }

    let mut report = StatusReport::new(common::WorkKey::http_route(&route.namespace, &route.name));
    for outcome in &admission.parents {
        let mut conditions = Vec::with_capacity(2);
        match &outcome.verdict {
            Verdict::Accepted => {
                conditions.push(Condition::new(
                    ConditionType::Accepted,
                    ConditionStatus::True,
                    Reason::Accepted,
                    "Route is accepted",
                ));
                conditions.push(Condition::new(
                    ConditionType::ResolvedRefs,
                    ConditionStatus::True,
                    Reason::ResolvedRefs,
                    "All references resolved",
                ));
            }
            Verdict::Rejected(rejection) => conditions.push(Condition::new(
                ConditionType::Accepted,
                ConditionStatus::False,
                rejection.reason,
                rejection.message.clone(),
            )),
            Verdict::Pending { message } => conditions.push(Condition::new(
                ConditionType::Accepted,
                ConditionStatus::Unknown,
                Reason::Pending,
                message.clone(),
            )),
        }
        report.parents.push(RouteParentStatus {
            gateway: outcome.gateway.clone(),
            section_name: outcome.section_name.clone(),
            conditions,
        });
    }
    Some(report)
}
