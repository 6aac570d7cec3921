//! Gateway admission
//!
//! A Gateway is admitted once its class is ours and accepted and at least one
//! listener is structurally valid. Invalid listeners are reported in listener
//! status and never block the valid ones.

use crate::apis::gateway::admission::{Reason, Verdict};
use crate::apis::gateway::gateway_class;
use crate::apis::gateway::http_route::validate_hostname;
use crate::apis::status::{
    Condition, ConditionStatus, ConditionType, ListenerStatus, StatusReport,
};
use crate::cache::{Gateway, GatewayClass, Listener, ListenerTls, TlsMode};
use common::{ConfigGraph, NamespacedName, Protocol};
use gateway_api::apis::standard::gateways::{Gateway as KubeGateway, GatewayListeners};
use kube::ResourceExt;
use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;

// =============================================================================
// Conversion
// =============================================================================

impl From<&KubeGateway> for Gateway {
    fn from(gateway: &KubeGateway) -> Self {
        let namespace = gateway.namespace().unwrap_or_else(|| "default".to_string());
        let listeners = gateway
            .spec
            .listeners
            .iter()
            .map(|l| convert_listener(l, &namespace))
            .collect();
        let addresses = gateway
            .spec
            .addresses
            .iter()
            .flatten()
            .filter_map(|address| {
                serde_json::to_value(address)
                    .ok()?
                    .get("value")?
                    .as_str()
                    .map(str::to_owned)
            })
            .collect();

        Self {
            name: gateway.name_any(),
            class_name: gateway.spec.gateway_class_name.clone(),
            namespace,
            listeners,
            addresses,
        }
    }
}

fn convert_listener(listener: &GatewayListeners, namespace: &str) -> Listener {
    let tls = listener.tls.as_ref().map(|tls| ListenerTls {
        mode: tls_mode(tls.mode.as_ref()),
        certificate_refs: tls
            .certificate_refs
            .iter()
            .flatten()
            .filter(|r| r.kind.as_deref().map_or(true, |k| k == "Secret"))
            .filter(|r| r.group.as_deref().map_or(true, str::is_empty))
            .map(|r| NamespacedName::new(r.namespace.as_deref().unwrap_or(namespace), &r.name))
            .collect(),
    });

    Listener {
        name: listener.name.clone(),
        port: listener.port,
        protocol: listener.protocol.clone(),
        hostname: listener.hostname.clone(),
        tls,
    }
}

/// Gateway API defaults an omitted mode to Terminate
fn tls_mode<M: Serialize>(mode: Option<&M>) -> TlsMode {
    let mode = mode
        .and_then(|m| serde_json::to_value(m).ok())
        .and_then(|v| v.as_str().map(str::to_owned));
    match mode.as_deref() {
        Some("Passthrough") => TlsMode::Passthrough,
        _ => TlsMode::Terminate,
    }
}

// =============================================================================
// Listener validation
// =============================================================================

/// Why a listener was left out
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListenerError {
    #[error("port {0} is out of range")]
    PortOutOfRange(i32),
    #[error("protocol '{0}' is not supported")]
    UnsupportedProtocol(String),
    #[error("invalid hostname: {0}")]
    InvalidHostname(String),
    #[error("{0} listener requires a tls block")]
    MissingTls(Protocol),
    #[error("TLS termination requires at least one certificate ref")]
    MissingCertificateRefs,
    #[error("listener name is already used")]
    DuplicateName,
    #[error("port {0} is already used with another protocol")]
    ProtocolConflict(u16),
    #[error("port {0} already has a listener for this hostname")]
    HostnameConflict(u16),
}

impl ListenerError {
    pub fn reason(&self) -> Reason {
        match self {
            ListenerError::PortOutOfRange(_) => Reason::PortUnavailable,
            ListenerError::UnsupportedProtocol(_) => Reason::UnsupportedProtocol,
            ListenerError::InvalidHostname(_) => Reason::UnsupportedValue,
            ListenerError::MissingTls(_) => Reason::InvalidTlsConfiguration,
            ListenerError::MissingCertificateRefs => Reason::InvalidCertificateRef,
            ListenerError::DuplicateName => Reason::ListenerNameConflict,
            ListenerError::ProtocolConflict(_) => Reason::ProtocolConflict,
            ListenerError::HostnameConflict(_) => Reason::HostnameConflict,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ListenerError::DuplicateName
                | ListenerError::ProtocolConflict(_)
                | ListenerError::HostnameConflict(_)
        )
    }
}

/// Listener that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidListener {
    pub name: String,
    pub port: u16,
    pub protocol: Protocol,
    pub hostname: Option<String>,
    pub tls: Option<ListenerTls>,
}

impl ValidListener {
    pub fn enable_ssl(&self) -> bool {
        matches!(
            self.tls,
            Some(ListenerTls {
                mode: TlsMode::Terminate,
                ..
            })
        )
    }

    /// HTTPRoutes attach to HTTP and HTTPS listeners only
    pub fn accepts_http_routes(&self) -> bool {
        matches!(self.protocol, Protocol::Http | Protocol::Https)
    }

    pub fn certificate_refs(&self) -> &[NamespacedName] {
        self.tls
            .as_ref()
            .map(|t| t.certificate_refs.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidListener {
    pub name: String,
    pub error: ListenerError,
}

fn validate_listener(listener: &Listener) -> Result<ValidListener, ListenerError> {
    let port = u16::try_from(listener.port)
        .ok()
        .filter(|p| *p != 0)
        .ok_or(ListenerError::PortOutOfRange(listener.port))?;

    let protocol = Protocol::parse(&listener.protocol)
        .ok_or_else(|| ListenerError::UnsupportedProtocol(listener.protocol.clone()))?;

    if let Some(hostname) = &listener.hostname {
        validate_hostname(hostname).map_err(ListenerError::InvalidHostname)?;
    }

    match &listener.tls {
        None if matches!(protocol, Protocol::Https | Protocol::Tls) => {
            return Err(ListenerError::MissingTls(protocol));
        }
        Some(tls) if tls.mode == TlsMode::Terminate && tls.certificate_refs.is_empty() => {
            return Err(ListenerError::MissingCertificateRefs);
        }
        _ => {}
    }

    Ok(ValidListener {
        name: listener.name.clone(),
        port,
        protocol,
        hostname: listener.hostname.clone(),
        tls: listener.tls.clone(),
    })
}

/// TCP and UDP may share a port number
fn protocols_compatible(a: Protocol, b: Protocol) -> bool {
    a == b || matches!((a, b), (Protocol::Tcp, Protocol::Udp) | (Protocol::Udp, Protocol::Tcp))
}

/// Split listeners into valid and invalid ones, in declaration order
///
/// The first valid listener on a port wins; later ones with a different
/// protocol or the same hostname are flagged as conflicts.
pub fn validate_listeners(listeners: &[Listener]) -> (Vec<ValidListener>, Vec<InvalidListener>) {
    let mut names = HashSet::new();
    let mut valid: Vec<ValidListener> = Vec::new();
    let mut invalid = Vec::new();

    for listener in listeners {
        let result = if !names.insert(listener.name.as_str()) {
            Err(ListenerError::DuplicateName)
        } else {
            validate_listener(listener).and_then(|candidate| {
                let same_port = valid.iter().filter(|v| v.port == candidate.port);
                for other in same_port {
                    if !protocols_compatible(other.protocol, candidate.protocol) {
                        return Err(ListenerError::ProtocolConflict(candidate.port));
                    }
                    if other.protocol == candidate.protocol && other.hostname == candidate.hostname
                    {
                        return Err(ListenerError::HostnameConflict(candidate.port));
                    }
                }
                Ok(candidate)
            })
        };

        match result {
            Ok(candidate) => valid.push(candidate),
            Err(error) => invalid.push(InvalidListener {
                name: listener.name.clone(),
                error,
            }),
        }
    }

    (valid, invalid)
}

// =============================================================================
// Admission
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayAdmission {
    pub verdict: Verdict,
    pub valid: Vec<ValidListener>,
    pub invalid: Vec<InvalidListener>,
}

impl GatewayAdmission {
    fn without_listeners(verdict: Verdict) -> Self {
        Self {
            verdict,
            valid: Vec::new(),
            invalid: Vec::new(),
        }
    }
}

pub fn admit(
    gateway: &Gateway,
    class: Option<&GatewayClass>,
    controller_name: &str,
) -> GatewayAdmission {
    let Some(class) = class else {
        return GatewayAdmission::without_listeners(Verdict::pending(format!(
            "GatewayClass {} not found",
            gateway.class_name
        )));
    };

    match gateway_class::admit(class, controller_name) {
        Verdict::Accepted => {}
        Verdict::Rejected(rejection) if rejection.is_silent() => {
            return GatewayAdmission::without_listeners(Verdict::Rejected(rejection));
        }
        Verdict::Rejected(_) | Verdict::Pending { .. } => {
            return GatewayAdmission::without_listeners(Verdict::pending(format!(
                "GatewayClass {} is not accepted",
                class.name
            )));
        }
    }

    let (valid, invalid) = validate_listeners(&gateway.listeners);
    let verdict = if valid.is_empty() {
        Verdict::rejected(
            Reason::ListenersNotValid,
            format!("none of the {} listener(s) is valid", gateway.listeners.len()),
        )
    } else {
        Verdict::Accepted
    };

    GatewayAdmission {
        verdict,
        valid,
        invalid,
    }
}

/// Rejection of a Gateway whose GatewayClass was accepted and since has been
/// deleted or stopped being accepted
pub fn class_removed(gateway: &Gateway) -> GatewayAdmission {
    GatewayAdmission::without_listeners(Verdict::rejected(
        Reason::Invalid,
        format!("GatewayClass {} is no longer accepted", gateway.class_name),
    ))
}

// =============================================================================
// Status
// =============================================================================

fn invalid_listener_status(listener: &InvalidListener) -> ListenerStatus {
    let mut conditions = vec![
        Condition::new(
            ConditionType::Accepted,
            ConditionStatus::False,
            listener.error.reason(),
            listener.error.to_string(),
        ),
        Condition::new(
            ConditionType::Programmed,
            ConditionStatus::False,
            Reason::Invalid,
            "Listener is invalid",
        ),
    ];
    if listener.error.is_conflict() {
        conditions.push(Condition::new(
            ConditionType::Conflicted,
            ConditionStatus::True,
            listener.error.reason(),
            listener.error.to_string(),
        ));
    }
    ListenerStatus {
        name: listener.name.clone(),
        attached_routes: 0,
        conditions,
    }
}

fn valid_listener_status(
    listener: &ValidListener,
    graph: Option<&ConfigGraph>,
    unresolved: &[NamespacedName],
) -> ListenerStatus {
    let attached_routes = graph
        .map(|g| {
            g.vs_nodes()
                .iter()
                .map(|vs| vs.attached_routes(&listener.name))
                .sum()
        })
        .unwrap_or(0);

    let missing: Vec<String> = if listener.enable_ssl() {
        let refs = listener.certificate_refs();
        if refs.iter().all(|r| unresolved.contains(r)) {
            refs.iter().map(|r| r.to_string()).collect()
        } else {
            Vec::new()
        }
    } else {
        Vec::new()
    };

    let resolved_refs = if missing.is_empty() {
        Condition::new(
            ConditionType::ResolvedRefs,
            ConditionStatus::True,
            Reason::ResolvedRefs,
            "All references resolved",
        )
    } else {
        Condition::new(
            ConditionType::ResolvedRefs,
            ConditionStatus::False,
            Reason::InvalidCertificateRef,
            format!("Secret(s) {} not resolved", missing.join(", ")),
        )
    };

    ListenerStatus {
        name: listener.name.clone(),
        attached_routes,
        conditions: vec![
            Condition::new(
                ConditionType::Accepted,
                ConditionStatus::True,
                Reason::Accepted,
                "Listener is accepted",
            ),
            Condition::new(
                ConditionType::Programmed,
                ConditionStatus::from_bool(graph.is_some()),
                if graph.is_some() {
                    Reason::Programmed
                } else {
                    Reason::Pending
                },
                if graph.is_some() {
                    "Listener is programmed"
                } else {
                    "Listener is not programmed yet"
                },
            ),
            resolved_refs,
        ],
    }
}

/// Status report for a Gateway; `None` for silent rejections
///
/// `graph` is the graph published for the Gateway, `unresolved` the Secrets
/// the build could not resolve.
pub fn status_report(
    gateway: &Gateway,
    admission: &GatewayAdmission,
    graph: Option<&ConfigGraph>,
    unresolved: &[NamespacedName],
) -> Option<StatusReport> {
    let mut report = StatusReport::new(gateway.key());

    match &admission.verdict {
        Verdict::Rejected(rejection) if rejection.is_silent() => return None,
        Verdict::Pending { message } => {
            report.conditions.push(Condition::new(
                ConditionType::Accepted,
                ConditionStatus::Unknown,
                Reason::Pending,
                message.clone(),
            ));
            report.conditions.push(Condition::new(
                ConditionType::Programmed,
                ConditionStatus::Unknown,
                Reason::Pending,
                message.clone(),
            ));
            return Some(report);
        }
        Verdict::Rejected(rejection) => {
            report.conditions.push(Condition::new(
                ConditionType::Accepted,
                ConditionStatus::False,
                rejection.reason,
                rejection.message.clone(),
            ));
            report.conditions.push(Condition::new(
                ConditionType::Programmed,
                ConditionStatus::False,
                Reason::Invalid,
                "Gateway is not programmed",
            ));
        }
        Verdict::Accepted => {
            report.conditions.push(Condition::new(
                ConditionType::Accepted,
                ConditionStatus::True,
                Reason::Accepted,
                "Gateway is accepted",
            ));
            report.conditions.push(Condition::new(
                ConditionType::Programmed,
                ConditionStatus::from_bool(graph.is_some()),
                if graph.is_some() {
                    Reason::Programmed
                } else {
                    Reason::Pending
                },
                if graph.is_some() {
                    "Gateway is programmed"
                } else {
                    "Gateway is not programmed yet"
                },
            ));
        }
    }

    // Listener statuses follow declaration order, one per name
    for listener in &gateway.listeners {
        if report.listener(&listener.name).is_some() {
            continue;
        }
        if let Some(valid) = admission.valid.iter().find(|v| v.name == listener.name) {
            report
                .listeners
                .push(valid_listener_status(valid, graph, unresolved));
        } else if let Some(invalid) = admission.invalid.iter().find(|i| i.name == listener.name) {
            report.listeners.push(invalid_listener_status(invalid));
        }
    }

    Some(report)
}
