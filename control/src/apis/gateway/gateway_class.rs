//! GatewayClass admission
//!
//! A class is ours when its controllerName matches this controller's
//! identity. Classes of other controllers are ignored without a status write.

use crate::apis::gateway::admission::{Reason, Verdict};
use crate::apis::status::{Condition, ConditionStatus, ConditionType, StatusReport};
use crate::cache::GatewayClass;
use common::WorkKey;
use gateway_api::apis::standard::gatewayclasses::GatewayClass as KubeGatewayClass;
use kube::ResourceExt;

impl From<&KubeGatewayClass> for GatewayClass {
    fn from(class: &KubeGatewayClass) -> Self {
        Self {
            name: class.name_any(),
            controller_name: class.spec.controller_name.clone(),
            parameters_ref: class
                .spec
                .parameters_ref
                .as_ref()
                .map(|p| format!("{}/{}/{}", p.group, p.kind, p.name)),
        }
    }
}

/// Check if a GatewayClass should be accepted by this controller
pub fn admit(class: &GatewayClass, controller_name: &str) -> Verdict {
    if class.controller_name != controller_name {
        return Verdict::rejected(
            Reason::UnmanagedController,
            format!("GatewayClass is managed by {}", class.controller_name),
        );
    }
    if let Some(parameters) = &class.parameters_ref {
        return Verdict::rejected(
            Reason::InvalidParameters,
            format!("parametersRef {} is not supported", parameters),
        );
    }
    Verdict::Accepted
}

/// Status report for an admitted class; `None` for silent rejections
pub fn status_report(class: &GatewayClass, verdict: &Verdict, controller_name: &str) -> Option<StatusReport> {
    let key = WorkKey::gateway_class(&class.name);
    let condition = match verdict {
        Verdict::Accepted => Condition::new(
            ConditionType::Accepted,
            ConditionStatus::True,
            Reason::Accepted,
            format!("GatewayClass is accepted by controller {}", controller_name),
        ),
        Verdict::Rejected(rejection) if rejection.is_silent() => return None,
        Verdict::Rejected(rejection) => Condition::new(
            ConditionType::Accepted,
            ConditionStatus::False,
            rejection.reason,
            rejection.message.clone(),
        ),
        Verdict::Pending { message } => Condition::new(
            ConditionType::Accepted,
            ConditionStatus::Unknown,
            Reason::Pending,
            message.clone(),
        ),
    };
    Some(StatusReport::new(key).with_condition(condition))
}
