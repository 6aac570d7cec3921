//! Secret resolution and class ownership

use super::tls_shape;
use crate::integration::framework::fixtures::*;
use crate::integration::framework::{ensure, TestContext, TestResult};
use crate::integration::TestScenario;
use control::apis::status::{ConditionType, StatusReport};
use std::time::Duration;

fn listener_resolved(report: &StatusReport, listener: &str) -> Option<bool> {
    report
        .listener(listener)?
        .conditions
        .iter()
        .find(|c| c.type_ == ConditionType::ResolvedRefs)
        .map(|c| c.is_true())
}

/// Referenced Secret goes missing, appears, then goes away again
pub struct SecretLifecycleScenario;

#[async_trait::async_trait]
impl TestScenario for SecretLifecycleScenario {
    fn name(&self) -> &str {
        "secret_lifecycle"
    }

    async fn run(&self, ctx: &TestContext) -> TestResult {
        let key = gateway_key("gw-s");

        ctx.controller.apply(gateway_class(CLASS));
        ctx.controller
            .apply(gateway("gw-s", vec![https_listener("secure", 443, "tls-s")]));

        ctx.eventually("gw-s with SSL and no certificate", || {
            ctx.graph("gw-s")
                .is_some_and(|g| tls_shape(&g) == Some((true, 0)))
        })
        .await?;
        ctx.eventually("unresolved refs on listener secure", || {
            ctx.status(&key)
                .is_some_and(|r| listener_resolved(&r, "secure") == Some(false))
        })
        .await?;

        ctx.controller.apply(tls_secret("tls-s"));
        ctx.eventually("gw-s with one certificate", || {
            ctx.graph("gw-s")
                .is_some_and(|g| tls_shape(&g) == Some((true, 1)))
        })
        .await?;
        ctx.eventually("resolved refs on listener secure", || {
            ctx.status(&key)
                .is_some_and(|r| listener_resolved(&r, "secure") == Some(true))
        })
        .await?;
        ctx.eventually("retries drained", || ctx.controller.pending_retries() == 0)
            .await?;

        ctx.controller.delete(secret_key("tls-s"));
        ctx.eventually("gw-s certificate dropped", || {
            ctx.graph("gw-s")
                .is_some_and(|g| tls_shape(&g) == Some((true, 0)))
        })
        .await
    }
}

/// Gateways of another controller's class are left alone
pub struct ForeignClassScenario;

#[async_trait::async_trait]
impl TestScenario for ForeignClassScenario {
    fn name(&self) -> &str {
        "foreign_class"
    }

    async fn run(&self, ctx: &TestContext) -> TestResult {
        let mut foreign = gateway("gw-x", vec![http_listener("web", 8080)]);
        foreign.class_name = "other".to_string();

        ctx.controller.apply(foreign_class("other"));
        ctx.controller.apply(gateway_class(CLASS));
        ctx.controller.apply(foreign.clone());
        ctx.settle().await?;

        ensure(ctx.graph("gw-x").is_none(), "foreign Gateway was published")?;
        ensure(
            ctx.status(&gateway_key("gw-x")).is_none(),
            "foreign Gateway got a status",
        )?;
        ensure(
            ctx.status(&common::WorkKey::gateway_class("other")).is_none(),
            "foreign GatewayClass got a status",
        )?;

        ctx.controller
            .apply(gateway("gw-x", vec![http_listener("web", 8080)]));
        ctx.eventually("gw-x adopted", || ctx.graph("gw-x").is_some())
            .await?;

        ctx.controller.apply(foreign);
        ctx.eventually("gw-x released", || ctx.graph("gw-x").is_none())
            .await?;
        ctx.never(
            "gw-x republished",
            Duration::from_millis(100),
            || ctx.graph("gw-x").is_some(),
        )
        .await
    }
}
