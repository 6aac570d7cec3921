//! HTTPRoute attachment: hostname policy and parent ordering

use crate::integration::framework::fixtures::*;
use crate::integration::framework::{ensure, TestContext, TestResult};
use crate::integration::TestScenario;
use std::time::Duration;

/// Wildcard hostname never binds; a concrete hostname does
pub struct WildcardRouteScenario;

#[async_trait::async_trait]
impl TestScenario for WildcardRouteScenario {
    fn name(&self) -> &str {
        "wildcard_route"
    }

    async fn run(&self, ctx: &TestContext) -> TestResult {
        let route = object_ref("route-e");

        ctx.controller.apply(gateway_class(CLASS));
        ctx.controller
            .apply(gateway("gw-e", vec![http_listener("web", 8080)]));
        ctx.controller
            .apply(http_route("route-e", "gw-e", &["*.example.com"]));

        ctx.eventually("rejected status for route-e", || {
            ctx.status(&route_key("route-e"))
                .is_some_and(|report| !report.is_accepted() && !report.is_pending())
        })
        .await?;
        ctx.never("route-e bound to gw-e", Duration::from_millis(200), || {
            ctx.graph("gw-e").is_some_and(|g| g.binds_route(&route))
        })
        .await?;
        ensure(ctx.graph("gw-e").is_some(), "gw-e should still be published")?;

        ctx.controller
            .apply(http_route("route-e", "gw-e", &["foo.com"]));
        ctx.eventually("route-e bound to gw-e", || {
            ctx.graph("gw-e").is_some_and(|g| g.binds_route(&route))
        })
        .await?;
        ctx.eventually("accepted status for route-e", || {
            ctx.status(&route_key("route-e"))
                .is_some_and(|report| report.is_accepted())
        })
        .await
    }
}

/// Route created ahead of its Gateway resolves once the Gateway appears
pub struct RouteBeforeGatewayScenario;

#[async_trait::async_trait]
impl TestScenario for RouteBeforeGatewayScenario {
    fn name(&self) -> &str {
        "route_before_gateway"
    }

    async fn run(&self, ctx: &TestContext) -> TestResult {
        let route = object_ref("route-f");

        ctx.controller.apply(gateway_class(CLASS));
        ctx.controller
            .apply(http_route("route-f", "gw-f", &["foo.com"]));

        ctx.eventually("pending status for route-f", || {
            ctx.status(&route_key("route-f"))
                .is_some_and(|report| report.is_pending())
        })
        .await?;
        ensure(ctx.graph("gw-f").is_none(), "no graph before the Gateway")?;

        ctx.controller
            .apply(gateway("gw-f", vec![http_listener("web", 8080)]));

        ctx.eventually("route-f bound to gw-f", || {
            ctx.graph("gw-f").is_some_and(|g| g.binds_route(&route))
        })
        .await?;
        ctx.eventually("accepted status for route-f", || {
            ctx.status(&route_key("route-f"))
                .is_some_and(|report| report.is_accepted())
        })
        .await
    }
}

/// Route naming a Gateway that never appears stays pending and unbound
pub struct RouteWithoutGatewayScenario;

#[async_trait::async_trait]
impl TestScenario for RouteWithoutGatewayScenario {
    fn name(&self) -> &str {
        "route_without_gateway"
    }

    async fn run(&self, ctx: &TestContext) -> TestResult {
        let route = object_ref("route-g");

        ctx.controller.apply(gateway_class(CLASS));
        ctx.controller
            .apply(gateway("gw-g", vec![http_listener("web", 8080)]));
        ctx.controller
            .apply(http_route("route-g", "missing-gw", &["foo.com"]));

        ctx.eventually("pending status for route-g", || {
            ctx.status(&route_key("route-g"))
                .is_some_and(|report| report.is_pending())
        })
        .await?;
        ctx.settle().await?;

        let graph = ctx.graph("gw-g").ok_or("gw-g should be published")?;
        ensure(!graph.binds_route(&route), "route-g bound to an unrelated Gateway")?;
        ensure(
            ctx.controller.store().len() == 1,
            "only gw-g should have a model",
        )?;
        ensure(
            ctx.controller.pending_retries() == 0,
            "a pending route is not retried",
        )
    }
}

/// Malformed hostname is rejected and never bound
pub struct InvalidHostnameScenario;

#[async_trait::async_trait]
impl TestScenario for InvalidHostnameScenario {
    fn name(&self) -> &str {
        "invalid_hostname"
    }

    async fn run(&self, ctx: &TestContext) -> TestResult {
        let route = object_ref("route-h");

        ctx.controller.apply(gateway_class(CLASS));
        ctx.controller
            .apply(gateway("gw-h", vec![http_listener("web", 8080)]));
        ctx.controller
            .apply(http_route("route-h", "gw-h", &["not_a valid.host"]));

        ctx.eventually("rejected status for route-h", || {
            ctx.status(&route_key("route-h"))
                .is_some_and(|report| !report.is_accepted() && !report.is_pending())
        })
        .await?;
        ctx.settle().await?;

        let graph = ctx.graph("gw-h").ok_or("gw-h should be published")?;
        ensure(!graph.binds_route(&route), "invalid route was bound")?;
        ensure(
            ctx.controller.pending_retries() == 0,
            "validation failures are not retried",
        )
    }
}
