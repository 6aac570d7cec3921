//! Gateway lifecycle: create, TLS, upgrade, delete

use super::{single_vs, tls_shape};
use crate::integration::framework::fixtures::*;
use crate::integration::framework::{ensure, TestContext, TestResult};
use crate::integration::TestScenario;
use control::graph::Lookup;
use std::time::Duration;

/// Plaintext Gateway yields one VS with one port, one VIP and no certificates
pub struct PlaintextGatewayScenario;

#[async_trait::async_trait]
impl TestScenario for PlaintextGatewayScenario {
    fn name(&self) -> &str {
        "plaintext_gateway"
    }

    async fn run(&self, ctx: &TestContext) -> TestResult {
        ctx.controller.apply(gateway_class(CLASS));
        ctx.controller
            .apply(gateway("gw-a", vec![http_listener("web", 8080)]));

        ctx.eventually("graph for gw-a", || ctx.graph("gw-a").is_some())
            .await?;

        let graph = ctx.graph("gw-a").ok_or("graph vanished")?;
        let vs = single_vs(&graph).ok_or("expected exactly one VS node")?;
        ensure(vs.port_proto.len() == 1, "expected one port/protocol")?;
        ensure(vs.port_proto[0].port == 8080, "expected port 8080")?;
        ensure(!vs.port_proto[0].enable_ssl, "plaintext listener has SSL")?;
        ensure(vs.ssl_key_cert_refs.is_empty(), "unexpected certificates")?;
        ensure(vs.vs_vip_refs.len() == 1, "expected one VIP ref")?;

        ctx.eventually("gw-a accepted status", || {
            ctx.status(&gateway_key("gw-a"))
                .is_some_and(|report| report.is_accepted())
        })
        .await
    }
}

/// HTTPS listener with a valid Secret enables SSL and binds the certificate
pub struct TlsGatewayScenario;

#[async_trait::async_trait]
impl TestScenario for TlsGatewayScenario {
    fn name(&self) -> &str {
        "tls_gateway"
    }

    async fn run(&self, ctx: &TestContext) -> TestResult {
        ctx.controller.apply(gateway_class(CLASS));
        ctx.controller.apply(tls_secret("tls-b"));
        ctx.controller
            .apply(gateway("gw-b", vec![https_listener("secure", 8443, "tls-b")]));

        ctx.eventually("gw-b with SSL and one certificate", || {
            ctx.graph("gw-b")
                .is_some_and(|g| tls_shape(&g) == Some((true, 1)))
        })
        .await?;

        let graph = ctx.graph("gw-b").ok_or("graph vanished")?;
        let vs = single_vs(&graph).ok_or("expected exactly one VS node")?;
        ensure(
            vs.ssl_key_cert_refs[0].listener == "secure",
            "certificate bound to the wrong listener",
        )?;
        ensure(
            vs.ssl_key_cert_refs[0].secret == object_ref("tls-b"),
            "certificate points at the wrong Secret",
        )
    }
}

/// Plaintext Gateway gains TLS, then drops it again
pub struct TlsUpgradeScenario;

#[async_trait::async_trait]
impl TestScenario for TlsUpgradeScenario {
    fn name(&self) -> &str {
        "tls_upgrade"
    }

    async fn run(&self, ctx: &TestContext) -> TestResult {
        ctx.controller.apply(gateway_class(CLASS));
        ctx.controller
            .apply(gateway("gw-c", vec![http_listener("web", 8080)]));
        ctx.eventually("plaintext gw-c", || {
            ctx.graph("gw-c")
                .is_some_and(|g| tls_shape(&g) == Some((false, 0)))
        })
        .await?;

        ctx.controller.apply(tls_secret("tls-c"));
        ctx.controller
            .apply(gateway("gw-c", vec![https_listener("web", 8080, "tls-c")]));
        ctx.eventually("gw-c with TLS", || {
            ctx.graph("gw-c")
                .is_some_and(|g| tls_shape(&g) == Some((true, 1)))
        })
        .await?;

        ctx.controller
            .apply(gateway("gw-c", vec![http_listener("web", 8080)]));
        ctx.eventually("gw-c back to plaintext", || {
            ctx.graph("gw-c")
                .is_some_and(|g| tls_shape(&g) == Some((false, 0)))
        })
        .await
    }
}

/// Deleting a Gateway tombstones its model before the purge
pub struct DeleteTombstonesScenario;

#[async_trait::async_trait]
impl TestScenario for DeleteTombstonesScenario {
    fn name(&self) -> &str {
        "delete_tombstones"
    }

    async fn run(&self, ctx: &TestContext) -> TestResult {
        ctx.controller.apply(gateway_class(CLASS));
        ctx.controller
            .apply(gateway("gw-d", vec![http_listener("web", 8080)]));
        ctx.eventually("graph for gw-d", || ctx.graph("gw-d").is_some())
            .await?;

        ctx.controller.delete(gateway_key("gw-d"));

        let model = ctx.model("gw-d");
        ctx.eventually("tombstone for gw-d", || {
            ctx.controller.store().get(&model) == (true, None)
        })
        .await?;
        ensure(
            ctx.lookup("gw-d") == Lookup::Tombstone,
            "lookup should report a tombstone",
        )?;

        ctx.eventually("purge of gw-d", || {
            ctx.controller.store().get(&model) == (false, None)
        })
        .await
    }
}

/// Deleting the GatewayClass retires the Gateway's model until the class returns
pub struct ClassDeletedScenario;

#[async_trait::async_trait]
impl TestScenario for ClassDeletedScenario {
    fn name(&self) -> &str {
        "class_deleted"
    }

    async fn run(&self, ctx: &TestContext) -> TestResult {
        let key = gateway_key("gw-k");

        ctx.controller.apply(gateway_class(CLASS));
        ctx.controller
            .apply(gateway("gw-k", vec![http_listener("web", 8080)]));
        ctx.eventually("gw-k accepted and published", || {
            ctx.graph("gw-k").is_some()
                && ctx.status(&key).is_some_and(|report| report.is_accepted())
        })
        .await?;

        ctx.controller
            .delete(common::WorkKey::gateway_class(CLASS));
        ctx.eventually("gw-k graph retired", || {
            !matches!(ctx.lookup("gw-k"), Lookup::Present(_))
        })
        .await?;
        ctx.eventually("gw-k no longer accepted", || {
            ctx.status(&key)
                .is_some_and(|report| !report.is_accepted() && !report.is_pending())
        })
        .await?;
        ctx.never("gw-k republished", Duration::from_millis(200), || {
            ctx.graph("gw-k").is_some()
        })
        .await?;

        ctx.controller.apply(gateway_class(CLASS));
        ctx.eventually("gw-k published again", || ctx.graph("gw-k").is_some())
            .await?;
        ctx.eventually("gw-k accepted again", || {
            ctx.status(&key).is_some_and(|report| report.is_accepted())
        })
        .await
    }
}
