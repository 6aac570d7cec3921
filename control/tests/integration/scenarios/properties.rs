//! Graph properties that must hold whatever the event order

use super::tls_shape;
use crate::integration::framework::fixtures::*;
use crate::integration::framework::{ensure, test_config, TestContext, TestResult};
use crate::integration::TestScenario;
use control::graph::Lookup;
use control::WorkerClass;
use std::time::{Duration, Instant};

/// Same objects in a different order produce the same graph
pub struct DeterminismScenario;

#[async_trait::async_trait]
impl TestScenario for DeterminismScenario {
    fn name(&self) -> &str {
        "determinism"
    }

    async fn run(&self, ctx: &TestContext) -> TestResult {
        let other = TestContext::new();
        let result = compare_orders(ctx, &other).await;
        other.cleanup().await;
        result
    }
}

async fn compare_orders(first: &TestContext, second: &TestContext) -> TestResult {
    let listeners = vec![
        https_listener("secure", 443, "tls-p1"),
        http_listener("web", 8080),
    ];

    first.controller.apply(gateway_class(CLASS));
    first.controller.apply(tls_secret("tls-p1"));
    first
        .controller
        .apply(gateway("gw-p1", listeners.clone()));
    first
        .controller
        .apply(http_route("route-1", "gw-p1", &["foo.com"]));
    first
        .controller
        .apply(http_route("route-2", "gw-p1", &["bar.com"]));

    second
        .controller
        .apply(http_route("route-2", "gw-p1", &["bar.com"]));
    second
        .controller
        .apply(http_route("route-1", "gw-p1", &["foo.com"]));
    second.controller.apply(gateway("gw-p1", listeners));
    second.controller.apply(tls_secret("tls-p1"));
    second.controller.apply(gateway_class(CLASS));

    for ctx in [first, second] {
        ctx.eventually("complete gw-p1 graph", || {
            ctx.graph("gw-p1").is_some_and(|g| {
                tls_shape(&g) == Some((true, 1))
                    && g.binds_route(&object_ref("route-1"))
                    && g.binds_route(&object_ref("route-2"))
            })
        })
        .await?;
        ctx.settle().await?;
    }

    let a = first.graph("gw-p1").ok_or("first graph vanished")?;
    let b = second.graph("gw-p1").ok_or("second graph vanished")?;
    ensure(*a == *b, format!("graphs differ:\n{:?}\n{:?}", a, b))
}

/// Toggling TLS off restores the exact plaintext graph
pub struct TlsToggleScenario;

#[async_trait::async_trait]
impl TestScenario for TlsToggleScenario {
    fn name(&self) -> &str {
        "tls_toggle"
    }

    async fn run(&self, ctx: &TestContext) -> TestResult {
        let plaintext = || gateway("gw-t", vec![http_listener("web", 8080)]);
        let tls = || gateway("gw-t", vec![https_listener("web", 8080, "tls-t")]);

        ctx.controller.apply(gateway_class(CLASS));
        ctx.controller.apply(tls_secret("tls-t"));
        ctx.controller.apply(plaintext());
        ctx.eventually("plaintext gw-t", || ctx.graph("gw-t").is_some())
            .await?;
        let original = ctx.graph("gw-t").ok_or("graph vanished")?;

        ctx.controller.apply(tls());
        ctx.eventually("gw-t with TLS", || {
            ctx.graph("gw-t")
                .is_some_and(|g| tls_shape(&g) == Some((true, 1)))
        })
        .await?;
        let secured = ctx.graph("gw-t").ok_or("graph vanished")?;

        ctx.controller.apply(plaintext());
        ctx.eventually("gw-t restored", || {
            ctx.graph("gw-t").is_some_and(|g| *g == *original)
        })
        .await?;

        ctx.controller.apply(tls());
        ctx.eventually("gw-t secured again", || {
            ctx.graph("gw-t").is_some_and(|g| *g == *secured)
        })
        .await
    }
}

/// A deleted model is observable as a tombstone before it disappears
pub struct TombstoneBeforePurgeScenario;

#[async_trait::async_trait]
impl TestScenario for TombstoneBeforePurgeScenario {
    fn name(&self) -> &str {
        "tombstone_before_purge"
    }

    async fn run(&self, ctx: &TestContext) -> TestResult {
        ctx.controller.apply(gateway_class(CLASS));
        ctx.controller
            .apply(gateway("gw-z", vec![http_listener("web", 8080)]));
        ctx.eventually("graph for gw-z", || ctx.graph("gw-z").is_some())
            .await?;

        ctx.controller.delete(gateway_key("gw-z"));

        let mut seen_tombstone = false;
        let deadline = Instant::now() + ctx.timeout;
        loop {
            match ctx.lookup("gw-z") {
                Lookup::Present(_) => {
                    ensure(!seen_tombstone, "graph reappeared after its tombstone")?;
                }
                Lookup::Tombstone => seen_tombstone = true,
                Lookup::Absent => {
                    return ensure(seen_tombstone, "model purged without a tombstone");
                }
            }
            ensure(Instant::now() < deadline, "gw-z was never purged")?;
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}

/// Moving or deleting a route removes its binding from the old Gateway
pub struct NoOrphanBindingScenario;

#[async_trait::async_trait]
impl TestScenario for NoOrphanBindingScenario {
    fn name(&self) -> &str {
        "no_orphan_binding"
    }

    async fn run(&self, ctx: &TestContext) -> TestResult {
        let route = object_ref("route-o");

        ctx.controller.apply(gateway_class(CLASS));
        ctx.controller
            .apply(gateway("gw-o1", vec![http_listener("web", 8080)]));
        ctx.controller
            .apply(gateway("gw-o2", vec![http_listener("web", 9090)]));
        ctx.controller
            .apply(http_route("route-o", "gw-o1", &["foo.com"]));
        ctx.eventually("route-o bound to gw-o1", || {
            ctx.graph("gw-o1").is_some_and(|g| g.binds_route(&route))
        })
        .await?;

        ctx.controller
            .apply(http_route("route-o", "gw-o2", &["foo.com"]));
        ctx.eventually("route-o moved to gw-o2", || {
            ctx.graph("gw-o1").is_some_and(|g| !g.binds_route(&route))
                && ctx.graph("gw-o2").is_some_and(|g| g.binds_route(&route))
        })
        .await?;

        ctx.controller.delete(route_key("route-o"));
        ctx.eventually("route-o unbound everywhere", || {
            ["gw-o1", "gw-o2"]
                .iter()
                .all(|gw| ctx.graph(gw).is_some_and(|g| !g.binds_route(&route)))
        })
        .await?;
        ensure(
            ctx.controller.index().gateways_for_route(&route).is_empty(),
            "index still tracks the deleted route",
        )
    }
}

/// Failed status deliveries for objects that never change again are redelivered
pub struct RetryConvergenceScenario;

#[async_trait::async_trait]
impl TestScenario for RetryConvergenceScenario {
    fn name(&self) -> &str {
        "retry_convergence"
    }

    async fn run(&self, ctx: &TestContext) -> TestResult {
        let class_key = common::WorkKey::gateway_class(CLASS);
        let key = gateway_key("gw-r");
        ctx.sink.fail_next(2);

        ctx.controller.apply(gateway_class(CLASS));
        ctx.controller
            .apply(gateway("gw-r", vec![http_listener("web", 8080)]));
        ctx.eventually("gw-r published", || ctx.graph("gw-r").is_some())
            .await?;
        ctx.settle().await?;

        ctx.eventually("class status redelivered", || {
            ctx.status(&class_key).is_some_and(|r| r.is_accepted())
        })
        .await?;
        ctx.eventually("gw-r status redelivered", || {
            ctx.status(&key).is_some_and(|r| r.is_accepted())
        })
        .await?;
        ctx.eventually("retry tiers drained", || {
            ctx.controller.pending_retries() == 0 && ctx.controller.is_idle()
        })
        .await
    }
}

/// A key past its fast attempts converges from the slow tier
pub struct SlowRetryScenario;

#[async_trait::async_trait]
impl TestScenario for SlowRetryScenario {
    fn name(&self) -> &str {
        "slow_retry"
    }

    fn context(&self) -> TestContext {
        let mut config = test_config();
        config.retry.fast_max_attempts = 0;
        config.retry.slow_interval_secs = 1;
        TestContext::with_config(config)
    }

    async fn run(&self, ctx: &TestContext) -> TestResult {
        ctx.controller.apply(gateway_class(CLASS));
        ctx.controller
            .apply(gateway("gw-w", vec![https_listener("secure", 443, "tls-w")]));

        ctx.eventually("gw-w waiting in the slow tier", || {
            ctx.controller.retry_backlog(WorkerClass::SlowRetry) == 1
        })
        .await?;
        ensure(
            ctx.controller.retry_backlog(WorkerClass::FastRetry) == 0,
            "fast tier should be skipped",
        )?;
        ensure(
            ctx.graph("gw-w").is_some_and(|g| tls_shape(&g) == Some((true, 0))),
            "gw-w should be published without its certificate",
        )?;

        // No event: only the slow tier can pick the Secret up
        ctx.controller.cache().apply(tls_secret("tls-w").into());

        ctx.eventually("gw-w with one certificate", || {
            ctx.graph("gw-w")
                .is_some_and(|g| tls_shape(&g) == Some((true, 1)))
        })
        .await?;
        ctx.eventually("slow tier drained", || ctx.controller.pending_retries() == 0)
            .await
    }
}
