//! lbgraph Integration Test Framework
//!
//! Drives a real [`control::GatewayController`] in-process: objects go in
//! through `apply`/`delete` exactly as the watchers deliver them, graphs are
//! read back from the store and status from an in-memory sink.
//!
//! ## Architecture
//!
//! - **framework/**: TestContext, polling helpers and object fixtures
//! - **scenarios/**: end-to-end scenarios grouped by concern
//!
//! ## Running Tests
//!
//! ```bash
//! # Run all scenario groups
//! cargo test --test integration_test
//!
//! # Run one group
//! cargo test --test integration_test route_binding
//! ```

// Allow clippy warnings for test code
#![allow(dead_code, clippy::expect_used, clippy::panic, clippy::unwrap_used)]

pub mod framework;
pub mod scenarios;

pub use framework::{TestContext, TestResult};

/// Test scenario trait
///
/// Each scenario runs against a fresh controller.
#[async_trait::async_trait]
pub trait TestScenario: Send + Sync {
    /// Scenario name (for logging)
    fn name(&self) -> &str;

    /// Run the test scenario
    async fn run(&self, ctx: &TestContext) -> TestResult;

    /// Controller overrides for this scenario
    fn context(&self) -> TestContext {
        TestContext::new()
    }
}

/// Run every scenario on its own controller and panic if any failed
pub async fn run_scenarios(scenarios: Vec<Box<dyn TestScenario>>) {
    let mut passed = 0;
    let mut failed = Vec::new();

    for scenario in scenarios {
        println!("🏃 Running scenario: {}", scenario.name());

        let ctx = scenario.context();
        let result = scenario.run(&ctx).await;
        ctx.cleanup().await;

        match result {
            Ok(()) => {
                println!("✅ Scenario passed: {}\n", scenario.name());
                passed += 1;
            }
            Err(e) => {
                eprintln!("❌ Scenario failed: {}", scenario.name());
                eprintln!("   Error: {}\n", e);
                failed.push(scenario.name().to_string());
            }
        }
    }

    println!("📊 Test Summary:");
    println!("   Passed: {}", passed);
    println!("   Failed: {}", failed.len());

    if !failed.is_empty() {
        panic!("{} scenario(s) failed: {:?}", failed.len(), failed);
    }
}
