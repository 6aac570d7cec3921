//! Core test infrastructure

pub mod fixtures;

use common::{ConfigGraph, ModelName, NamespacedName, WorkKey};
use control::apis::status::{MemoryStatusSink, StatusReport};
use control::graph::Lookup;
use control::{ControllerConfig, GatewayController};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Short delays so retries and purges happen within a test
pub fn test_config() -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.workers.ingestion = 2;
    config.workers.graph = 4;
    config.workers.status = 1;
    config.retry.fast_initial_delay_ms = 10;
    config.retry.fast_max_delay_ms = 50;
    config.retry.fast_max_attempts = 3;
    config.retry.slow_interval_secs = 1;
    config.tombstone_ttl_ms = 200;
    config.shutdown_grace_secs = 2;
    config.write_status = false;
    config
}

/// Test context: a started controller plus its status sink
pub struct TestContext {
    pub controller: GatewayController,
    pub sink: Arc<MemoryStatusSink>,
    pub timeout: Duration,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ControllerConfig) -> Self {
        let sink = Arc::new(MemoryStatusSink::new());
        let controller = GatewayController::new(config, sink.clone());
        controller.start();
        Self {
            controller,
            sink,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Model name of the Gateway `default/<name>`
    pub fn model(&self, gateway: &str) -> ModelName {
        self.controller
            .model_name(&NamespacedName::new(fixtures::NAMESPACE, gateway))
    }

    pub fn lookup(&self, gateway: &str) -> Lookup {
        self.controller.store().lookup(&self.model(gateway))
    }

    /// Published graph of the Gateway `default/<name>`
    pub fn graph(&self, gateway: &str) -> Option<Arc<ConfigGraph>> {
        self.lookup(gateway).graph().cloned()
    }

    /// Last status delivered for `key`
    pub fn status(&self, key: &WorkKey) -> Option<StatusReport> {
        self.sink.get(key)
    }

    /// Poll `check` until it holds or the timeout expires
    pub async fn eventually<F>(&self, what: &str, mut check: F) -> TestResult
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + self.timeout;
        loop {
            if check() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(format!("timed out waiting for {}", what).into());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Wait for every queued item to be processed
    pub async fn settle(&self) -> TestResult {
        if self.controller.settle(self.timeout).await {
            Ok(())
        } else {
            Err("controller did not settle".into())
        }
    }

    /// Hold `check` for `duration`, polling throughout
    pub async fn never<F>(&self, what: &str, duration: Duration, mut check: F) -> TestResult
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            if check() {
                return Err(format!("unexpectedly observed {}", what).into());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        Ok(())
    }

    pub async fn cleanup(&self) {
        self.controller.shutdown().await;
    }
}

/// Fail with `message` unless `condition` holds
pub fn ensure(condition: bool, message: impl Into<String>) -> TestResult {
    if condition {
        return Ok(());
    }
    let message: String = message.into();
    Err(message.into())
}
