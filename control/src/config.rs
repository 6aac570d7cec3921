//! Configuration for the lbgraph controller
//!
//! Defaults are usable as-is; every field can be overridden through an
//! `LBGRAPH_*` environment variable (see [`ControllerConfig::from_env`]).

use crate::error::ControllerError;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Controller configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    /// Controller name matched against `GatewayClass.spec.controllerName`
    #[serde(default = "default_controller_name")]
    pub controller_name: String,

    /// Tenant prefix of every model name
    #[serde(default = "default_tenant")]
    pub tenant: String,

    /// Cluster name embedded in parent VS names
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// Worker pool sizes
    #[serde(default)]
    pub workers: WorkerConfig,

    /// Retry tiers
    #[serde(default)]
    pub retry: RetryConfig,

    /// Time a tombstoned model stays visible before it is purged (default: 5s)
    #[serde(default = "default_tombstone_ttl")]
    pub tombstone_ttl_ms: u64,

    /// Grace period per worker class on shutdown (default: 10s)
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// Accept `*.` prefixed HTTPRoute hostnames (default: false)
    #[serde(default = "default_false")]
    pub allow_wildcard_route_hostnames: bool,

    /// Patch status subresources on the API server (default: true)
    #[serde(default = "default_true")]
    pub write_status: bool,
}

/// Worker pool sizes per queue class
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Ingestion workers: raw events to work items (default: 2)
    #[serde(default = "default_ingestion_workers")]
    pub ingestion: usize,

    /// Graph workers: admission and graph builds (default: CPU count, min 2)
    #[serde(default = "default_graph_workers")]
    pub graph: usize,

    /// Status delivery workers (default: 2)
    #[serde(default = "default_status_workers")]
    pub status: usize,
}

fn default_ingestion_workers() -> usize {
    2
}

fn default_graph_workers() -> usize {
    num_cpus::get().max(2)
}

fn default_status_workers() -> usize {
    2
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            ingestion: default_ingestion_workers(),
            graph: default_graph_workers(),
            status: default_status_workers(),
        }
    }
}

/// Fast-retry and slow-retry tiers
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// First fast-retry delay in milliseconds (default: 500ms)
    #[serde(default = "default_fast_initial_delay")]
    pub fast_initial_delay_ms: u64,

    /// Upper bound of the fast-retry delay in milliseconds (default: 30s)
    #[serde(default = "default_fast_max_delay")]
    pub fast_max_delay_ms: u64,

    /// Fast-retry attempts before a key moves to the slow tier (default: 5)
    #[serde(default = "default_fast_max_attempts")]
    pub fast_max_attempts: u32,

    /// Fixed slow-retry interval in seconds (default: 300s)
    #[serde(default = "default_slow_interval")]
    pub slow_interval_secs: u64,
}

fn default_fast_initial_delay() -> u64 {
    500
}

fn default_fast_max_delay() -> u64 {
    30_000
}

fn default_fast_max_attempts() -> u32 {
    5
}

fn default_slow_interval() -> u64 {
    300
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            fast_initial_delay_ms: default_fast_initial_delay(),
            fast_max_delay_ms: default_fast_max_delay(),
            fast_max_attempts: default_fast_max_attempts(),
            slow_interval_secs: default_slow_interval(),
        }
    }
}

impl RetryConfig {
    /// Delay before fast-retry attempt `attempt` (1-based)
    ///
    /// Doubles from the initial delay and saturates at the maximum.
    pub fn fast_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self
            .fast_initial_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.fast_max_delay_ms);
        Duration::from_millis(delay)
    }

    pub fn slow_interval(&self) -> Duration {
        Duration::from_secs(self.slow_interval_secs)
    }
}

fn default_controller_name() -> String {
    "lbgraph.io/gateway-controller".to_string()
}

fn default_tenant() -> String {
    "admin".to_string()
}

fn default_cluster_name() -> String {
    "cluster".to_string()
}

fn default_tombstone_ttl() -> u64 {
    5_000
}

fn default_shutdown_grace() -> u64 {
    10
}

fn default_false() -> bool {
    false
}

fn default_true() -> bool {
    true
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            controller_name: default_controller_name(),
            tenant: default_tenant(),
            cluster_name: default_cluster_name(),
            workers: WorkerConfig::default(),
            retry: RetryConfig::default(),
            tombstone_ttl_ms: default_tombstone_ttl(),
            shutdown_grace_secs: default_shutdown_grace(),
            allow_wildcard_route_hostnames: default_false(),
            write_status: default_true(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // Controller identity
        if let Some(val) = lookup("LBGRAPH_CONTROLLER_NAME") {
            config.controller_name = val;
        }
        if let Some(val) = lookup("LBGRAPH_TENANT") {
            config.tenant = val;
        }
        if let Some(val) = lookup("LBGRAPH_CLUSTER_NAME") {
            config.cluster_name = val;
        }

        // Worker pools
        parse_var(&lookup, "LBGRAPH_INGESTION_WORKERS", &mut config.workers.ingestion)?;
        parse_var(&lookup, "LBGRAPH_GRAPH_WORKERS", &mut config.workers.graph)?;
        parse_var(&lookup, "LBGRAPH_STATUS_WORKERS", &mut config.workers.status)?;

        // Retry tiers
        parse_var(
            &lookup,
            "LBGRAPH_FAST_RETRY_INITIAL_MS",
            &mut config.retry.fast_initial_delay_ms,
        )?;
        parse_var(
            &lookup,
            "LBGRAPH_FAST_RETRY_MAX_MS",
            &mut config.retry.fast_max_delay_ms,
        )?;
        parse_var(
            &lookup,
            "LBGRAPH_FAST_RETRY_ATTEMPTS",
            &mut config.retry.fast_max_attempts,
        )?;
        parse_var(
            &lookup,
            "LBGRAPH_SLOW_RETRY_SECS",
            &mut config.retry.slow_interval_secs,
        )?;

        parse_var(&lookup, "LBGRAPH_TOMBSTONE_TTL_MS", &mut config.tombstone_ttl_ms)?;
        parse_var(
            &lookup,
            "LBGRAPH_SHUTDOWN_GRACE_SECS",
            &mut config.shutdown_grace_secs,
        )?;
        parse_var(
            &lookup,
            "LBGRAPH_ALLOW_WILDCARD_ROUTE_HOSTNAMES",
            &mut config.allow_wildcard_route_hostnames,
        )?;
        parse_var(&lookup, "LBGRAPH_WRITE_STATUS", &mut config.write_status)?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.controller_name.is_empty() {
            return Err(ControllerError::Config(
                "controller name cannot be empty".to_string(),
            ));
        }
        if self.tenant.is_empty() || self.cluster_name.is_empty() {
            return Err(ControllerError::Config(
                "tenant and cluster name are required".to_string(),
            ));
        }
        if self.workers.ingestion == 0 || self.workers.graph == 0 || self.workers.status == 0 {
            return Err(ControllerError::Config(
                "worker pools need at least one worker".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tombstone_ttl(&self) -> Duration {
        Duration::from_millis(self.tombstone_ttl_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn parse_var<F, T>(lookup: &F, name: &str, target: &mut T) -> Result<(), ControllerError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(name) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| ControllerError::Config(format!("{}='{}': {}", name, raw, e)))?;
    }
    Ok(())
}
