//! Controller metrics
//!
//! Per-kind work item timings and results, retry tiers, store size and
//! status deliveries. Rendered on demand by [`gather_controller_metrics`].

use crate::apis::gateway::gateway_index::gateway_index_metrics;
use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

lazy_static! {
    /// Controller metrics registry
    pub static ref CONTROLLER_METRICS_REGISTRY: Registry = Registry::new();

    /// Graph work item processing duration
    static ref WORK_ITEM_DURATION: HistogramVec = {
        let opts = HistogramOpts::new(
            "lbgraph_work_item_duration_seconds",
            "Work item processing duration in seconds",
        );
        let histogram = HistogramVec::new(opts, &["kind"])
            .expect("Failed to create histogram");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(histogram.clone()))
            .expect("Failed to register histogram");
        histogram
    };

    /// Graph work items by result
    static ref WORK_ITEMS_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "lbgraph_work_items_total",
            "Total number of processed work items",
        );
        let counter = IntCounterVec::new(opts, &["kind", "result"])
            .expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Retries scheduled per tier
    static ref RETRIES_TOTAL: IntCounterVec = {
        let opts = Opts::new("lbgraph_retries_total", "Total number of scheduled retries");
        let counter = IntCounterVec::new(opts, &["tier"])
            .expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Models with a published graph
    static ref GRAPH_STORE_MODELS: IntGauge = {
        let gauge = IntGauge::new("lbgraph_graph_store_models", "Models with a published graph")
            .expect("Failed to create gauge");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(gauge.clone()))
            .expect("Failed to register gauge");
        gauge
    };

    /// Status deliveries by result
    static ref STATUS_UPDATES_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "lbgraph_status_updates_total",
            "Total number of status deliveries",
        );
        let counter = IntCounterVec::new(opts, &["kind", "result"])
            .expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };
}

/// Record one processed work item
pub fn record_work_item(kind: &str, duration_secs: f64, result: &str) {
    WORK_ITEM_DURATION
        .with_label_values(&[kind])
        .observe(duration_secs);

    WORK_ITEMS_TOTAL.with_label_values(&[kind, result]).inc();
}

/// Record a retry scheduled on `tier` (`immediate`, `fast`, `slow`)
pub fn record_retry(tier: &str) {
    RETRIES_TOTAL.with_label_values(&[tier]).inc();
}

pub fn set_graph_store_models(models: usize) {
    GRAPH_STORE_MODELS.set(i64::try_from(models).unwrap_or(i64::MAX));
}

pub fn record_status_update(kind: &str, result: &str) {
    STATUS_UPDATES_TOTAL.with_label_values(&[kind, result]).inc();
}

/// Gather controller metrics in text exposition format
///
/// Appends the reverse index counters when an index is registered.
pub fn gather_controller_metrics() -> Result<String, String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = CONTROLLER_METRICS_REGISTRY.gather();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    let mut output =
        String::from_utf8(buffer).map_err(|e| format!("Failed to convert to UTF-8: {}", e))?;
    let index = gateway_index_metrics();
    if !index.is_empty() {
        output.push_str(&index);
        output.push('\n');
    }
    Ok(output)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_work_item_metrics_recorded() {
        record_work_item("Gateway", 0.004, "success");
        record_retry("fast");

        let output = gather_controller_metrics().expect("metrics");
        assert!(
            output.contains("lbgraph_work_items_total"),
            "Work item counter should be exported"
        );
        assert!(output.contains(r#"kind="Gateway""#));
        assert!(output.contains(r#"tier="fast""#));
    }

    #[test]
    fn test_status_and_store_metrics_recorded() {
        record_status_update("HTTPRoute", "error");
        set_graph_store_models(3);

        let output = gather_controller_metrics().expect("metrics");
        assert!(output.contains("lbgraph_status_updates_total"));
        assert!(output.contains("lbgraph_graph_store_models"));
    }
}
