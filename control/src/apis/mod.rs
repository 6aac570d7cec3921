//! Kubernetes API integrations
//!
//! Gateway API (v1) admission, status reporting, metrics and the watch
//! adapters that feed the controller.

pub mod gateway;
pub mod metrics;
pub mod status;
pub mod watcher;
