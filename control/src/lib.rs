//! lbgraph Control Plane Library
//!
//! Reconciles Gateway API objects into load-balancer configuration graphs.
//! The binary wires [`controller::GatewayController`] to Kubernetes watchers;
//! tests drive it directly with an in-memory status sink.

pub mod apis;
pub mod cache;
pub mod config;
pub mod controller;
pub mod error;
pub mod graph;
pub mod lock;
pub mod queue;

pub use config::ControllerConfig;
pub use controller::{GatewayController, WorkerClass};
pub use error::{ControllerError, RetryClass};
