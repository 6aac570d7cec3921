use common::{ModelName, NamespacedName, WorkKey};
use thiserror::Error;

/// How the queue boundary treats a failed work item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Requeue right away without counting an attempt
    Immediate,
    /// Fast-retry tier with exponential backoff, then slow-retry
    Backoff,
    /// Drop after status has been reported
    Terminal,
}

/// lbgraph controller errors
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("{key} failed validation: {reason}")]
    Validation { key: WorkKey, reason: String },

    #[error("{key} waits for unresolved dependency {dependency}")]
    UnresolvedDependency { key: WorkKey, dependency: WorkKey },

    #[error("model {model} is owned by Gateway {existing}, refusing to overwrite it for {incoming}")]
    BuildConflict {
        model: ModelName,
        existing: NamespacedName,
        incoming: NamespacedName,
    },

    #[error("writer section for model {0} is held")]
    StoreContention(ModelName),

    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] kube::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ControllerError {
    pub fn retry_class(&self) -> RetryClass {
        match self {
            ControllerError::StoreContention(_) => RetryClass::Immediate,
            ControllerError::UnresolvedDependency { .. } | ControllerError::Kubernetes(_) => {
                RetryClass::Backoff
            }
            ControllerError::Validation { .. }
            | ControllerError::BuildConflict { .. }
            | ControllerError::Config(_) => RetryClass::Terminal,
        }
    }

    /// Short label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            ControllerError::Validation { .. } => "validation",
            ControllerError::UnresolvedDependency { .. } => "unresolved",
            ControllerError::BuildConflict { .. } => "conflict",
            ControllerError::StoreContention(_) => "contention",
            ControllerError::Kubernetes(_) => "kubernetes",
            ControllerError::Config(_) => "config",
        }
    }
}

pub type Result<T, E = ControllerError> = std::result::Result<T, E>;
