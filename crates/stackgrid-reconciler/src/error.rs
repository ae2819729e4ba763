//! Reconciler error types.

use thiserror::Error;

/// Errors returned to deploy / config / status callers.
///
/// Failures inside a running pass never surface here; they land in the
/// service status as `UpdateFailed` with `last_error` set.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("invalid service spec: {0}")]
    Validation(#[from] stackgrid_rollout::ValidationError),

    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error(transparent)]
    Config(#[from] stackgrid_config::ConfigError),

    #[error("state store error: {0}")]
    State(#[from] stackgrid_state::StateError),

    #[error(transparent)]
    Orchestrator(#[from] stackgrid_orchestrator::OrchestratorError),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
