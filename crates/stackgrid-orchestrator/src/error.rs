//! Orchestrator error types.

use thiserror::Error;

/// Errors returned by an orchestrator backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrchestratorError {
    /// Transient failure (backend unreachable, overloaded). Retryable.
    #[error("orchestrator unavailable: {0}")]
    Unavailable(String),

    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    /// The backend refused the request (bad image, invalid network).
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl OrchestratorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, OrchestratorError::Unavailable(_))
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
