//! Config store error types.

use thiserror::Error;

/// Errors that can occur during config store operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config name {0:?}")]
    InvalidName(String),

    #[error("config version not found: {name}@v{version}")]
    NotFound { name: String, version: u64 },

    #[error("state store error: {0}")]
    State(#[from] stackgrid_state::StateError),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
