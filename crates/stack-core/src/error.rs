//! Stack file errors.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StackError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse stack file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config {name}: {reason}")]
    ConfigSource { name: String, reason: String },

    #[error("invalid stack file:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}
