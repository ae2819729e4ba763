pub mod error;
pub mod stack;

pub use error::StackError;
pub use stack::{ConfigSource, ReconcilerSettings, SecretBinding, ServiceConfig, StackFile};
