//! stackgrid-config — versioned configuration blobs.
//!
//! Configs (proxy rules, TLS bundles, env templates) are stored as
//! immutable `(name, version)` records keyed by content hash. Submitting a
//! payload whose hash already exists for that name returns the existing
//! version instead of creating a new one.
//!
//! Version numbers are assigned under a single lock owned by the
//! `ConfigStore`; the record and the per-name head are written in one
//! state-store transaction.

pub mod error;
pub mod store;

pub use error::{ConfigError, ConfigResult};
pub use store::{ConfigCatalog, ConfigStore, content_hash};
