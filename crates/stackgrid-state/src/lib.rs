//! stackgrid-state — embedded state store for StackGrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state for service specs (current and history), config versions,
//! observed instances, and per-service reconciliation status.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{service}:{revision}`, `{config}:{version}`,
//! `{service}:{instance_id}`) enable prefix scans for related records.
//! Numeric key parts are zero-padded so lexical order equals numeric order.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
