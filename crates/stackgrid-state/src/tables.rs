//! redb table definitions for the StackGrid state store.
//!
//! Record tables use `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Composite keys follow the pattern `{parent}:{child}`.

use redb::TableDefinition;

/// Current service spec keyed by `{service}`.
pub const SERVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("services");

/// Every submitted spec keyed by `{service}:{revision}`.
pub const SERVICE_HISTORY: TableDefinition<&str, &[u8]> = TableDefinition::new("service_history");

/// Config versions keyed by `{config}:{version}`.
pub const CONFIGS: TableDefinition<&str, &[u8]> = TableDefinition::new("configs");

/// Highest version ever assigned per config name. Survives pruning.
pub const CONFIG_HEADS: TableDefinition<&str, u64> = TableDefinition::new("config_heads");

/// Reconciliation status keyed by `{service}`.
pub const STATUS: TableDefinition<&str, &[u8]> = TableDefinition::new("status");

/// Last observed instances keyed by `{service}:{instance_id}`.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");
