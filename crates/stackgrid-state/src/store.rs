//! StateStore — redb-backed state persistence for StackGrid.
//!
//! Provides typed operations over service specs, config versions,
//! observed instances, and reconciliation status. All record values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).
//!
//! Appends that must be atomic (revision assignment, config version
//! insertion) run inside a single redb write transaction; redb admits one
//! writer at a time.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(SERVICES).map_err(map_err!(Table))?;
        txn.open_table(SERVICE_HISTORY).map_err(map_err!(Table))?;
        txn.open_table(CONFIGS).map_err(map_err!(Table))?;
        txn.open_table(CONFIG_HEADS).map_err(map_err!(Table))?;
        txn.open_table(STATUS).map_err(map_err!(Table))?;
        txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn get_record<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn put_record<T: Serialize>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
        record: &T,
    ) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Scan a table, keeping records whose key starts with `prefix` (all when empty).
    fn scan_prefix<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        prefix: &str,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let record = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(record);
            }
        }
        Ok(results)
    }

    // ── Services ───────────────────────────────────────────────────

    /// Record a newly submitted spec.
    ///
    /// Assigns the next revision for the service name, stamps `created_at`,
    /// makes it the current spec, and appends it to the history. Both
    /// writes share one transaction.
    pub fn record_deploy(&self, mut spec: ServiceSpec, now: u64) -> StateResult<ServiceSpec> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut current = txn.open_table(SERVICES).map_err(map_err!(Table))?;
            let previous_revision = match current.get(spec.name.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    let prev: ServiceSpec =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    prev.revision
                }
                None => 0,
            };
            spec.revision = previous_revision + 1;
            spec.created_at = now;

            let value = serde_json::to_vec(&spec).map_err(map_err!(Serialize))?;
            current
                .insert(spec.table_key().as_str(), value.as_slice())
                .map_err(map_err!(Write))?;

            let mut history = txn.open_table(SERVICE_HISTORY).map_err(map_err!(Table))?;
            history
                .insert(spec.history_key().as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(service = %spec.name, revision = spec.revision, "service spec recorded");
        Ok(spec)
    }

    /// Get the current spec for a service.
    pub fn get_service(&self, name: &str) -> StateResult<Option<ServiceSpec>> {
        self.get_record(SERVICES, name)
    }

    /// List the current spec of every service.
    pub fn list_services(&self) -> StateResult<Vec<ServiceSpec>> {
        self.scan_prefix(SERVICES, "")
    }

    /// All recorded revisions of a service, oldest first.
    pub fn service_history(&self, name: &str) -> StateResult<Vec<ServiceSpec>> {
        self.scan_prefix(SERVICE_HISTORY, &format!("{name}:"))
    }

    /// Get one specific revision of a service.
    pub fn get_service_revision(&self, name: &str, revision: u64) -> StateResult<Option<ServiceSpec>> {
        self.get_record(SERVICE_HISTORY, &history_key(name, revision))
    }

    // ── Config versions ────────────────────────────────────────────

    /// Append a config version. Fails if `(name, version)` already exists.
    ///
    /// Also advances the per-name head so the version is never reissued,
    /// even after the record itself is pruned.
    pub fn insert_config_version(&self, config: &ConfigVersion) -> StateResult<()> {
        let key = config.table_key();
        let value = serde_json::to_vec(config).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut configs = txn.open_table(CONFIGS).map_err(map_err!(Table))?;
            if configs.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(key));
            }
            configs
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;

            let mut heads = txn.open_table(CONFIG_HEADS).map_err(map_err!(Table))?;
            let head = heads
                .get(config.name.as_str())
                .map_err(map_err!(Read))?
                .map(|g| g.value())
                .unwrap_or(0);
            heads
                .insert(config.name.as_str(), head.max(config.version))
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "config version stored");
        Ok(())
    }

    /// Highest version ever assigned for a config name.
    pub fn config_head(&self, name: &str) -> StateResult<Option<u64>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CONFIG_HEADS).map_err(map_err!(Table))?;
        Ok(table.get(name).map_err(map_err!(Read))?.map(|g| g.value()))
    }

    /// Get a config version.
    pub fn get_config_version(&self, name: &str, version: u64) -> StateResult<Option<ConfigVersion>> {
        self.get_record(CONFIGS, &config_key(name, version))
    }

    /// Stored versions of one config, ascending.
    pub fn list_config_versions(&self, name: &str) -> StateResult<Vec<ConfigVersion>> {
        self.scan_prefix(CONFIGS, &format!("{name}:"))
    }

    /// Every stored config version across all names.
    pub fn list_all_config_versions(&self) -> StateResult<Vec<ConfigVersion>> {
        self.scan_prefix(CONFIGS, "")
    }

    /// Delete a config version. Returns true if it existed.
    pub fn delete_config_version(&self, name: &str, version: u64) -> StateResult<bool> {
        let key = config_key(name, version);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(CONFIGS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "config version deleted");
        Ok(existed)
    }

    // ── Status ─────────────────────────────────────────────────────

    /// Insert or update the status of a service.
    pub fn put_status(&self, status: &ServiceStatus) -> StateResult<()> {
        self.put_record(STATUS, &status.name, status)
    }

    pub fn get_status(&self, name: &str) -> StateResult<Option<ServiceStatus>> {
        self.get_record(STATUS, name)
    }

    pub fn list_statuses(&self) -> StateResult<Vec<ServiceStatus>> {
        self.scan_prefix(STATUS, "")
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Replace the recorded instances of a service with a fresh observation.
    pub fn replace_instances(&self, service: &str, instances: &[ObservedInstance]) -> StateResult<()> {
        let prefix = format!("{service}:");
        // Collect keys in a read transaction first.
        let stale: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            table
                .iter()
                .map_err(map_err!(Read))?
                .filter_map(|entry| {
                    let (key, _) = entry.ok()?;
                    let k = key.value().to_string();
                    k.starts_with(&prefix).then_some(k)
                })
                .collect()
        };

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            for key in &stale {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            for inst in instances.iter().filter(|i| i.service == service) {
                let value = serde_json::to_vec(inst).map_err(map_err!(Serialize))?;
                table
                    .insert(inst.table_key().as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Last recorded instances of a service.
    pub fn list_instances(&self, service: &str) -> StateResult<Vec<ObservedInstance>> {
        self.scan_prefix(INSTANCES, &format!("{service}:"))
    }
}
