//! ConfigStore — append-only, content-addressed config versions.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use stackgrid_state::{ConfigRef, ConfigVersion, StateStore};

use crate::error::{ConfigError, ConfigResult};

/// Read-only view used to check that referenced config versions exist.
pub trait ConfigCatalog {
    fn contains(&self, config: &ConfigRef) -> ConfigResult<bool>;
}

impl ConfigCatalog for BTreeSet<ConfigRef> {
    fn contains(&self, config: &ConfigRef) -> ConfigResult<bool> {
        Ok(BTreeSet::contains(self, config))
    }
}

/// Hex-encoded SHA-256 of a payload.
pub fn content_hash(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Versioned config storage.
///
/// Cheap to clone; clones share the version counters and the underlying
/// state store.
#[derive(Clone)]
pub struct ConfigStore {
    state: StateStore,
    /// Latest assigned version per name, lazily loaded from the store.
    /// The lock is the single serialization point for version assignment.
    heads: Arc<Mutex<HashMap<String, u64>>>,
}

impl ConfigStore {
    pub fn new(state: StateStore) -> Self {
        Self {
            state,
            heads: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock_heads(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        // Entries are only written after the store commit succeeds.
        self.heads.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store a payload under `name`.
    ///
    /// If a version with the same content hash already exists for `name`,
    /// that version is returned unchanged. Otherwise the next version
    /// number is assigned and the payload is appended.
    pub fn put(&self, name: &str, payload: &[u8]) -> ConfigResult<ConfigVersion> {
        validate_name(name)?;
        let hash = content_hash(payload);

        let mut heads = self.lock_heads();

        if let Some(existing) = self
            .state
            .list_config_versions(name)?
            .into_iter()
            .find(|v| v.content_hash == hash)
        {
            debug!(config = %name, version = existing.version, "identical payload, reusing version");
            return Ok(existing);
        }

        let head = match heads.get(name) {
            Some(v) => *v,
            None => self.state.config_head(name)?.unwrap_or(0),
        };

        let config = ConfigVersion {
            name: name.to_string(),
            version: head + 1,
            content_hash: hash,
            payload: payload.to_vec(),
            created_at: epoch_secs(),
        };
        self.state.insert_config_version(&config)?;
        heads.insert(name.to_string(), config.version);

        info!(
            config = %name,
            version = config.version,
            bytes = config.payload.len(),
            "config version created"
        );
        Ok(config)
    }

    /// Payload of a specific version.
    pub fn get(&self, name: &str, version: u64) -> ConfigResult<Vec<u8>> {
        Ok(self.get_version(name, version)?.payload)
    }

    /// Full record of a specific version.
    pub fn get_version(&self, name: &str, version: u64) -> ConfigResult<ConfigVersion> {
        self.state
            .get_config_version(name, version)?
            .ok_or_else(|| ConfigError::NotFound {
                name: name.to_string(),
                version,
            })
    }

    /// Newest stored version of a config, if any.
    pub fn latest(&self, name: &str) -> ConfigResult<Option<ConfigVersion>> {
        Ok(self.state.list_config_versions(name)?.pop())
    }

    /// Stored versions of a config, ascending.
    pub fn list_versions(&self, name: &str) -> ConfigResult<Vec<ConfigVersion>> {
        Ok(self.state.list_config_versions(name)?)
    }

    /// Versions not present in `active`, ascending by name then version.
    pub fn list_unreferenced(&self, active: &HashSet<ConfigRef>) -> ConfigResult<Vec<ConfigVersion>> {
        Ok(self
            .state
            .list_all_config_versions()?
            .into_iter()
            .filter(|v| !active.contains(&v.config_ref()))
            .collect())
    }

    /// Delete unreferenced versions and return them.
    ///
    /// The newest version of each name is always kept: a config uploaded
    /// ahead of the deploy that will reference it must not be collected.
    pub fn prune(&self, active: &HashSet<ConfigRef>) -> ConfigResult<Vec<ConfigVersion>> {
        let _heads = self.lock_heads();

        let mut newest: HashMap<String, u64> = HashMap::new();
        for v in self.state.list_all_config_versions()? {
            let entry = newest.entry(v.name.clone()).or_insert(0);
            *entry = (*entry).max(v.version);
        }

        let mut removed = Vec::new();
        for v in self.list_unreferenced(active)? {
            if newest.get(&v.name) == Some(&v.version) {
                continue;
            }
            if self.state.delete_config_version(&v.name, v.version)? {
                removed.push(v);
            }
        }

        if !removed.is_empty() {
            info!(removed = removed.len(), "pruned unreferenced config versions");
        }
        Ok(removed)
    }
}

impl ConfigCatalog for ConfigStore {
    fn contains(&self, config: &ConfigRef) -> ConfigResult<bool> {
        Ok(self
            .state
            .get_config_version(&config.name, config.version)?
            .is_some())
    }
}

fn validate_name(name: &str) -> ConfigResult<()> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidName(name.to_string()))
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> ConfigStore {
        ConfigStore::new(StateStore::open_in_memory().unwrap())
    }

    #[test]
    fn put_assigns_sequential_versions() {
        let store = test_store();
        let v1 = store.put("proxy-rules", b"route / -> web").unwrap();
        let v2 = store.put("proxy-rules", b"route / -> web-v2").unwrap();
        let other = store.put("tls", b"cert").unwrap();

        assert_eq!(v1.version, 1);
        assert_eq!(v2.version, 2);
        assert_eq!(other.version, 1);
        assert_eq!(v1.content_hash, content_hash(b"route / -> web"));
    }

    #[test]
    fn put_identical_payload_is_idempotent() {
        let store = test_store();
        let first = store.put("proxy-rules", b"same").unwrap();
        store.put("proxy-rules", b"different").unwrap();
        let again = store.put("proxy-rules", b"same").unwrap();

        assert_eq!(again, first);
        assert_eq!(store.list_versions("proxy-rules").unwrap().len(), 2);
    }

    #[test]
    fn same_payload_under_different_names_gets_separate_versions() {
        let store = test_store();
        let a = store.put("a", b"payload").unwrap();
        let b = store.put("b", b"payload").unwrap();
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(store.get("b", b.version).unwrap(), b"payload");
    }

    #[test]
    fn get_missing_version_is_not_found() {
        let store = test_store();
        store.put("rules", b"x").unwrap();
        let err = store.get("rules", 7).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { version: 7, .. }));
    }

    #[test]
    fn invalid_names_are_rejected() {
        let store = test_store();
        assert!(matches!(store.put("", b"x"), Err(ConfigError::InvalidName(_))));
        assert!(matches!(store.put("a:b", b"x"), Err(ConfigError::InvalidName(_))));
    }

    #[test]
    fn list_unreferenced_excludes_active_refs() {
        let store = test_store();
        store.put("rules", b"1").unwrap();
        store.put("rules", b"2").unwrap();
        store.put("tls", b"cert").unwrap();

        let active: HashSet<_> = [ConfigRef::new("rules", 2)].into_iter().collect();
        let unreferenced: Vec<_> = store
            .list_unreferenced(&active)
            .unwrap()
            .iter()
            .map(|v| v.config_ref())
            .collect();

        assert_eq!(
            unreferenced,
            vec![ConfigRef::new("rules", 1), ConfigRef::new("tls", 1)]
        );
    }

    #[test]
    fn prune_keeps_newest_version_and_never_reuses_numbers() {
        let store = test_store();
        store.put("rules", b"1").unwrap();
        store.put("rules", b"2").unwrap();
        store.put("rules", b"3").unwrap();

        let active: HashSet<_> = [ConfigRef::new("rules", 2)].into_iter().collect();
        let removed = store.prune(&active).unwrap();

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].version, 1);
        assert!(store.contains(&ConfigRef::new("rules", 3)).unwrap());

        // Re-uploading the pruned payload gets a fresh number.
        let again = store.put("rules", b"1").unwrap();
        assert_eq!(again.version, 4);
    }

    #[test]
    fn version_counter_reloads_from_state() {
        let state = StateStore::open_in_memory().unwrap();
        ConfigStore::new(state.clone()).put("rules", b"1").unwrap();

        let fresh = ConfigStore::new(state);
        assert_eq!(fresh.put("rules", b"2").unwrap().version, 2);
        assert_eq!(fresh.latest("rules").unwrap().unwrap().version, 2);
    }

    #[test]
    fn concurrent_puts_get_unique_versions() {
        let store = test_store();

        std::thread::scope(|scope| {
            for i in 0..8 {
                let store = store.clone();
                scope.spawn(move || {
                    store.put("rules", format!("payload-{i}").as_bytes()).unwrap();
                });
            }
        });

        let versions: Vec<u64> = store
            .list_versions("rules")
            .unwrap()
            .iter()
            .map(|v| v.version)
            .collect();
        assert_eq!(versions, (1..=8).collect::<Vec<_>>());
    }

    #[test]
    fn catalog_checks_existence() {
        let store = test_store();
        let v = store.put("rules", b"x").unwrap();
        assert!(store.contains(&v.config_ref()).unwrap());
        assert!(!store.contains(&ConfigRef::new("rules", 2)).unwrap());
    }
}
