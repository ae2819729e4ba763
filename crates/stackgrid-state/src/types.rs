//! Domain types for the StackGrid state store.
//!
//! These types represent the persisted state of service specs, config
//! versions, observed instances, and per-service reconciliation status.
//! All types are serializable to/from JSON for storage in redb tables.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Name of a service within the stack.
pub type ServiceName = String;

/// Unique identifier for an instance, issued by the orchestrator.
pub type InstanceId = String;

// ── Service spec ───────────────────────────────────────────────────

/// Desired topology of a single service.
///
/// A spec is immutable once submitted. A new deploy for the same name
/// produces a new spec with the next `revision`; the old one stays in
/// the history table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: ServiceName,
    /// Container image reference (e.g. `registry/app:1.4.2`).
    pub image: String,
    /// Desired number of running instances.
    pub replicas: u32,
    /// Environment bindings, in declaration order.
    #[serde(default)]
    pub env: Vec<EnvBinding>,
    /// Config versions mounted into every instance.
    #[serde(default)]
    pub configs: Vec<ConfigRef>,
    /// Networks the instances attach to.
    #[serde(default)]
    pub networks: Vec<String>,
    /// Per-name revision, assigned by the store on deploy.
    #[serde(default)]
    pub revision: u64,
    /// Unix timestamp (seconds) when this revision was recorded.
    #[serde(default)]
    pub created_at: u64,
}

/// A single environment variable binding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvBinding {
    pub key: String,
    pub value: EnvValue,
}

/// Literal value or a reference to a named secret resolved by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnvValue {
    Literal { value: String },
    Secret { name: String },
}

/// Reference to an immutable config version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConfigRef {
    pub name: String,
    pub version: u64,
}

impl ConfigRef {
    pub fn new(name: &str, version: u64) -> Self {
        Self {
            name: name.to_string(),
            version,
        }
    }
}

impl std::fmt::Display for ConfigRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@v{}", self.name, self.version)
    }
}

impl ServiceSpec {
    /// Build the key for the current-spec table.
    pub fn table_key(&self) -> String {
        self.name.clone()
    }

    /// Build the composite key for the history table.
    pub fn history_key(&self) -> String {
        history_key(&self.name, self.revision)
    }

    /// What every instance of this spec should run.
    pub fn template(&self) -> InstanceTemplate {
        InstanceTemplate {
            image: self.image.clone(),
            env: self.env.clone(),
            configs: self.configs.clone(),
            networks: self.networks.clone(),
        }
    }

    /// Attached config refs as an order-independent set.
    pub fn config_set(&self) -> BTreeSet<ConfigRef> {
        self.configs.iter().cloned().collect()
    }
}

/// Composite history key `{name}:{revision}`; zero-padded so keys sort by revision.
pub fn history_key(name: &str, revision: u64) -> String {
    format!("{name}:{revision:020}")
}

/// Runtime parameters handed to the orchestrator for create and update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceTemplate {
    pub image: String,
    pub env: Vec<EnvBinding>,
    pub configs: Vec<ConfigRef>,
    pub networks: Vec<String>,
}

// ── Config version ─────────────────────────────────────────────────

/// One immutable version of a named configuration blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigVersion {
    pub name: String,
    /// Starts at 1 and only ever increases for a given name.
    pub version: u64,
    /// Hex-encoded SHA-256 of `payload`.
    pub content_hash: String,
    pub payload: Vec<u8>,
    pub created_at: u64,
}

impl ConfigVersion {
    /// Build the composite key for the configs table.
    pub fn table_key(&self) -> String {
        config_key(&self.name, self.version)
    }

    pub fn config_ref(&self) -> ConfigRef {
        ConfigRef::new(&self.name, self.version)
    }
}

/// Composite config key `{name}:{version}`; zero-padded so keys sort by version.
pub fn config_key(name: &str, version: u64) -> String {
    format!("{name}:{version:020}")
}

// ── Instances ──────────────────────────────────────────────────────

/// An instance as reported by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservedInstance {
    pub service: ServiceName,
    pub id: InstanceId,
    pub image: String,
    #[serde(default)]
    pub env: Vec<EnvBinding>,
    pub configs: Vec<ConfigRef>,
    #[serde(default)]
    pub networks: Vec<String>,
    pub health: InstanceHealth,
    /// Orchestrator-issued start sequence; lower means older.
    pub started_at: u64,
}

impl ObservedInstance {
    /// Build the composite key for the instances table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.service, self.id)
    }

    /// Whether the instance runs exactly the template of `spec`.
    ///
    /// Env bindings compare in order; configs and networks as sets.
    pub fn matches(&self, spec: &ServiceSpec) -> bool {
        self.image == spec.image
            && self.env == spec.env
            && self.configs.iter().cloned().collect::<BTreeSet<_>>() == spec.config_set()
            && self.networks.iter().collect::<BTreeSet<_>>()
                == spec.networks.iter().collect::<BTreeSet<_>>()
    }

    pub fn is_live(&self) -> bool {
        self.health != InstanceHealth::Terminated
    }
}

/// Health of an instance as reported by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceHealth {
    Starting,
    Healthy,
    Unhealthy,
    Terminated,
}

// ── Status ─────────────────────────────────────────────────────────

/// Reconciliation phase of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ServicePhase {
    /// Nothing in flight. Also the state after a successful pass.
    Idle,
    Planning,
    Updating,
    HealthGating,
    RollingBack,
    /// Idle after a failed forward update; waits for the next deploy.
    UpdateFailed { reason: String },
}

/// Operator-facing status of a service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceStatus {
    pub name: ServiceName,
    pub phase: ServicePhase,
    /// 1-based index of the update batch being applied; 0 when no batch is active.
    pub current_batch: u32,
    pub healthy_count: u32,
    pub desired_count: u32,
    /// Revision the latest pass is driving toward.
    pub revision: u64,
    /// Most recent revision observed fully converged.
    pub last_converged_revision: Option<u64>,
    pub last_error: Option<String>,
    pub updated_at: u64,
}

impl ServiceStatus {
    /// Fresh status for a service that has never been reconciled.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            phase: ServicePhase::Idle,
            current_batch: 0,
            healthy_count: 0,
            desired_count: 0,
            revision: 0,
            last_converged_revision: None,
            last_error: None,
            updated_at: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(image: &str, configs: Vec<ConfigRef>) -> ServiceSpec {
        ServiceSpec {
            name: "proxy".to_string(),
            image: image.to_string(),
            replicas: 2,
            env: vec![],
            configs,
            networks: vec![],
            revision: 1,
            created_at: 0,
        }
    }

    fn instance(image: &str, configs: Vec<ConfigRef>) -> ObservedInstance {
        ObservedInstance {
            service: "proxy".to_string(),
            id: "proxy.000001".to_string(),
            image: image.to_string(),
            env: vec![],
            configs,
            networks: vec![],
            health: InstanceHealth::Healthy,
            started_at: 1,
        }
    }

    #[test]
    fn history_keys_sort_by_revision() {
        assert!(history_key("web", 9) < history_key("web", 10));
        assert!(config_key("rules", 2) < config_key("rules", 11));
    }

    #[test]
    fn matches_ignores_config_order() {
        let a = ConfigRef::new("a", 1);
        let b = ConfigRef::new("b", 3);
        let s = spec("nginx:1", vec![a.clone(), b.clone()]);
        assert!(instance("nginx:1", vec![b, a]).matches(&s));
    }

    #[test]
    fn matches_detects_stale_bindings() {
        let s = spec("nginx:2", vec![ConfigRef::new("a", 2)]);
        assert!(!instance("nginx:1", vec![ConfigRef::new("a", 2)]).matches(&s));
        assert!(!instance("nginx:2", vec![ConfigRef::new("a", 1)]).matches(&s));
    }

    #[test]
    fn matches_detects_env_and_network_drift() {
        let mut s = spec("nginx:1", vec![]);
        s.networks = vec!["frontend".to_string(), "backend".to_string()];
        let mut inst = instance("nginx:1", vec![]);
        inst.networks = vec!["backend".to_string(), "frontend".to_string()];
        assert!(inst.matches(&s));

        s.env = vec![EnvBinding {
            key: "LOG_LEVEL".to_string(),
            value: EnvValue::Literal {
                value: "debug".to_string(),
            },
        }];
        assert!(!inst.matches(&s));

        inst.env = s.env.clone();
        inst.networks = vec!["frontend".to_string()];
        assert!(!inst.matches(&s));
    }

    #[test]
    fn phase_serializes_with_state_tag() {
        let json = serde_json::to_value(ServicePhase::UpdateFailed {
            reason: "health gate timed out".to_string(),
        })
        .unwrap();
        assert_eq!(json["state"], "update_failed");
        assert_eq!(json["reason"], "health gate timed out");
    }

    #[test]
    fn env_value_tagged() {
        let binding = EnvBinding {
            key: "DB_PASSWORD".to_string(),
            value: EnvValue::Secret {
                name: "db-pass".to_string(),
            },
        };
        let json = serde_json::to_string(&binding).unwrap();
        let back: EnvBinding = serde_json::from_str(&json).unwrap();
        assert_eq!(back, binding);
    }
}
