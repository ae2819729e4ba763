//! stack.toml parser.
//!
//! ```toml
//! [reconciler]
//! max_parallel_updates = 2
//!
//! [[service]]
//! name = "proxy"
//! image = "traefik:2.10"
//! replicas = 2
//! configs = ["proxy-rules"]
//! networks = ["frontend"]
//! secrets = [{ env = "ACME_TOKEN", secret = "acme-token" }]
//!
//! [service.env]
//! LOG_LEVEL = "info"
//!
//! [config.proxy-rules]
//! file = "proxy/rules.toml"
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StackError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackFile {
    /// Optional stack name, used in logs only.
    pub name: Option<String>,
    #[serde(default, rename = "service")]
    pub services: Vec<ServiceConfig>,
    /// Named config blobs, keyed by config name.
    #[serde(default, rename = "config")]
    pub configs: BTreeMap<String, ConfigSource>,
    #[serde(default)]
    pub reconciler: ReconcilerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub image: String,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    /// Literal environment values.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Environment values resolved from named secrets by the orchestrator.
    #[serde(default)]
    pub secrets: Vec<SecretBinding>,
    /// Names of `[config.*]` entries to mount; pinned to their current version on deploy.
    #[serde(default)]
    pub configs: Vec<String>,
    #[serde(default)]
    pub networks: Vec<String>,
}

fn default_replicas() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretBinding {
    /// Environment variable name inside the instance.
    pub env: String,
    /// Secret name known to the orchestrator.
    pub secret: String,
}

/// Where a config payload comes from. Exactly one field must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigSource {
    /// Path to the payload, relative to the stack file.
    pub file: Option<PathBuf>,
    /// Inline payload.
    pub content: Option<String>,
}

/// Optional `[reconciler]` overrides. Unset fields keep the built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerSettings {
    pub max_parallel_updates: Option<u32>,
    pub health_timeout_secs: Option<u64>,
    pub poll_interval_secs: Option<u64>,
    pub healthy_threshold: Option<u32>,
    pub unhealthy_threshold: Option<u32>,
    pub retry_max_attempts: Option<u32>,
    pub retry_initial_backoff_ms: Option<u64>,
    pub retry_max_backoff_ms: Option<u64>,
}

impl StackFile {
    pub fn from_file(path: &Path) -> Result<Self, StackError> {
        let content = std::fs::read_to_string(path).map_err(|source| StackError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, StackError> {
        Ok(toml::from_str(content)?)
    }

    /// Structural problems that can be found without touching the store.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        let mut names = HashSet::new();
        for svc in &self.services {
            if !names.insert(svc.name.as_str()) {
                problems.push(format!("service {:?} declared more than once", svc.name));
            }
            if svc.image.trim().is_empty() {
                problems.push(format!("service {:?}: image must not be empty", svc.name));
            }
            for config in &svc.configs {
                if !self.configs.contains_key(config) {
                    problems.push(format!(
                        "service {:?}: config {config:?} is not declared under [config]",
                        svc.name
                    ));
                }
            }
            for secret in &svc.secrets {
                if svc.env.contains_key(&secret.env) {
                    problems.push(format!(
                        "service {:?}: {} is set both as env and as secret",
                        svc.name, secret.env
                    ));
                }
            }
        }

        for (name, source) in &self.configs {
            match (&source.file, &source.content) {
                (Some(_), Some(_)) => {
                    problems.push(format!("config {name:?}: set either file or content, not both"))
                }
                (None, None) => problems.push(format!("config {name:?}: needs file or content")),
                _ => {}
            }
        }

        if self.reconciler.max_parallel_updates == Some(0) {
            problems.push("reconciler.max_parallel_updates must be at least 1".to_string());
        }

        problems
    }

    pub fn validate(&self) -> Result<(), StackError> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(StackError::Invalid(problems))
        }
    }
}

impl ConfigSource {
    /// Load the payload; `base_dir` is the directory of the stack file.
    pub fn load(&self, name: &str, base_dir: &Path) -> Result<Vec<u8>, StackError> {
        match (&self.file, &self.content) {
            (Some(file), None) => {
                let path = base_dir.join(file);
                std::fs::read(&path).map_err(|source| StackError::Io { path, source })
            }
            (None, Some(content)) => Ok(content.as_bytes().to_vec()),
            _ => Err(StackError::ConfigSource {
                name: name.to_string(),
                reason: "exactly one of file or content must be set".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STACK: &str = r#"
name = "edge"

[reconciler]
max_parallel_updates = 2
health_timeout_secs = 45

[[service]]
name = "proxy"
image = "traefik:2.10"
replicas = 2
configs = ["proxy-rules"]
networks = ["frontend"]
secrets = [{ env = "ACME_TOKEN", secret = "acme-token" }]

[service.env]
LOG_LEVEL = "info"

[[service]]
name = "web"
image = "nginx:1.27"

[config.proxy-rules]
content = "route / -> web"
"#;

    #[test]
    fn parses_services_configs_and_settings() {
        let stack = StackFile::parse(STACK).unwrap();

        assert_eq!(stack.name.as_deref(), Some("edge"));
        assert_eq!(stack.services.len(), 2);
        let proxy = &stack.services[0];
        assert_eq!(proxy.replicas, 2);
        assert_eq!(proxy.env.get("LOG_LEVEL").map(String::as_str), Some("info"));
        assert_eq!(
            proxy.secrets,
            vec![SecretBinding {
                env: "ACME_TOKEN".to_string(),
                secret: "acme-token".to_string()
            }]
        );
        assert_eq!(stack.services[1].replicas, 1);
        assert_eq!(stack.reconciler.max_parallel_updates, Some(2));
        assert_eq!(stack.reconciler.poll_interval_secs, None);
        assert!(stack.problems().is_empty());
    }

    #[test]
    fn empty_file_is_an_empty_stack() {
        let stack = StackFile::parse("").unwrap();
        assert!(stack.services.is_empty());
        assert_eq!(stack.reconciler, ReconcilerSettings::default());
    }

    #[test]
    fn reports_every_problem() {
        let stack = StackFile::parse(
            r#"
[[service]]
name = "web"
image = ""
configs = ["missing"]
env = { TOKEN = "x" }
secrets = [{ env = "TOKEN", secret = "t" }]

[[service]]
name = "web"
image = "nginx:1"

[config.both]
file = "a.txt"
content = "b"
"#,
        )
        .unwrap();

        let problems = stack.problems();
        assert_eq!(problems.len(), 5, "{problems:?}");
        assert!(matches!(stack.validate(), Err(StackError::Invalid(p)) if p.len() == 5));
    }

    #[test]
    fn loads_config_payload_relative_to_stack_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rules.conf"), b"route / -> web").unwrap();

        let source = ConfigSource {
            file: Some(PathBuf::from("rules.conf")),
            content: None,
        };
        assert_eq!(source.load("rules", dir.path()).unwrap(), b"route / -> web");

        let missing = ConfigSource {
            file: Some(PathBuf::from("nope.conf")),
            content: None,
        };
        assert!(matches!(
            missing.load("rules", dir.path()),
            Err(StackError::Io { .. })
        ));
    }

    #[test]
    fn from_file_reads_and_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.toml");
        std::fs::write(&path, STACK).unwrap();

        let stack = StackFile::from_file(&path).unwrap();
        assert_eq!(stack.configs.len(), 1);
        assert!(stack.configs.contains_key("proxy-rules"));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            StackFile::parse("[[service]\nname = 1"),
            Err(StackError::Parse(_))
        ));
    }
}
