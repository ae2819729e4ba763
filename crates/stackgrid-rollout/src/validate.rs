//! Service spec validation.

use std::collections::HashSet;

use thiserror::Error;

use stackgrid_config::{ConfigCatalog, ConfigError};
use stackgrid_state::{ConfigRef, ServiceSpec};

/// Reasons a spec is rejected before any action is taken.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("service name must not be empty")]
    EmptyName,

    #[error("invalid service name {0:?}: expected lowercase letters, digits and '-'")]
    InvalidName(String),

    #[error("service {0}: image must not be empty")]
    EmptyImage(String),

    #[error("service {0}: environment key must not be empty")]
    EmptyEnvKey(String),

    #[error("service {service}: duplicate environment key {key}")]
    DuplicateEnvKey { service: String, key: String },

    #[error("service {service}: config {name} attached more than once")]
    DuplicateConfig { service: String, name: String },

    #[error("service {service}: network name must not be empty")]
    EmptyNetwork { service: String },

    #[error("service {service}: config version {config} does not exist")]
    MissingConfig { service: String, config: ConfigRef },

    #[error("config catalog lookup failed: {0}")]
    Catalog(#[from] ConfigError),
}

/// Check a spec for structural errors and dangling config references.
///
/// Replica count needs no check: `u32` cannot be negative.
pub fn validate(spec: &ServiceSpec, catalog: &dyn ConfigCatalog) -> Result<(), ValidationError> {
    validate_service_name(&spec.name)?;

    if spec.image.trim().is_empty() {
        return Err(ValidationError::EmptyImage(spec.name.clone()));
    }

    let mut keys = HashSet::new();
    for binding in &spec.env {
        if binding.key.is_empty() {
            return Err(ValidationError::EmptyEnvKey(spec.name.clone()));
        }
        if !keys.insert(binding.key.as_str()) {
            return Err(ValidationError::DuplicateEnvKey {
                service: spec.name.clone(),
                key: binding.key.clone(),
            });
        }
    }

    if spec.networks.iter().any(|n| n.trim().is_empty()) {
        return Err(ValidationError::EmptyNetwork {
            service: spec.name.clone(),
        });
    }

    let mut names = HashSet::new();
    for config in &spec.configs {
        if !names.insert(config.name.as_str()) {
            return Err(ValidationError::DuplicateConfig {
                service: spec.name.clone(),
                name: config.name.clone(),
            });
        }
        if !catalog.contains(config)? {
            return Err(ValidationError::MissingConfig {
                service: spec.name.clone(),
                config: config.clone(),
            });
        }
    }

    Ok(())
}

/// DNS-label style: 1-63 chars of `[a-z0-9-]`, no leading or trailing dash.
pub fn validate_service_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    let valid = name.len() <= 63
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !name.starts_with('-')
        && !name.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use stackgrid_state::{EnvBinding, EnvValue};

    fn catalog() -> BTreeSet<ConfigRef> {
        [ConfigRef::new("proxy-rules", 1), ConfigRef::new("proxy-rules", 2)]
            .into_iter()
            .collect()
    }

    fn spec() -> ServiceSpec {
        ServiceSpec {
            name: "proxy".to_string(),
            image: "traefik:2.10".to_string(),
            replicas: 2,
            env: vec![EnvBinding {
                key: "LOG_LEVEL".to_string(),
                value: EnvValue::Literal {
                    value: "info".to_string(),
                },
            }],
            configs: vec![ConfigRef::new("proxy-rules", 2)],
            networks: vec!["frontend".to_string()],
            revision: 0,
            created_at: 0,
        }
    }

    #[test]
    fn valid_spec_passes() {
        validate(&spec(), &catalog()).unwrap();
    }

    #[test]
    fn zero_replicas_is_valid() {
        let s = ServiceSpec {
            replicas: 0,
            ..spec()
        };
        validate(&s, &catalog()).unwrap();
    }

    #[test]
    fn empty_image_rejected() {
        let s = ServiceSpec {
            image: " ".to_string(),
            ..spec()
        };
        assert!(matches!(validate(&s, &catalog()), Err(ValidationError::EmptyImage(_))));
    }

    #[test]
    fn missing_config_version_rejected() {
        let s = ServiceSpec {
            configs: vec![ConfigRef::new("proxy-rules", 3)],
            ..spec()
        };
        let err = validate(&s, &catalog()).unwrap_err();
        match err {
            ValidationError::MissingConfig { config, .. } => {
                assert_eq!(config, ConfigRef::new("proxy-rules", 3));
            }
            other => panic!("expected MissingConfig, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_env_key_rejected() {
        let mut s = spec();
        s.env.push(s.env[0].clone());
        assert!(matches!(
            validate(&s, &catalog()),
            Err(ValidationError::DuplicateEnvKey { .. })
        ));
    }

    #[test]
    fn two_versions_of_one_config_rejected() {
        let s = ServiceSpec {
            configs: vec![ConfigRef::new("proxy-rules", 1), ConfigRef::new("proxy-rules", 2)],
            ..spec()
        };
        assert!(matches!(
            validate(&s, &catalog()),
            Err(ValidationError::DuplicateConfig { .. })
        ));
    }

    #[test]
    fn service_names_are_dns_labels() {
        assert!(validate_service_name("web-1").is_ok());
        assert!(matches!(validate_service_name(""), Err(ValidationError::EmptyName)));
        assert!(validate_service_name("Web").is_err());
        assert!(validate_service_name("-web").is_err());
        assert!(validate_service_name("web_1").is_err());
        assert!(validate_service_name(&"a".repeat(64)).is_err());
    }
}
