//! Applying a stack file to the reconciler.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info};

use stack_core::{ReconcilerSettings, ServiceConfig, StackFile};
use stackgrid_reconciler::{DeployRequest, Reconciler, ReconcilerConfig};
use stackgrid_rollout::validate_service_name;
use stackgrid_state::{ConfigRef, EnvBinding, EnvValue, ServiceSpec};

/// Overlay the stack's `[reconciler]` settings on the defaults.
pub fn reconciler_config(settings: &ReconcilerSettings) -> ReconcilerConfig {
    let mut config = ReconcilerConfig::default();

    if let Some(n) = settings.max_parallel_updates {
        config.rolling.max_parallel_updates = n;
    }
    if let Some(secs) = settings.health_timeout_secs {
        config.gate.timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = settings.poll_interval_secs {
        config.gate.poll_interval = Duration::from_secs(secs);
    }
    if let Some(n) = settings.healthy_threshold {
        config.gate.healthy_threshold = n;
    }
    if let Some(n) = settings.unhealthy_threshold {
        config.gate.unhealthy_threshold = n;
    }
    if let Some(n) = settings.retry_max_attempts {
        config.retry.max_attempts = n;
    }
    if let Some(ms) = settings.retry_initial_backoff_ms {
        config.retry.initial_backoff_ms = ms;
    }
    if let Some(ms) = settings.retry_max_backoff_ms {
        config.retry.max_backoff_ms = ms;
    }

    config
}

/// Service names the reconciler would reject.
pub fn name_problems(stack: &StackFile) -> Vec<String> {
    stack
        .services
        .iter()
        .filter_map(|svc| {
            validate_service_name(&svc.name)
                .err()
                .map(|e| e.to_string())
        })
        .collect()
}

/// Upload the stack's configs, then deploy every service pinned to the
/// versions just stored.
///
/// Services whose stored spec already matches are left alone.
pub async fn apply(reconciler: &Reconciler, stack: &StackFile, base_dir: &Path) -> anyhow::Result<Vec<ServiceSpec>> {
    stack.validate()?;

    let mut pinned = HashMap::new();
    for (name, source) in &stack.configs {
        let payload = source.load(name, base_dir)?;
        let version = reconciler
            .update_config(name, &payload)
            .with_context(|| format!("failed to store config {name}"))?;
        debug!(config = %name, version = version.version, "config pinned");
        pinned.insert(name.clone(), version.config_ref());
    }

    let mut deployed = Vec::new();
    for svc in &stack.services {
        let request = deploy_request(svc, &pinned)?;

        if let Some(current) = reconciler.state().get_service(&svc.name)?
            && matches_request(&current, &request)
        {
            info!(service = %svc.name, revision = current.revision, "service unchanged");
            continue;
        }

        let spec = reconciler
            .deploy(request)
            .await
            .with_context(|| format!("failed to deploy service {}", svc.name))?;
        deployed.push(spec);
    }

    Ok(deployed)
}

/// Literal env values in key order, then secrets in declaration order.
fn deploy_request(svc: &ServiceConfig, pinned: &HashMap<String, ConfigRef>) -> anyhow::Result<DeployRequest> {
    let mut env: Vec<EnvBinding> = svc
        .env
        .iter()
        .map(|(key, value)| EnvBinding {
            key: key.clone(),
            value: EnvValue::Literal {
                value: value.clone(),
            },
        })
        .collect();
    env.extend(svc.secrets.iter().map(|s| EnvBinding {
        key: s.env.clone(),
        value: EnvValue::Secret {
            name: s.secret.clone(),
        },
    }));

    let configs = svc
        .configs
        .iter()
        .map(|name| {
            pinned
                .get(name)
                .cloned()
                .with_context(|| format!("service {}: config {name} was not uploaded", svc.name))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(DeployRequest {
        name: svc.name.clone(),
        image: svc.image.clone(),
        replicas: svc.replicas,
        env,
        configs,
        networks: svc.networks.clone(),
    })
}

fn matches_request(spec: &ServiceSpec, request: &DeployRequest) -> bool {
    spec.image == request.image
        && spec.replicas == request.replicas
        && spec.env == request.env
        && spec.configs == request.configs
        && spec.networks == request.networks
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use stackgrid_config::ConfigStore;
    use stackgrid_orchestrator::SimulatedOrchestrator;
    use stackgrid_state::{ServicePhase, StateStore};

    const STACK: &str = r#"
name = "edge"

[reconciler]
max_parallel_updates = 2
health_timeout_secs = 10

[[service]]
name = "proxy"
image = "traefik:2.10"
replicas = 2
configs = ["proxy-rules"]
networks = ["frontend"]
secrets = [{ env = "ACME_TOKEN", secret = "acme-token" }]

[service.env]
LOG_LEVEL = "info"
A_FIRST = "1"

[config.proxy-rules]
content = "route / -> web"
"#;

    fn reconciler(orch: Arc<SimulatedOrchestrator>) -> Reconciler {
        let state = StateStore::open_in_memory().unwrap();
        let configs = ConfigStore::new(state.clone());
        Reconciler::new(state, configs, orch, ReconcilerConfig::default())
    }

    #[test]
    fn settings_override_only_what_is_set() {
        let stack = StackFile::parse(STACK).unwrap();
        let config = reconciler_config(&stack.reconciler);

        assert_eq!(config.rolling.max_parallel_updates, 2);
        assert_eq!(config.gate.timeout, Duration::from_secs(10));

        let defaults = ReconcilerConfig::default();
        assert_eq!(config.gate.poll_interval, defaults.gate.poll_interval);
        assert_eq!(config.retry.max_attempts, defaults.retry.max_attempts);
    }

    #[test]
    fn env_literals_sorted_then_secrets() {
        let stack = StackFile::parse(STACK).unwrap();
        let mut pinned = HashMap::new();
        pinned.insert("proxy-rules".to_string(), ConfigRef::new("proxy-rules", 3));

        let req = deploy_request(&stack.services[0], &pinned).unwrap();
        let keys: Vec<&str> = req.env.iter().map(|b| b.key.as_str()).collect();
        assert_eq!(keys, vec!["A_FIRST", "LOG_LEVEL", "ACME_TOKEN"]);
        assert_eq!(
            req.env[2].value,
            EnvValue::Secret {
                name: "acme-token".to_string()
            }
        );
        assert_eq!(req.configs, vec![ConfigRef::new("proxy-rules", 3)]);
    }

    #[test]
    fn unpinned_config_is_an_error() {
        let stack = StackFile::parse(STACK).unwrap();
        assert!(deploy_request(&stack.services[0], &HashMap::new()).is_err());
    }

    #[test]
    fn invalid_service_names_are_reported() {
        let stack = StackFile::parse(
            r#"
[[service]]
name = "Web_1"
image = "nginx:1"

[[service]]
name = "api"
image = "api:1"
"#,
        )
        .unwrap();
        assert_eq!(name_problems(&stack).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn apply_uploads_configs_and_deploys() {
        let orch = Arc::new(SimulatedOrchestrator::new());
        let rec = reconciler(orch.clone());
        let stack = StackFile::parse(STACK).unwrap();

        let deployed = apply(&rec, &stack, Path::new(".")).await.unwrap();
        assert_eq!(deployed.len(), 1);
        assert_eq!(deployed[0].configs, vec![ConfigRef::new("proxy-rules", 1)]);

        rec.wait_settled("proxy").await;
        assert_eq!(rec.status("proxy").unwrap().phase, ServicePhase::Idle);
        assert_eq!(orch.snapshot("proxy").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn file_backed_config_is_read_relative_to_stack() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("proxy")).unwrap();
        std::fs::write(dir.path().join("proxy/rules.conf"), b"route /api -> api").unwrap();

        let stack = StackFile::parse(
            r#"
[[service]]
name = "proxy"
image = "traefik:2.10"
configs = ["proxy-rules"]

[config.proxy-rules]
file = "proxy/rules.conf"
"#,
        )
        .unwrap();

        let rec = reconciler(Arc::new(SimulatedOrchestrator::new()));
        let deployed = apply(&rec, &stack, dir.path()).await.unwrap();

        assert_eq!(deployed[0].configs, vec![ConfigRef::new("proxy-rules", 1)]);
        assert_eq!(
            rec.configs().get("proxy-rules", 1).unwrap(),
            b"route /api -> api".to_vec()
        );

        let missing = apply(&rec, &stack, &dir.path().join("elsewhere")).await;
        assert!(missing.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn reapplying_unchanged_stack_deploys_nothing() {
        let orch = Arc::new(SimulatedOrchestrator::new());
        let rec = reconciler(orch.clone());
        let stack = StackFile::parse(STACK).unwrap();

        apply(&rec, &stack, Path::new(".")).await.unwrap();
        rec.wait_settled("proxy").await;

        let deployed = apply(&rec, &stack, Path::new(".")).await.unwrap();
        assert!(deployed.is_empty());
        assert_eq!(rec.state().service_history("proxy").unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn changed_config_payload_redeploys() {
        let orch = Arc::new(SimulatedOrchestrator::new());
        let rec = reconciler(orch.clone());
        let stack = StackFile::parse(STACK).unwrap();
        apply(&rec, &stack, Path::new(".")).await.unwrap();
        rec.wait_settled("proxy").await;

        let bumped = StackFile::parse(&STACK.replace("route / -> web", "route / -> web-v2")).unwrap();
        let deployed = apply(&rec, &bumped, Path::new(".")).await.unwrap();
        assert_eq!(deployed[0].revision, 2);
        assert_eq!(deployed[0].configs, vec![ConfigRef::new("proxy-rules", 2)]);

        rec.wait_settled("proxy").await;
        for inst in orch.snapshot("proxy") {
            assert_eq!(inst.configs, vec![ConfigRef::new("proxy-rules", 2)]);
        }
    }
}
