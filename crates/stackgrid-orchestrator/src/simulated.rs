//! Simulated orchestrator — in-process instance table with scriptable health.
//!
//! Instances come up `Starting` and settle after a configurable number of
//! health polls. Images can be marked as failing (settle `Unhealthy`) or
//! hanging (never leave `Starting`), and transient create/update errors
//! can be injected. Counters record how many instances were mid-update at
//! the same time.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use stackgrid_state::{InstanceHealth, InstanceId, InstanceTemplate, ObservedInstance};

use crate::Orchestrator;
use crate::error::{OrchestratorError, OrchestratorResult};

struct SimInstance {
    observed: ObservedInstance,
    /// Health polls left before the instance settles.
    polls_remaining: u32,
    /// Set by `update`, cleared once the instance settles.
    updating: bool,
}

#[derive(Default)]
struct Inner {
    instances: BTreeMap<InstanceId, SimInstance>,
    next_seq: u64,
    failing_images: HashSet<String>,
    hanging_images: HashSet<String>,
    create_failures: u32,
    update_failures: u32,
    creates: u64,
    updates: u64,
    removes: u64,
    max_concurrent_updates: usize,
}

/// In-memory orchestrator backend.
pub struct SimulatedOrchestrator {
    inner: Mutex<Inner>,
    ready_after_polls: u32,
    op_latency: Duration,
}

impl Default for SimulatedOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedOrchestrator {
    /// Instances become healthy on their second health poll.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            ready_after_polls: 1,
            op_latency: Duration::ZERO,
        }
    }

    /// Number of `Starting` polls before an instance settles.
    pub fn with_ready_after(mut self, polls: u32) -> Self {
        self.ready_after_polls = polls;
        self
    }

    /// Simulated latency of every create/update/remove call.
    pub fn with_op_latency(mut self, latency: Duration) -> Self {
        self.op_latency = latency;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn simulate_latency(&self) {
        if !self.op_latency.is_zero() {
            tokio::time::sleep(self.op_latency).await;
        }
    }

    /// Instances running `image` settle as unhealthy.
    pub fn fail_image(&self, image: &str) {
        self.lock().failing_images.insert(image.to_string());
    }

    /// Instances running `image` never leave `Starting`.
    pub fn hang_image(&self, image: &str) {
        self.lock().hanging_images.insert(image.to_string());
    }

    /// The next `n` create calls fail with a transient error.
    pub fn fail_next_creates(&self, n: u32) {
        self.lock().create_failures = n;
    }

    /// The next `n` update calls fail with a transient error.
    pub fn fail_next_updates(&self, n: u32) {
        self.lock().update_failures = n;
    }

    /// Force the health of an existing instance.
    pub fn set_health(&self, instance: &str, health: InstanceHealth) {
        if let Some(inst) = self.lock().instances.get_mut(instance) {
            inst.observed.health = health;
            inst.polls_remaining = 0;
        }
    }

    /// Pre-populate healthy instances, as if left over from an earlier run.
    pub fn seed(&self, service: &str, template: &InstanceTemplate, count: u32) -> Vec<InstanceId> {
        let mut inner = self.lock();
        (0..count)
            .map(|_| {
                let id = insert_instance(&mut inner, service, template, 0);
                if let Some(inst) = inner.instances.get_mut(&id) {
                    inst.observed.health = InstanceHealth::Healthy;
                }
                id
            })
            .collect()
    }

    /// Current instances of a service, without advancing health.
    pub fn snapshot(&self, service: &str) -> Vec<ObservedInstance> {
        self.lock()
            .instances
            .values()
            .filter(|i| i.observed.service == service)
            .map(|i| i.observed.clone())
            .collect()
    }

    pub fn creates(&self) -> u64 {
        self.lock().creates
    }

    pub fn updates(&self) -> u64 {
        self.lock().updates
    }

    pub fn removes(&self) -> u64 {
        self.lock().removes
    }

    /// Highest number of instances observed mid-update at the same time.
    pub fn max_concurrent_updates(&self) -> usize {
        self.lock().max_concurrent_updates
    }
}

fn insert_instance(
    inner: &mut Inner,
    service: &str,
    template: &InstanceTemplate,
    polls: u32,
) -> InstanceId {
    inner.next_seq += 1;
    let seq = inner.next_seq;
    let id = format!("{service}.{seq:06}");
    inner.instances.insert(
        id.clone(),
        SimInstance {
            observed: ObservedInstance {
                service: service.to_string(),
                id: id.clone(),
                image: template.image.clone(),
                env: template.env.clone(),
                configs: template.configs.clone(),
                networks: template.networks.clone(),
                health: InstanceHealth::Starting,
                started_at: seq,
            },
            polls_remaining: polls,
            updating: false,
        },
    );
    id
}

#[async_trait]
impl Orchestrator for SimulatedOrchestrator {
    async fn create(&self, service: &str, template: &InstanceTemplate) -> OrchestratorResult<InstanceId> {
        self.simulate_latency().await;
        let mut inner = self.lock();
        if inner.create_failures > 0 {
            inner.create_failures -= 1;
            return Err(OrchestratorError::Unavailable("simulated create failure".into()));
        }
        inner.creates += 1;
        let id = insert_instance(&mut inner, service, template, self.ready_after_polls);
        debug!(%service, instance = %id, image = %template.image, "instance created");
        Ok(id)
    }

    async fn update(&self, instance: &str, template: &InstanceTemplate) -> OrchestratorResult<()> {
        self.simulate_latency().await;
        let mut inner = self.lock();
        if inner.update_failures > 0 {
            inner.update_failures -= 1;
            return Err(OrchestratorError::Unavailable("simulated update failure".into()));
        }
        let inst = inner
            .instances
            .get_mut(instance)
            .ok_or_else(|| OrchestratorError::InstanceNotFound(instance.to_string()))?;
        inst.observed.image = template.image.clone();
        inst.observed.env = template.env.clone();
        inst.observed.configs = template.configs.clone();
        inst.observed.networks = template.networks.clone();
        inst.observed.health = InstanceHealth::Starting;
        inst.polls_remaining = self.ready_after_polls;
        inst.updating = true;

        inner.updates += 1;
        let updating = inner.instances.values().filter(|i| i.updating).count();
        inner.max_concurrent_updates = inner.max_concurrent_updates.max(updating);
        debug!(%instance, image = %template.image, "instance updated");
        Ok(())
    }

    async fn remove(&self, instance: &str) -> OrchestratorResult<()> {
        self.simulate_latency().await;
        let mut inner = self.lock();
        if inner.instances.remove(instance).is_some() {
            inner.removes += 1;
            debug!(%instance, "instance removed");
        }
        Ok(())
    }

    async fn query_health(&self, instance: &str) -> OrchestratorResult<InstanceHealth> {
        let mut inner = self.lock();
        let Inner {
            instances,
            failing_images,
            hanging_images,
            ..
        } = &mut *inner;
        let inst = instances
            .get_mut(instance)
            .ok_or_else(|| OrchestratorError::InstanceNotFound(instance.to_string()))?;

        if inst.observed.health == InstanceHealth::Starting {
            if inst.polls_remaining > 0 {
                inst.polls_remaining -= 1;
            } else if !hanging_images.contains(&inst.observed.image) {
                inst.observed.health = if failing_images.contains(&inst.observed.image) {
                    InstanceHealth::Unhealthy
                } else {
                    InstanceHealth::Healthy
                };
                inst.updating = false;
            }
        }
        Ok(inst.observed.health)
    }

    async fn list_instances(&self, service: &str) -> OrchestratorResult<Vec<ObservedInstance>> {
        Ok(self.snapshot(service))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(image: &str) -> InstanceTemplate {
        InstanceTemplate {
            image: image.to_string(),
            env: vec![],
            configs: vec![],
            networks: vec![],
        }
    }

    #[tokio::test]
    async fn created_instances_settle_after_polls() {
        let orch = SimulatedOrchestrator::new().with_ready_after(2);
        let id = orch.create("web", &template("nginx:1")).await.unwrap();

        assert_eq!(id, "web.000001");
        assert_eq!(orch.query_health(&id).await.unwrap(), InstanceHealth::Starting);
        assert_eq!(orch.query_health(&id).await.unwrap(), InstanceHealth::Starting);
        assert_eq!(orch.query_health(&id).await.unwrap(), InstanceHealth::Healthy);
    }

    #[tokio::test]
    async fn failing_and_hanging_images() {
        let orch = SimulatedOrchestrator::new().with_ready_after(0);
        orch.fail_image("bad:1");
        orch.hang_image("slow:1");

        let bad = orch.create("web", &template("bad:1")).await.unwrap();
        let slow = orch.create("web", &template("slow:1")).await.unwrap();

        assert_eq!(orch.query_health(&bad).await.unwrap(), InstanceHealth::Unhealthy);
        for _ in 0..5 {
            assert_eq!(orch.query_health(&slow).await.unwrap(), InstanceHealth::Starting);
        }
    }

    #[tokio::test]
    async fn ids_are_ordered_by_creation() {
        let orch = SimulatedOrchestrator::new();
        let ids = orch.seed("web", &template("nginx:1"), 3);
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);

        let listed = orch.list_instances("web").await.unwrap();
        assert_eq!(listed.len(), 3);
        assert!(listed.iter().all(|i| i.health == InstanceHealth::Healthy));
        assert!(orch.list_instances("api").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_tracks_concurrent_updates() {
        let orch = SimulatedOrchestrator::new().with_ready_after(0);
        let ids = orch.seed("web", &template("nginx:1"), 3);

        orch.update(&ids[0], &template("nginx:2")).await.unwrap();
        orch.update(&ids[1], &template("nginx:2")).await.unwrap();
        assert_eq!(orch.max_concurrent_updates(), 2);

        orch.query_health(&ids[0]).await.unwrap();
        orch.query_health(&ids[1]).await.unwrap();
        orch.update(&ids[2], &template("nginx:2")).await.unwrap();
        assert_eq!(orch.max_concurrent_updates(), 2);
        assert_eq!(orch.updates(), 3);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let orch = SimulatedOrchestrator::new();
        let ids = orch.seed("web", &template("nginx:1"), 1);

        orch.remove(&ids[0]).await.unwrap();
        orch.remove(&ids[0]).await.unwrap();
        assert_eq!(orch.removes(), 1);
        assert!(matches!(
            orch.query_health(&ids[0]).await,
            Err(OrchestratorError::InstanceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn injected_create_failures_are_transient() {
        let orch = SimulatedOrchestrator::new();
        orch.fail_next_creates(1);

        let err = orch.create("web", &template("nginx:1")).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(orch.create("web", &template("nginx:1")).await.is_ok());
    }
}
