//! Reconciler — owns one task slot per service name.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use stackgrid_config::ConfigStore;
use stackgrid_health::{GateConfig, HealthGate};
use stackgrid_orchestrator::{Orchestrator, RetryPolicy};
use stackgrid_rollout::{RollingConfig, validate};
use stackgrid_state::{
    ConfigRef, ConfigVersion, EnvBinding, ServicePhase, ServiceSpec, ServiceStatus, StateStore,
};

use crate::error::{ReconcileError, ReconcileResult};
use crate::pass::{PassContext, epoch_secs, run_pass};

/// Tunables for every service task.
#[derive(Debug, Clone, Default)]
pub struct ReconcilerConfig {
    pub rolling: RollingConfig,
    pub gate: GateConfig,
    pub retry: RetryPolicy,
}

/// Desired state for one service, as submitted by a caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeployRequest {
    pub name: String,
    pub image: String,
    pub replicas: u32,
    #[serde(default)]
    pub env: Vec<EnvBinding>,
    #[serde(default)]
    pub configs: Vec<ConfigRef>,
    #[serde(default)]
    pub networks: Vec<String>,
}

impl DeployRequest {
    fn into_spec(self) -> ServiceSpec {
        ServiceSpec {
            name: self.name,
            image: self.image,
            replicas: self.replicas,
            env: self.env,
            configs: self.configs,
            networks: self.networks,
            revision: 0,
            created_at: 0,
        }
    }
}

/// In-flight task for one service.
struct ServiceSlot {
    revision: u64,
    /// Set to `true` to stop the task after its current batch.
    cancel_tx: watch::Sender<bool>,
    /// Closed when the task ends.
    done_rx: watch::Receiver<()>,
    handle: JoinHandle<()>,
}

/// Accepts deploys and runs one reconciliation task per service.
///
/// Cheap to clone; clones share the task slots.
#[derive(Clone)]
pub struct Reconciler {
    ctx: Arc<PassContext>,
    /// Active tasks: service name → slot.
    slots: Arc<Mutex<HashMap<String, ServiceSlot>>>,
}

impl Reconciler {
    pub fn new(
        state: StateStore,
        configs: ConfigStore,
        orchestrator: Arc<dyn Orchestrator>,
        config: ReconcilerConfig,
    ) -> Self {
        let gate = HealthGate::new(orchestrator.clone(), config.gate);
        Self {
            ctx: Arc::new(PassContext {
                state,
                configs,
                orchestrator,
                gate,
                rolling: config.rolling,
                retry: config.retry,
            }),
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn state(&self) -> &StateStore {
        &self.ctx.state
    }

    pub fn configs(&self) -> &ConfigStore {
        &self.ctx.configs
    }

    /// Validate and record a new revision, then start reconciling it.
    ///
    /// Returns as soon as the revision is recorded. Any pass already
    /// running for the same name stops after its current batch; the new
    /// pass starts once it has.
    pub async fn deploy(&self, request: DeployRequest) -> ReconcileResult<ServiceSpec> {
        let spec = request.into_spec();
        validate(&spec, &self.ctx.configs)?;

        // Held until the pass is spawned, so revisions spawn in the order recorded.
        let mut slots = self.slots.lock().await;
        let spec = self.ctx.state.record_deploy(spec, epoch_secs())?;
        info!(
            service = %spec.name,
            revision = spec.revision,
            image = %spec.image,
            replicas = spec.replicas,
            configs = spec.configs.len(),
            "deploy accepted"
        );

        self.spawn_pass(&mut slots, spec.clone());
        Ok(spec)
    }

    /// Replace the slot for `spec.name` unless it already holds a newer revision.
    fn spawn_pass(&self, slots: &mut HashMap<String, ServiceSlot>, spec: ServiceSpec) -> bool {
        if let Some(current) = slots.get(&spec.name)
            && current.revision > spec.revision
        {
            debug!(
                service = %spec.name,
                revision = spec.revision,
                scheduled = current.revision,
                "newer revision already scheduled"
            );
            return false;
        }

        let previous = slots.remove(&spec.name).map(|slot| {
            let _ = slot.cancel_tx.send(true);
            debug!(
                service = %spec.name,
                superseded = slot.revision,
                revision = spec.revision,
                "cancelling in-flight pass after its current batch"
            );
            slot.done_rx
        });

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(());
        let name = spec.name.clone();
        let revision = spec.revision;
        let ctx = self.ctx.clone();

        let handle = tokio::spawn(async move {
            if let Some(mut previous) = previous {
                // Resolves once the superseded task drops its sender.
                let _ = previous.changed().await;
            }
            run_pass(ctx, spec, cancel_rx).await;
            drop(done_tx);
        });

        slots.insert(
            name,
            ServiceSlot {
                revision,
                cancel_tx,
                done_rx,
                handle,
            },
        );
        true
    }

    /// Store a config payload; identical payloads return the existing version.
    pub fn update_config(&self, name: &str, payload: &[u8]) -> ReconcileResult<ConfigVersion> {
        Ok(self.ctx.configs.put(name, payload)?)
    }

    /// Last resolved status of a service.
    pub fn status(&self, name: &str) -> ReconcileResult<ServiceStatus> {
        if let Some(status) = self.ctx.state.get_status(name)? {
            return Ok(status);
        }
        // Deployed but the task has not written yet.
        let spec = self
            .ctx
            .state
            .get_service(name)?
            .ok_or_else(|| ReconcileError::ServiceNotFound(name.to_string()))?;
        let mut status = ServiceStatus::new(name);
        status.desired_count = spec.replicas;
        status.revision = spec.revision;
        Ok(status)
    }

    pub fn statuses(&self) -> ReconcileResult<Vec<ServiceStatus>> {
        Ok(self.ctx.state.list_statuses()?)
    }

    /// Config versions that must survive garbage collection.
    ///
    /// Current specs, last converged specs, and whatever the mirrored
    /// instances are still bound to.
    pub fn active_config_refs(&self) -> ReconcileResult<HashSet<ConfigRef>> {
        let state = &self.ctx.state;
        let mut active = HashSet::new();

        for spec in state.list_services()? {
            active.extend(spec.configs.iter().cloned());

            if let Some(revision) = state
                .get_status(&spec.name)?
                .and_then(|s| s.last_converged_revision)
                && let Some(converged) = state.get_service_revision(&spec.name, revision)?
            {
                active.extend(converged.configs);
            }

            for instance in state.list_instances(&spec.name)? {
                active.extend(instance.configs);
            }
        }
        Ok(active)
    }

    /// Delete config versions nothing references.
    pub fn prune_configs(&self) -> ReconcileResult<Vec<ConfigVersion>> {
        let active = self.active_config_refs()?;
        Ok(self.ctx.configs.prune(&active)?)
    }

    /// Restart reconciliation for every stored service at its current revision.
    ///
    /// Services whose current revision already failed stay parked.
    pub async fn resume(&self) -> ReconcileResult<usize> {
        let specs = self.ctx.state.list_services()?;
        let mut slots = self.slots.lock().await;
        let mut count = 0;
        for spec in specs {
            if let Some(status) = self.ctx.state.get_status(&spec.name)?
                && matches!(status.phase, ServicePhase::UpdateFailed { .. })
                && status.revision == spec.revision
            {
                debug!(service = %spec.name, revision = spec.revision, "failed revision stays parked");
                continue;
            }
            if self.spawn_pass(&mut slots, spec) {
                count += 1;
            }
        }
        if count > 0 {
            info!(services = count, "resumed reconciliation");
        }
        Ok(count)
    }

    /// Wait until the current task for `name` (if any) has finished.
    pub async fn wait_settled(&self, name: &str) {
        let done = {
            let slots = self.slots.lock().await;
            slots.get(name).map(|slot| slot.done_rx.clone())
        };
        if let Some(mut done) = done {
            let _ = done.changed().await;
        }
    }

    /// Whether a task for `name` is still running.
    pub async fn is_active(&self, name: &str) -> bool {
        let slots = self.slots.lock().await;
        slots.get(name).is_some_and(|slot| !slot.handle.is_finished())
    }

    /// Ask every task to stop after its current batch and wait for them.
    pub async fn shutdown(&self) {
        let pending: Vec<(String, watch::Receiver<()>)> = {
            let mut slots = self.slots.lock().await;
            slots
                .drain()
                .map(|(name, slot)| {
                    let _ = slot.cancel_tx.send(true);
                    (name, slot.done_rx)
                })
                .collect()
        };

        for (name, mut done) in pending {
            let _ = done.changed().await;
            debug!(service = %name, "service task stopped");
        }
        info!("reconciler stopped");
    }
}
