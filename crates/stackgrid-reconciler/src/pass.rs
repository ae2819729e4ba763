//! One reconciliation pass for one service.
//!
//! The pass loops observe → plan → execute batch → health gate until the
//! plan is empty. Cancellation is only checked at the top of the loop, so
//! a superseded pass always finishes the batch it started.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use stackgrid_config::ConfigStore;
use stackgrid_health::HealthGate;
use stackgrid_orchestrator::{Orchestrator, OrchestratorResult, RetryPolicy};
use stackgrid_rollout::{Action, RollingConfig, Rollout, batch_count, plan, rollback};
use stackgrid_state::{InstanceHealth, InstanceId, ObservedInstance, ServiceSpec, ServiceStatus, StateStore};

/// Everything a pass needs, shared by all service tasks.
pub(crate) struct PassContext {
    pub state: StateStore,
    pub configs: ConfigStore,
    pub orchestrator: Arc<dyn Orchestrator>,
    pub gate: HealthGate,
    pub rolling: RollingConfig,
    pub retry: RetryPolicy,
}

/// Outcome of a single orchestrator action.
enum Applied {
    Created(InstanceId),
    Updated(InstanceId),
    Removed,
    Failed {
        instance: Option<InstanceId>,
        error: String,
    },
}

/// Instances touched by a batch and the errors it hit.
#[derive(Default)]
struct BatchResult {
    touched: Vec<InstanceId>,
    created: Vec<InstanceId>,
    errors: Vec<String>,
}

impl PassContext {
    fn load_status(&self, name: &str) -> ServiceStatus {
        match self.state.get_status(name) {
            Ok(Some(status)) => status,
            Ok(None) => ServiceStatus::new(name),
            Err(e) => {
                error!(service = %name, error = %e, "failed to load status, starting fresh");
                ServiceStatus::new(name)
            }
        }
    }

    fn save(&self, rollout: &Rollout, status: &mut ServiceStatus) {
        rollout.apply_to(status);
        status.updated_at = epoch_secs();
        if let Err(e) = self.state.put_status(status) {
            error!(service = %status.name, error = %e, "failed to persist status");
        }
    }

    /// List instances and mirror them into the state store.
    async fn observe(&self, service: &str) -> OrchestratorResult<Vec<ObservedInstance>> {
        let observed = self
            .retry
            .run("list_instances", || self.orchestrator.list_instances(service))
            .await?;
        if let Err(e) = self.state.replace_instances(service, &observed) {
            warn!(%service, error = %e, "failed to mirror instances");
        }
        Ok(observed)
    }

    /// Run a set of actions concurrently and wait for all of them.
    async fn execute(&self, actions: Vec<Action>) -> BatchResult {
        let mut set = JoinSet::new();
        for action in actions {
            let orchestrator = self.orchestrator.clone();
            let retry = self.retry.clone();
            set.spawn(apply(orchestrator, retry, action));
        }

        let mut result = BatchResult::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Applied::Created(id)) => {
                    result.touched.push(id.clone());
                    result.created.push(id);
                }
                Ok(Applied::Updated(id)) => result.touched.push(id),
                Ok(Applied::Removed) => {}
                Ok(Applied::Failed { instance, error }) => {
                    result.touched.extend(instance);
                    result.errors.push(error);
                }
                Err(e) => result.errors.push(format!("action task failed: {e}")),
            }
        }
        result.touched.sort();
        result
    }
}

async fn apply(orchestrator: Arc<dyn Orchestrator>, retry: RetryPolicy, action: Action) -> Applied {
    match action {
        Action::Create { service, template } => {
            let created = retry.run("create", || orchestrator.create(&service, &template)).await;
            match created {
                Ok(id) => Applied::Created(id),
                Err(e) => Applied::Failed {
                    instance: None,
                    error: format!("create {service} instance: {e}"),
                },
            }
        }
        Action::Update { instance, template } => {
            let updated = retry.run("update", || orchestrator.update(&instance, &template)).await;
            match updated {
                Ok(()) => Applied::Updated(instance),
                Err(e) => Applied::Failed {
                    error: format!("update {instance}: {e}"),
                    instance: Some(instance),
                },
            }
        }
        Action::Remove { instance } => {
            retry.run_forever("remove", || orchestrator.remove(&instance)).await;
            Applied::Removed
        }
    }
}

fn healthy_count(observed: &[ObservedInstance]) -> u32 {
    observed
        .iter()
        .filter(|i| i.health == InstanceHealth::Healthy)
        .count() as u32
}

/// Drive `spec` to convergence, or roll back and park in `UpdateFailed`.
pub(crate) async fn run_pass(ctx: Arc<PassContext>, spec: ServiceSpec, cancel: watch::Receiver<bool>) {
    let name = spec.name.clone();
    if *cancel.borrow() {
        debug!(service = %name, revision = spec.revision, "pass superseded before it started");
        return;
    }

    let mut status = ctx.load_status(&name);
    status.desired_count = spec.replicas;
    let mut rollout = Rollout::new(&name, spec.revision);
    rollout.start();
    ctx.save(&rollout, &mut status);

    let mut touched: Vec<InstanceId> = Vec::new();
    let mut created: HashSet<InstanceId> = HashSet::new();

    loop {
        if *cancel.borrow() {
            rollout.cancel();
            ctx.save(&rollout, &mut status);
            return;
        }

        let observed = match ctx.observe(&name).await {
            Ok(observed) => observed,
            Err(e) => {
                rollout.abort(&format!("observe instances: {e}"));
                status.last_error = Some(e.to_string());
                ctx.save(&rollout, &mut status);
                return;
            }
        };
        status.healthy_count = healthy_count(&observed);

        let next = match plan(&spec, &observed, &ctx.configs, &ctx.rolling) {
            Ok(next) => next,
            Err(e) => {
                rollout.abort(&e.to_string());
                status.last_error = Some(e.to_string());
                ctx.save(&rollout, &mut status);
                return;
            }
        };

        if next.is_empty() {
            rollout.complete();
            status.last_converged_revision = Some(spec.revision);
            status.last_error = None;
            ctx.save(&rollout, &mut status);
            return;
        }

        rollout.begin_batch();
        ctx.save(&rollout, &mut status);
        debug!(
            service = %name,
            batch = rollout.current_batch,
            batches_left = batch_count(next.remaining_stale as u32, ctx.rolling.max_parallel_updates),
            actions = next.actions.len(),
            "executing batch"
        );

        let result = ctx.execute(next.actions).await;
        for id in &result.touched {
            if !touched.contains(id) {
                touched.push(id.clone());
            }
        }
        created.extend(result.created.iter().cloned());

        let failure = match result.errors.first() {
            Some(err) => Some(err.clone()),
            None => {
                rollout.gate();
                ctx.save(&rollout, &mut status);
                ctx.gate.await_batch(&result.touched).await.failure_reason()
            }
        };

        if let Some(reason) = failure {
            rollout.roll_back(&reason);
            ctx.save(&rollout, &mut status);

            restore(&ctx, &spec, &status, &touched, &created).await;

            if let Ok(observed) = ctx.observe(&name).await {
                status.healthy_count = healthy_count(&observed);
            }
            rollout.fail(&reason);
            status.last_error = Some(reason);
            ctx.save(&rollout, &mut status);
            return;
        }
    }
}

/// Point every instance this pass touched back at the last converged spec.
async fn restore(
    ctx: &PassContext,
    spec: &ServiceSpec,
    status: &ServiceStatus,
    touched: &[InstanceId],
    created: &HashSet<InstanceId>,
) {
    let name = &spec.name;
    let last_known_good = match status.last_converged_revision {
        Some(revision) => match ctx.state.get_service_revision(name, revision) {
            Ok(found) => found,
            Err(e) => {
                error!(service = %name, revision, error = %e, "failed to load last converged spec");
                None
            }
        },
        None => None,
    };

    let observed = match ctx.observe(name).await {
        Ok(observed) => observed,
        Err(e) => {
            error!(service = %name, error = %e, "cannot observe instances for rollback");
            return;
        }
    };
    let affected: Vec<ObservedInstance> = observed
        .into_iter()
        .filter(|i| touched.contains(&i.id))
        .collect();

    let restore_plan = rollback(name, last_known_good.as_ref(), &affected, created);
    let (removes, updates): (Vec<Action>, Vec<Action>) = restore_plan
        .actions
        .into_iter()
        .partition(|a| matches!(a, Action::Remove { .. }));

    ctx.execute(removes).await;

    for chunk in updates.chunks(ctx.rolling.batch_size()) {
        let result = ctx.execute(chunk.to_vec()).await;
        for err in &result.errors {
            error!(service = %name, error = %err, "rollback action failed");
        }
        let outcome = ctx.gate.await_batch(&result.touched).await;
        if let Some(reason) = outcome.failure_reason() {
            warn!(service = %name, %reason, "restored instance not healthy");
        }
    }

    info!(
        service = %name,
        restored_revision = restore_plan.revision,
        instances = affected.len(),
        "rollback finished"
    );
}

pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
