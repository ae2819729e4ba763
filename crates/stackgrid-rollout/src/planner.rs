//! Reconciliation planner.
//!
//! `plan` diffs a desired spec against observed instances and returns the
//! next batch of work. It emits at most one batch of updates per call;
//! the caller executes the batch, waits on the health gate, re-observes,
//! and plans again until the plan comes back empty.

use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use stackgrid_config::ConfigCatalog;
use stackgrid_state::{InstanceHealth, InstanceId, InstanceTemplate, ObservedInstance, ServiceSpec};

use crate::strategy::RollingConfig;
use crate::validate::{ValidationError, validate};

/// A single orchestrator call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Create {
        service: String,
        template: InstanceTemplate,
    },
    Update {
        instance: InstanceId,
        template: InstanceTemplate,
    },
    Remove {
        instance: InstanceId,
    },
}

/// Actions for one pass over one service. Produced fresh, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationPlan {
    pub service: String,
    /// Revision of the spec the actions converge toward.
    pub revision: u64,
    pub actions: Vec<Action>,
    /// Stale instances left for later batches.
    pub remaining_stale: usize,
}

impl ReconciliationPlan {
    fn empty(service: &str, revision: u64) -> Self {
        Self {
            service: service.to_string(),
            revision,
            actions: Vec::new(),
            remaining_stale: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn creates(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, Action::Create { .. }))
            .count()
    }

    pub fn updated_instances(&self) -> Vec<&InstanceId> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                Action::Update { instance, .. } => Some(instance),
                _ => None,
            })
            .collect()
    }

    pub fn removed_instances(&self) -> Vec<&InstanceId> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                Action::Remove { instance } => Some(instance),
                _ => None,
            })
            .collect()
    }
}

/// Live instances of `service`, oldest first.
fn live_instances<'a>(service: &str, observed: &'a [ObservedInstance]) -> Vec<&'a ObservedInstance> {
    let mut live: Vec<_> = observed
        .iter()
        .filter(|i| i.service == service && i.is_live())
        .collect();
    live.sort_by(|a, b| (a.started_at, &a.id).cmp(&(b.started_at, &b.id)));
    live
}

/// Compute the next batch of actions that moves `observed` toward `desired`.
///
/// - Creates fill the gap between `replicas` and the instances that are
///   not unhealthy, so in-flight starts are not duplicated.
/// - Excess live instances are removed, unhealthy first, then oldest.
/// - Survivors whose image or config set differs from `desired` are stale;
///   the oldest `max_parallel_updates` of them are updated.
///
/// At convergence the plan is empty.
pub fn plan(
    desired: &ServiceSpec,
    observed: &[ObservedInstance],
    catalog: &dyn ConfigCatalog,
    rolling: &RollingConfig,
) -> Result<ReconciliationPlan, ValidationError> {
    validate(desired, catalog)?;

    let mut result = ReconciliationPlan::empty(&desired.name, desired.revision);
    let live = live_instances(&desired.name, observed);
    let replicas = desired.replicas as usize;

    let available = live
        .iter()
        .filter(|i| i.health != InstanceHealth::Unhealthy)
        .count();
    let template = desired.template();
    for _ in available..replicas {
        result.actions.push(Action::Create {
            service: desired.name.clone(),
            template: template.clone(),
        });
    }

    let excess = live.len().saturating_sub(replicas);
    let mut by_removal_order = live.clone();
    by_removal_order.sort_by_key(|i| (i.health != InstanceHealth::Unhealthy, i.started_at, i.id.clone()));
    let removed: HashSet<&str> = by_removal_order
        .iter()
        .take(excess)
        .map(|i| i.id.as_str())
        .collect();
    for inst in by_removal_order.iter().take(excess) {
        result.actions.push(Action::Remove {
            instance: inst.id.clone(),
        });
    }

    let stale: Vec<_> = live
        .iter()
        .filter(|i| !removed.contains(i.id.as_str()) && !i.matches(desired))
        .collect();
    let batch = rolling.batch_size().min(stale.len());
    for inst in &stale[..batch] {
        result.actions.push(Action::Update {
            instance: inst.id.clone(),
            template: template.clone(),
        });
    }
    result.remaining_stale = stale.len() - batch;

    debug!(
        service = %desired.name,
        revision = desired.revision,
        live = live.len(),
        creates = result.creates(),
        removes = removed.len(),
        updates = batch,
        remaining_stale = result.remaining_stale,
        "planned reconciliation pass"
    );
    Ok(result)
}

/// Plan the restore of a failed batch.
///
/// Instances in `affected` that were created by the failed batch are
/// removed. The rest are pointed back at `last_known_good` unless they
/// already match it. With no converged spec (first deploy) every affected
/// instance is removed.
pub fn rollback(
    service: &str,
    last_known_good: Option<&ServiceSpec>,
    affected: &[ObservedInstance],
    created_in_batch: &HashSet<InstanceId>,
) -> ReconciliationPlan {
    let revision = last_known_good.map(|s| s.revision).unwrap_or(0);
    let mut result = ReconciliationPlan::empty(service, revision);

    for inst in affected.iter().filter(|i| i.service == service) {
        match last_known_good {
            Some(good) if !created_in_batch.contains(&inst.id) => {
                if !inst.matches(good) {
                    result.actions.push(Action::Update {
                        instance: inst.id.clone(),
                        template: good.template(),
                    });
                }
            }
            _ => result.actions.push(Action::Remove {
                instance: inst.id.clone(),
            }),
        }
    }

    debug!(
        %service,
        target_revision = revision,
        actions = result.actions.len(),
        "planned rollback"
    );
    result
}
