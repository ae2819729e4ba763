//! Health gate — waits for a batch of instances to become healthy.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use stackgrid_orchestrator::{Orchestrator, OrchestratorError};
use stackgrid_state::InstanceId;

use crate::checker::{HealthTracker, ProbeResult, Verdict};

/// Polling parameters for the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateConfig {
    pub poll_interval: Duration,
    /// Per-instance deadline.
    pub timeout: Duration,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(30),
            healthy_threshold: 1,
            unhealthy_threshold: 1,
        }
    }
}

/// Result of waiting on one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Healthy,
    Unhealthy,
    TimedOut,
}

/// Per-instance outcomes of one batch, in the order the ids were given.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchOutcome {
    pub outcomes: Vec<(InstanceId, GateOutcome)>,
}

impl BatchOutcome {
    /// True when every instance passed (an empty batch passes).
    pub fn is_healthy(&self) -> bool {
        self.outcomes.iter().all(|(_, o)| *o == GateOutcome::Healthy)
    }

    /// Instances that did not pass.
    pub fn failed(&self) -> Vec<InstanceId> {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o != GateOutcome::Healthy)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Human-readable reason for the first failure, if any.
    pub fn failure_reason(&self) -> Option<String> {
        self.outcomes.iter().find_map(|(id, outcome)| match outcome {
            GateOutcome::Healthy => None,
            GateOutcome::Unhealthy => Some(format!("instance {id} reported unhealthy")),
            GateOutcome::TimedOut => Some(format!("instance {id} did not become healthy in time")),
        })
    }
}

/// Polls the orchestrator until instances settle.
///
/// Cheap to clone; clones share the orchestrator handle.
#[derive(Clone)]
pub struct HealthGate {
    orchestrator: Arc<dyn Orchestrator>,
    config: GateConfig,
}

impl HealthGate {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, config: GateConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Wait until `instance` is healthy or unhealthy, or `timeout` elapses.
    pub async fn await_instance(&self, instance: &str, timeout: Duration) -> GateOutcome {
        match tokio::time::timeout(timeout, self.poll_until_settled(instance)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(%instance, timeout_secs = timeout.as_secs(), "health gate timed out");
                GateOutcome::TimedOut
            }
        }
    }

    /// Gate every instance of a batch concurrently with the configured timeout.
    pub async fn await_batch(&self, instances: &[InstanceId]) -> BatchOutcome {
        let mut set = JoinSet::new();
        for (idx, id) in instances.iter().enumerate() {
            let gate = self.clone();
            let id = id.clone();
            set.spawn(async move {
                let outcome = gate.await_instance(&id, gate.config.timeout).await;
                (idx, outcome)
            });
        }

        let mut outcomes: Vec<(InstanceId, GateOutcome)> = instances
            .iter()
            .map(|id| (id.clone(), GateOutcome::Unhealthy))
            .collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, outcome)) => outcomes[idx].1 = outcome,
                Err(e) => warn!(error = %e, "health gate task failed"),
            }
        }

        let result = BatchOutcome { outcomes };
        if result.is_healthy() {
            info!(instances = instances.len(), "batch passed health gate");
        } else {
            warn!(failed = result.failed().len(), "batch failed health gate");
        }
        result
    }

    async fn poll_until_settled(&self, instance: &str) -> GateOutcome {
        let mut tracker =
            HealthTracker::new(self.config.healthy_threshold, self.config.unhealthy_threshold);

        loop {
            let probe = match self.orchestrator.query_health(instance).await {
                Ok(health) => ProbeResult::from(health),
                // Creation is eventually consistent; keep waiting until the deadline.
                Err(OrchestratorError::InstanceNotFound(_)) => {
                    debug!(%instance, "instance not visible yet");
                    ProbeResult::Failed
                }
                Err(e) => {
                    debug!(%instance, error = %e, "health query failed");
                    ProbeResult::Failed
                }
            };

            match tracker.record(probe) {
                Verdict::Healthy => return GateOutcome::Healthy,
                Verdict::Unhealthy => return GateOutcome::Unhealthy,
                Verdict::Pending => {}
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}
