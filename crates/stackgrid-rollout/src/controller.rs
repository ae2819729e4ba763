//! Rollout controller — per-service phase machine.
//!
//! ```text
//! Idle -> Planning -> Updating(batch N) -> HealthGating -> Updating(batch N+1) ... -> Idle
//!                                            └-> RollingBack -> UpdateFailed
//! ```
//!
//! Transitions out of the wrong phase are ignored and logged, the same
//! way a paused or finished rollout ignores `advance`.

use tracing::{debug, info, warn};

use stackgrid_state::{ServicePhase, ServiceStatus};

/// A reconciliation pass in progress for one service.
#[derive(Debug, Clone)]
pub struct Rollout {
    pub service: String,
    pub revision: u64,
    pub phase: ServicePhase,
    /// 1-based index of the batch being applied; 0 before the first batch.
    pub current_batch: u32,
}

impl Rollout {
    pub fn new(service: &str, revision: u64) -> Self {
        Self {
            service: service.to_string(),
            revision,
            phase: ServicePhase::Idle,
            current_batch: 0,
        }
    }

    /// Begin a pass. Allowed from any resting phase.
    pub fn start(&mut self) {
        if self.is_resting() {
            self.phase = ServicePhase::Planning;
            self.current_batch = 0;
            debug!(service = %self.service, revision = self.revision, "planning");
        } else {
            self.ignored("start");
        }
    }

    /// Start applying the next batch.
    pub fn begin_batch(&mut self) {
        if matches!(self.phase, ServicePhase::Planning | ServicePhase::HealthGating) {
            self.current_batch += 1;
            self.phase = ServicePhase::Updating;
            info!(service = %self.service, batch = self.current_batch, "applying batch");
        } else {
            self.ignored("begin_batch");
        }
    }

    /// Batch actions issued; waiting on health.
    pub fn gate(&mut self) {
        if self.phase == ServicePhase::Updating {
            self.phase = ServicePhase::HealthGating;
            debug!(service = %self.service, batch = self.current_batch, "health gating");
        } else {
            self.ignored("gate");
        }
    }

    /// The plan came back empty: the service is converged.
    pub fn complete(&mut self) {
        if matches!(self.phase, ServicePhase::Planning | ServicePhase::HealthGating) {
            info!(
                service = %self.service,
                revision = self.revision,
                batches = self.current_batch,
                "service converged"
            );
            self.phase = ServicePhase::Idle;
            self.current_batch = 0;
        } else {
            self.ignored("complete");
        }
    }

    /// A batch failed its health gate or its orchestrator calls.
    pub fn roll_back(&mut self, reason: &str) {
        if matches!(self.phase, ServicePhase::Updating | ServicePhase::HealthGating) {
            warn!(
                service = %self.service,
                batch = self.current_batch,
                %reason,
                "rolling back"
            );
            self.phase = ServicePhase::RollingBack;
        } else {
            self.ignored("roll_back");
        }
    }

    /// Rollback finished; park until the next deploy.
    pub fn fail(&mut self, reason: &str) {
        if self.phase == ServicePhase::RollingBack {
            self.phase = ServicePhase::UpdateFailed {
                reason: reason.to_string(),
            };
            self.current_batch = 0;
        } else {
            self.ignored("fail");
        }
    }

    /// Give up before any batch was applied (observe or plan failed).
    pub fn abort(&mut self, reason: &str) {
        if !self.is_resting() {
            warn!(service = %self.service, %reason, "pass aborted");
            self.phase = ServicePhase::UpdateFailed {
                reason: reason.to_string(),
            };
            self.current_batch = 0;
        }
    }

    /// Superseded by a newer deploy between batches.
    pub fn cancel(&mut self) {
        if !self.is_resting() {
            info!(service = %self.service, batch = self.current_batch, "pass superseded");
            self.phase = ServicePhase::Idle;
            self.current_batch = 0;
        }
    }

    pub fn is_resting(&self) -> bool {
        matches!(self.phase, ServicePhase::Idle | ServicePhase::UpdateFailed { .. })
    }

    /// Copy the phase fields into a status record.
    pub fn apply_to(&self, status: &mut ServiceStatus) {
        status.phase = self.phase.clone();
        status.current_batch = self.current_batch;
        status.revision = self.revision;
    }

    fn ignored(&self, transition: &str) {
        warn!(
            service = %self.service,
            phase = ?self.phase,
            %transition,
            "ignoring transition from current phase"
        );
    }
}
