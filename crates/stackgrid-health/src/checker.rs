//! Health poll bookkeeping.
//!
//! Converts raw orchestrator health reports into a gate verdict using
//! consecutive success / failure thresholds.

use tracing::{debug, warn};

use stackgrid_state::InstanceHealth;

/// Result of a single health poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// Orchestrator reported the instance healthy.
    Healthy,
    /// Orchestrator reported unhealthy, terminated, or no such instance.
    Unhealthy,
    /// Still starting.
    Starting,
    /// The poll itself failed (orchestrator error). Does not count either way.
    Failed,
}

impl From<InstanceHealth> for ProbeResult {
    fn from(health: InstanceHealth) -> Self {
        match health {
            InstanceHealth::Healthy => ProbeResult::Healthy,
            InstanceHealth::Starting => ProbeResult::Starting,
            InstanceHealth::Unhealthy | InstanceHealth::Terminated => ProbeResult::Unhealthy,
        }
    }
}

/// Verdict of a tracker after the latest poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pending,
    Healthy,
    Unhealthy,
}

/// Tracks consecutive probe results for a single instance.
#[derive(Debug)]
pub struct HealthTracker {
    verdict: Verdict,
    consecutive_failures: u32,
    consecutive_successes: u32,
    /// Consecutive unhealthy polls before the verdict is `Unhealthy`.
    unhealthy_threshold: u32,
    /// Consecutive healthy polls before the verdict is `Healthy`.
    healthy_threshold: u32,
}

impl HealthTracker {
    pub fn new(healthy_threshold: u32, unhealthy_threshold: u32) -> Self {
        Self {
            verdict: Verdict::Pending,
            consecutive_failures: 0,
            consecutive_successes: 0,
            unhealthy_threshold: unhealthy_threshold.max(1),
            healthy_threshold: healthy_threshold.max(1),
        }
    }

    /// Record a probe result and return the new verdict.
    pub fn record(&mut self, result: ProbeResult) -> Verdict {
        match result {
            ProbeResult::Healthy => {
                self.consecutive_failures = 0;
                self.consecutive_successes += 1;
                if self.consecutive_successes >= self.healthy_threshold {
                    if self.verdict != Verdict::Healthy {
                        debug!(successes = self.consecutive_successes, "instance passed health gate");
                    }
                    self.verdict = Verdict::Healthy;
                }
            }
            ProbeResult::Unhealthy => {
                self.consecutive_successes = 0;
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.unhealthy_threshold {
                    if self.verdict != Verdict::Unhealthy {
                        warn!(
                            failures = self.consecutive_failures,
                            threshold = self.unhealthy_threshold,
                            "instance failed health gate"
                        );
                    }
                    self.verdict = Verdict::Unhealthy;
                }
            }
            ProbeResult::Starting => {
                self.consecutive_successes = 0;
                self.consecutive_failures = 0;
            }
            ProbeResult::Failed => {}
        }

        self.verdict
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
