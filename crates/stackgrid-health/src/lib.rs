//! stackgrid-health — health gating for rolling updates.
//!
//! After each batch of create/update actions the reconciler suspends on
//! the [`HealthGate`] until every touched instance reports healthy, any
//! reports unhealthy, or the gate timeout elapses.
//!
//! # Architecture
//!
//! ```text
//! HealthGate
//!   ├── await_batch() — one poll loop per instance, run concurrently
//!   │   ├── Orchestrator::query_health() every poll_interval
//!   │   └── HealthTracker (consecutive success / failure thresholds)
//!   └── tokio::time::timeout bounds each loop
//! ```
//!
//! Waiting is a tokio sleep, so gates of different services never block
//! each other.

pub mod checker;
pub mod gate;

pub use checker::{HealthTracker, ProbeResult, Verdict};
pub use gate::{BatchOutcome, GateConfig, GateOutcome, HealthGate};
