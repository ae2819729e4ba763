//! StackGrid rolling updates — validation, batch planning, rollback.
//!
//! Everything in this crate is pure: it turns a desired [`ServiceSpec`]
//! and the observed instances into the next batch of actions. Executing
//! the actions and waiting on health gates is the reconciler's job.
//!
//! # Components
//!
//! - **`strategy`** — rolling-update configuration
//! - **`validate`** — spec validation against the config catalog
//! - **`planner`** — `plan()` and `rollback()` producing a [`ReconciliationPlan`]
//! - **`controller`** — per-service phase machine
//!
//! [`ServiceSpec`]: stackgrid_state::ServiceSpec

pub mod controller;
pub mod planner;
pub mod strategy;
pub mod validate;

pub use controller::Rollout;
pub use planner::{Action, ReconciliationPlan, plan, rollback};
pub use strategy::{RollingConfig, batch_count};
pub use validate::{ValidationError, validate, validate_service_name};
