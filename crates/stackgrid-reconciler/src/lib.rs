//! stackgrid-reconciler — drives running instances toward deployed specs.
//!
//! Each service name gets its own tokio task. A task observes the
//! orchestrator, plans one batch, executes it, waits on the health gate,
//! and repeats until the plan is empty. A failed batch is rolled back to
//! the last converged spec and the service parks in `UpdateFailed`.
//!
//! # Architecture
//!
//! ```text
//! Reconciler
//!   ├── deploy()        — validate, record revision, (re)start service task
//!   ├── update_config() — ConfigStore::put
//!   ├── status()        — persisted ServiceStatus
//!   └── service tasks   — one per name; cancellation checked between batches
//!         ├── Orchestrator (create / update / remove with RetryPolicy)
//!         ├── HealthGate
//!         └── StateStore (status, instance mirror)
//! ```

pub mod error;
mod pass;
pub mod reconciler;

pub use error::{ReconcileError, ReconcileResult};
pub use reconciler::{DeployRequest, Reconciler, ReconcilerConfig};
