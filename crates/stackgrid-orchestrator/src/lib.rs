//! stackgrid-orchestrator — the boundary to the container runtime.
//!
//! The reconciler never talks to a concrete orchestrator. It depends on
//! the narrow [`Orchestrator`] capability trait: create, update, remove,
//! query health, list instances.
//!
//! # Components
//!
//! - **`Orchestrator`** — async capability trait
//! - **`retry`** — bounded and unbounded retry with exponential backoff
//! - **`simulated`** — in-process orchestrator with scriptable health,
//!   used by the daemon's standalone mode and by tests
//!
//! # Contracts
//!
//! Creation is eventually consistent: a created instance shows up in
//! `list_instances` within a bounded delay. Removal is acknowledged
//! synchronously; removing an unknown instance succeeds.

pub mod error;
pub mod retry;
pub mod simulated;

use async_trait::async_trait;

use stackgrid_state::{InstanceHealth, InstanceId, InstanceTemplate, ObservedInstance};

pub use error::{OrchestratorError, OrchestratorResult};
pub use retry::RetryPolicy;
pub use simulated::SimulatedOrchestrator;

/// Capabilities the reconciler needs from a container orchestrator.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Start a new instance of `service`. Returns the issued instance id.
    async fn create(&self, service: &str, template: &InstanceTemplate) -> OrchestratorResult<InstanceId>;

    /// Re-deploy an existing instance with a new image / config bindings.
    async fn update(&self, instance: &str, template: &InstanceTemplate) -> OrchestratorResult<()>;

    /// Stop and delete an instance.
    async fn remove(&self, instance: &str) -> OrchestratorResult<()>;

    /// Current health of an instance.
    async fn query_health(&self, instance: &str) -> OrchestratorResult<InstanceHealth>;

    /// All known instances of a service.
    async fn list_instances(&self, service: &str) -> OrchestratorResult<Vec<ObservedInstance>>;
}
