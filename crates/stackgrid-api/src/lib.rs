//! stackgrid-api — REST API for StackGrid.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthz` | Liveness probe |
//! | GET | `/api/v1/services` | List current service specs |
//! | POST | `/api/v1/services` | Deploy a service (202 Accepted) |
//! | GET | `/api/v1/services/{name}` | Current spec |
//! | GET | `/api/v1/services/{name}/status` | Reconciliation status |
//! | GET | `/api/v1/services/{name}/history` | All recorded revisions |
//! | GET | `/api/v1/services/{name}/instances` | Last observed instances |
//! | POST | `/api/v1/configs/{name}` | Upload a config payload (raw body) |
//! | GET | `/api/v1/configs/{name}` | List versions of a config |
//! | GET | `/api/v1/configs/{name}/{version}` | Raw payload of one version |
//! | POST | `/api/v1/configs/prune` | Delete unreferenced versions |

pub mod config_handlers;
pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use stackgrid_reconciler::Reconciler;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub reconciler: Reconciler,
}

/// Build the complete API router.
pub fn build_router(reconciler: Reconciler) -> Router {
    let api_state = ApiState { reconciler };

    let api_routes = Router::new()
        .route("/services", get(handlers::list_services).post(handlers::deploy_service))
        .route("/services/{name}", get(handlers::get_service))
        .route("/services/{name}/status", get(handlers::get_status))
        .route("/services/{name}/history", get(handlers::get_history))
        .route("/services/{name}/instances", get(handlers::list_instances))
        .route("/configs/prune", post(config_handlers::prune_configs))
        .route(
            "/configs/{name}",
            get(config_handlers::list_config_versions).post(config_handlers::put_config),
        )
        .route("/configs/{name}/{version}", get(config_handlers::get_config_payload))
        .with_state(api_state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}
