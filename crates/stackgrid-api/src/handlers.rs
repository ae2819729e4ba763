//! Service handlers.
//!
//! Deploys go through the reconciler; reads come straight from the
//! state store the reconciler writes to.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use stackgrid_config::ConfigError;
use stackgrid_reconciler::{DeployRequest, ReconcileError};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
pub(crate) struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub(crate) fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

/// Map reconciler errors onto HTTP status codes.
pub(crate) fn reconcile_error(err: ReconcileError) -> Response {
    let status = match &err {
        ReconcileError::Validation(_) => StatusCode::BAD_REQUEST,
        ReconcileError::ServiceNotFound(_) => StatusCode::NOT_FOUND,
        ReconcileError::Config(ConfigError::NotFound { .. }) => StatusCode::NOT_FOUND,
        ReconcileError::Config(ConfigError::InvalidName(_)) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!(error = %err, "request failed");
    }
    error_response(&err.to_string(), status)
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok("ok")
}

// ── Services ───────────────────────────────────────────────────

/// GET /api/v1/services
pub async fn list_services(State(state): State<ApiState>) -> Response {
    match state.reconciler.state().list_services() {
        Ok(specs) => ApiResponse::ok(specs).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// POST /api/v1/services
pub async fn deploy_service(State(state): State<ApiState>, Json(req): Json<DeployRequest>) -> Response {
    match state.reconciler.deploy(req).await {
        Ok(spec) => (
            StatusCode::ACCEPTED,
            ApiResponse::ok(serde_json::json!({
                "service": spec.name,
                "revision": spec.revision,
                "status": "accepted"
            })),
        )
            .into_response(),
        Err(e) => reconcile_error(e),
    }
}

/// GET /api/v1/services/{name}
pub async fn get_service(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    match state.reconciler.state().get_service(&name) {
        Ok(Some(spec)) => ApiResponse::ok(spec).into_response(),
        Ok(None) => error_response("service not found", StatusCode::NOT_FOUND),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// GET /api/v1/services/{name}/status
pub async fn get_status(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    match state.reconciler.status(&name) {
        Ok(status) => ApiResponse::ok(status).into_response(),
        Err(e) => reconcile_error(e),
    }
}

/// GET /api/v1/services/{name}/history
pub async fn get_history(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    match state.reconciler.state().service_history(&name) {
        Ok(history) if history.is_empty() => error_response("service not found", StatusCode::NOT_FOUND),
        Ok(history) => ApiResponse::ok(history).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// GET /api/v1/services/{name}/instances
pub async fn list_instances(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    match state.reconciler.state().list_instances(&name) {
        Ok(instances) => ApiResponse::ok(instances).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}
