//! Config handlers.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use stackgrid_state::ConfigVersion;

use crate::ApiState;
use crate::handlers::{ApiResponse, error_response, reconcile_error};

/// Config version metadata, without the payload.
#[derive(Debug, Serialize)]
pub struct ConfigVersionInfo {
    pub name: String,
    pub version: u64,
    pub content_hash: String,
    pub size: usize,
    pub created_at: u64,
}

impl From<&ConfigVersion> for ConfigVersionInfo {
    fn from(v: &ConfigVersion) -> Self {
        Self {
            name: v.name.clone(),
            version: v.version,
            content_hash: v.content_hash.clone(),
            size: v.payload.len(),
            created_at: v.created_at,
        }
    }
}

fn infos(versions: &[ConfigVersion]) -> Vec<ConfigVersionInfo> {
    versions.iter().map(ConfigVersionInfo::from).collect()
}

/// POST /api/v1/configs/{name}
pub async fn put_config(State(state): State<ApiState>, Path(name): Path<String>, body: Bytes) -> Response {
    match state.reconciler.update_config(&name, &body) {
        Ok(version) => ApiResponse::ok(ConfigVersionInfo::from(&version)).into_response(),
        Err(e) => reconcile_error(e),
    }
}

/// GET /api/v1/configs/{name}
pub async fn list_config_versions(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    match state.reconciler.configs().list_versions(&name) {
        Ok(versions) if versions.is_empty() => error_response("config not found", StatusCode::NOT_FOUND),
        Ok(versions) => ApiResponse::ok(infos(&versions)).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// GET /api/v1/configs/{name}/{version}
pub async fn get_config_payload(
    State(state): State<ApiState>,
    Path((name, version)): Path<(String, u64)>,
) -> Response {
    match state.reconciler.configs().get(&name, version) {
        Ok(payload) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            payload,
        )
            .into_response(),
        Err(e) => reconcile_error(e.into()),
    }
}

/// POST /api/v1/configs/prune
pub async fn prune_configs(State(state): State<ApiState>) -> Response {
    match state.reconciler.prune_configs() {
        Ok(removed) => ApiResponse::ok(infos(&removed)).into_response(),
        Err(e) => reconcile_error(e),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use stackgrid_config::ConfigStore;
    use stackgrid_orchestrator::SimulatedOrchestrator;
    use stackgrid_reconciler::{Reconciler, ReconcilerConfig};
    use stackgrid_state::StateStore;

    fn test_state() -> ApiState {
        let store = StateStore::open_in_memory().unwrap();
        let configs = ConfigStore::new(store.clone());
        ApiState {
            reconciler: Reconciler::new(
                store,
                configs,
                Arc::new(SimulatedOrchestrator::new()),
                ReconcilerConfig::default(),
            ),
        }
    }

    #[tokio::test]
    async fn upload_then_fetch_payload() {
        let state = test_state();

        let resp = put_config(
            State(state.clone()),
            Path("proxy-rules".to_string()),
            Bytes::from_static(b"route / -> web"),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = get_config_payload(State(state.clone()), Path(("proxy-rules".to_string(), 1))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/octet-stream"
        );

        let resp = list_config_versions(State(state), Path("proxy-rules".to_string())).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_version_is_not_found() {
        let state = test_state();
        let resp = get_config_payload(State(state.clone()), Path(("rules".to_string(), 3))).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = list_config_versions(State(state), Path("rules".to_string())).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_config_name_is_bad_request() {
        let resp = put_config(
            State(test_state()),
            Path("a:b".to_string()),
            Bytes::from_static(b"x"),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn prune_reports_removed_versions() {
        let state = test_state();
        state.reconciler.update_config("rules", b"1").unwrap();
        state.reconciler.update_config("rules", b"2").unwrap();

        let resp = prune_configs(State(state.clone())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.reconciler.configs().list_versions("rules").unwrap().len(), 1);
    }
}
