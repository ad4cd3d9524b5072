//! Liveness and readiness endpoint handlers.
//!
//! `/healthz` and `/livez` only report that the process serves HTTP.
//! `/readyz` checks out a connection from every target and runs a trivial
//! query; the first target that fails makes the exporter not ready.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::{debug, error, instrument};

use crate::state::SharedState;

/// Handler for the /healthz endpoint.
#[instrument(skip(state))]
pub async fn healthz_handler(State(state): State<SharedState>) -> impl IntoResponse {
    state.stats.record_http_request();
    (StatusCode::OK, "OK")
}

/// Handler for the /livez endpoint.
#[instrument(skip(state))]
pub async fn livez_handler(State(state): State<SharedState>) -> impl IntoResponse {
    state.stats.record_http_request();
    (StatusCode::OK, "OK")
}

/// Handler for the /readyz endpoint.
#[instrument(skip(state))]
pub async fn readyz_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /readyz request");
    state.stats.record_http_request();

    match state.orchestrator.probe_targets().await {
        Ok(()) => (StatusCode::OK, "OK".to_string()),
        Err((name, e)) => {
            error!(db = %name, "[READYZ] Database \"{}\" not ready: {}", name, e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Not Ready: {}", name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::build_router;
    use crate::handlers::test_support::state_with;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get(state: SharedState, uri: &str) -> (StatusCode, String) {
        let response = build_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_liveness_needs_no_auth() {
        let state = state_with(None, true, false);
        assert_eq!(get(state.clone(), "/healthz").await, (StatusCode::OK, "OK".to_string()));
        assert_eq!(get(state, "/livez").await, (StatusCode::OK, "OK".to_string()));
    }

    #[tokio::test]
    async fn test_readyz_all_targets_reachable() {
        let state = state_with(None, false, false);
        assert_eq!(get(state, "/readyz").await, (StatusCode::OK, "OK".to_string()));
    }

    #[tokio::test]
    async fn test_readyz_names_failing_target() {
        let state = state_with(None, true, false);
        assert_eq!(
            get(state, "/readyz").await,
            (StatusCode::INTERNAL_SERVER_ERROR, "Not Ready: replica".to_string())
        );
    }
}
