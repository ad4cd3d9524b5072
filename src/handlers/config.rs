//! Configuration inspection endpoint handler.
//!
//! `/configz` lists the configured database targets by name and the accepted
//! custom metric definitions. Connection settings are never exposed.

use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use pg_custom_exporter::QueryDefinition;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::handlers::auth::authorize;
use crate::state::SharedState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigzResponse<'a> {
    pub databases: Vec<String>,
    pub custom_metrics: Vec<&'a QueryDefinition>,
}

/// Handler for the /configz endpoint.
#[instrument(skip(state, headers))]
pub async fn configz_handler(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    debug!("Processing /configz request");
    state.stats.record_http_request();

    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }

    let orchestrator = &state.orchestrator;
    let response = ConfigzResponse {
        databases: orchestrator.targets().names(),
        custom_metrics: orchestrator
            .queries()
            .iter()
            .map(|bound| &bound.definition)
            .collect(),
    };

    Json(response).into_response()
}
