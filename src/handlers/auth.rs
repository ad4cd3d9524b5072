//! Bearer-token check shared by the protected endpoints.

use axum::{
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::state::AppState;

/// Rejects the request unless `Authorization: Bearer <key>` matches the
/// configured key exactly. Without a configured key every request is
/// rejected.
pub fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(api_key) = state.api_key() else {
        warn!("[AUTH] No API key set");
        return Err(forbidden());
    };

    let provided = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    let expected = format!("Bearer {}", api_key);

    if provided != Some(expected.as_str()) {
        return Err(forbidden());
    }

    Ok(())
}

fn forbidden() -> Response {
    (StatusCode::FORBIDDEN, "Forbidden").into_response()
}
