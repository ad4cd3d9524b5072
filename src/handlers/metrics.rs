//! Metrics endpoint handler for Prometheus scraping.
//!
//! Every authorized, admitted request triggers one collection cycle and
//! returns the rendered instruments. Failures are answered with a
//! comment-only exposition body and a non-2xx status.

use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use pg_custom_exporter::ScrapeError;
use tracing::{debug, error, instrument, warn};

use crate::handlers::auth::authorize;
use crate::state::SharedState;

pub const BUSY_BODY: &str = "# Exporter scrape already in progress\n";
pub const SCRAPE_FAILED_BODY: &str = "# Exporter scrape failed\n";
pub const OUTPUT_FAILURE_BODY: &str = "# Exporter output failure\n";
pub const RATE_LIMITED_BODY: &str = "# Exporter rate limit exceeded\n";

fn comment_response(status: StatusCode, body: &'static str) -> Response {
    (status, [(CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response()
}

/// Handler for the /metrics endpoint.
#[instrument(skip(state, headers))]
pub async fn metrics_handler(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    debug!("Processing /metrics request");
    state.stats.record_http_request();

    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }

    if let Some(limiter) = &state.rate_limiter {
        if !limiter.try_acquire() {
            state.stats.record_rate_limited();
            warn!("Rate limit exceeded on /metrics");
            return comment_response(StatusCode::TOO_MANY_REQUESTS, RATE_LIMITED_BODY);
        }
    }

    match state.orchestrator.collect_and_render().await {
        Ok((report, rendered)) => {
            state.stats.record_cycle(&report);
            debug!(
                "Rendered {} bytes ({} target(s) failed)",
                rendered.body.len(),
                report.failed_count()
            );
            (
                StatusCode::OK,
                [(CONTENT_TYPE, rendered.content_type)],
                rendered.body,
            )
                .into_response()
        }
        Err(e) if e.is_busy() => {
            state.stats.record_busy();
            comment_response(StatusCode::SERVICE_UNAVAILABLE, BUSY_BODY)
        }
        Err(ScrapeError::Collect(e)) => {
            error!("[ERROR] Failed to collect metrics: {}", e);
            state.stats.record_cycle_failure();
            comment_response(StatusCode::INTERNAL_SERVER_ERROR, SCRAPE_FAILED_BODY)
        }
        Err(ScrapeError::Render(e)) => {
            error!("[ERROR] Failed to generate metrics output: {}", e);
            state.stats.record_render_failure();
            comment_response(StatusCode::INTERNAL_SERVER_ERROR, OUTPUT_FAILURE_BODY)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::build_router;
    use crate::handlers::test_support::{held_state, state_with, API_KEY};
    use std::sync::Arc;
    use tokio::sync::Notify;
    use axum::body::{to_bytes, Body};
    use axum::http::{header::AUTHORIZATION, Request};
    use tower::ServiceExt;

    fn request(key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/metrics");
        if let Some(key) = key {
            builder = builder.header(AUTHORIZATION, format!("Bearer {key}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_requires_configured_key() {
        let app = build_router(state_with(None, false, false));
        let response = app.oneshot(request(Some(API_KEY))).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_metrics_rejects_wrong_key() {
        let app = build_router(state_with(Some(API_KEY), false, false));
        let response = app.oneshot(request(Some("nope"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_string(response).await, "Forbidden");
    }

    #[tokio::test]
    async fn test_metrics_partial_failure_still_renders() {
        let state = state_with(Some(API_KEY), true, false);
        let app = build_router(state.clone());
        let response = app.oneshot(request(Some(API_KEY))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_string(response).await;
        assert!(body.contains("pg_scrape_success{db=\"primary\",exporter=\"custom_pg_exporter\"} 1"));
        assert!(body.contains("pg_scrape_success{db=\"replica\",exporter=\"custom_pg_exporter\"} 0"));
        assert!(body.contains("exporter_errors_total{exporter=\"custom_pg_exporter\"} 1"));
        assert!(body.contains("queue_depth{db=\"primary\",exporter=\"custom_pg_exporter\",queue=\"mail\"} 7"));
        assert!(!state.orchestrator.is_in_flight());
    }

    #[tokio::test]
    async fn test_metrics_rate_limited() {
        let state = state_with(Some(API_KEY), false, true);
        for _ in 0..2 {
            let response = build_router(state.clone())
                .oneshot(request(Some(API_KEY)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = build_router(state.clone())
            .oneshot(request(Some(API_KEY)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_string(response).await, RATE_LIMITED_BODY);
    }

    #[tokio::test]
    async fn test_metrics_busy_while_cycle_in_flight() {
        let hold = Arc::new(Notify::new());
        let state = held_state(Some(API_KEY), Arc::clone(&hold));

        let first = tokio::spawn({
            let app = build_router(state.clone());
            async move { app.oneshot(request(Some(API_KEY))).await.unwrap() }
        });

        while !state.orchestrator.is_in_flight() {
            tokio::task::yield_now().await;
        }

        let response = build_router(state.clone())
            .oneshot(request(Some(API_KEY)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_string(response).await, BUSY_BODY);

        hold.notify_one();
        let response = first.await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response)
            .await
            .contains("exporter_scrape_lockouts_total{exporter=\"custom_pg_exporter\"} 1"));
    }
}
