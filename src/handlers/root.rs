//! Root endpoint handler for the landing page.
//!
//! This module provides the `/` endpoint handler that displays a plain-text
//! overview: version, uptime, targets, endpoints and scrape statistics.

use axum::{extract::State, response::IntoResponse};
use std::fmt::Write as FmtWrite;
use tracing::{debug, instrument};

use crate::state::SharedState;

const ENDPOINTS: [(&str, &str); 6] = [
    ("/metrics", "Prometheus metrics (bearer token, rate limited)"),
    ("/healthz", "Liveness check"),
    ("/livez", "Liveness check"),
    ("/readyz", "Readiness check against every database"),
    ("/configz", "Loaded databases and custom metrics (bearer token)"),
    ("/", "This page"),
];

/// Handler for the root `/` endpoint.
#[instrument(skip(state))]
pub async fn root_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing / request");
    state.stats.record_http_request();

    let version = env!("CARGO_PKG_VERSION");

    let uptime_secs = state.stats.get_uptime_seconds();
    let hours = uptime_secs / 3600;
    let minutes = (uptime_secs % 3600) / 60;
    let seconds = uptime_secs % 60;

    let orchestrator = &state.orchestrator;
    let mut out = String::new();

    writeln!(out, "pg-custom-exporter {}", version).ok();
    writeln!(out).ok();
    writeln!(out, "Uptime: {}h {}m {}s", hours, minutes, seconds).ok();
    writeln!(out, "Databases: {}", orchestrator.targets().names().join(", ")).ok();
    writeln!(out, "Custom metrics: {}", orchestrator.queries().len()).ok();
    writeln!(
        out,
        "Scrape in progress: {}",
        if orchestrator.is_in_flight() { "yes" } else { "no" }
    )
    .ok();
    writeln!(out).ok();

    writeln!(out, "ENDPOINTS").ok();
    writeln!(out, "=========").ok();
    for (path, description) in ENDPOINTS {
        writeln!(out, "{:10} {}", path, description).ok();
    }
    writeln!(out).ok();

    out.push_str(&state.stats.render_table());

    ([("Content-Type", "text/plain; charset=utf-8")], out)
}
