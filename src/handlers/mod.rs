//! HTTP endpoint handlers for the exporter.
//!
//! This module provides handlers for all HTTP endpoints:
//! - `/`: Plain-text landing page with scrape statistics
//! - `/metrics`: Prometheus metrics endpoint (auth + rate limit)
//! - `/healthz`, `/livez`: Liveness checks
//! - `/readyz`: Readiness check against every database target
//! - `/configz`: Loaded targets and custom metric definitions (auth)

pub mod auth;
pub mod config;
pub mod health;
pub mod metrics;
pub mod root;

use axum::{routing::get, Router};

use crate::state::SharedState;

// Re-export handlers
pub use config::configz_handler;
pub use health::{healthz_handler, livez_handler, readyz_handler};
pub use metrics::metrics_handler;
pub use root::root_handler;

/// Builds the application router.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/livez", get(livez_handler))
        .route("/readyz", get(readyz_handler))
        .route("/configz", get(configz_handler))
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use futures::future::BoxFuture;
    use pg_custom_exporter::queries::{bind_query_definitions, QueryDefinition};
    use pg_custom_exporter::{
        Connection, Connector, ConnectorError, InstrumentRegistry, MetricKind, Row,
        ScrapeOrchestrator, Target, TargetRegistry,
    };
    use std::path::PathBuf;
    use std::sync::Arc;
    use tokio::sync::Notify;

    use crate::config::Config;
    use crate::state::{AppState, SharedState};

    pub const API_KEY: &str = "test-key";

    struct StaticConnection;

    impl Connection for StaticConnection {
        fn query<'a>(
            &'a mut self,
            sql: &'a str,
        ) -> BoxFuture<'a, Result<Vec<Row>, ConnectorError>> {
            Box::pin(async move {
                if sql.contains("pg_stat_activity") {
                    Ok(vec![Row::new().with("count", 3i64)])
                } else if sql.contains("pg_database") {
                    Ok(vec![Row::new().with("datname", "app").with("size", 8192i64)])
                } else {
                    Ok(vec![Row::new().with("queue", "mail").with("depth", 7i64)])
                }
            })
        }
    }

    pub struct StaticConnector {
        pub fail: bool,
        pub hold: Option<Arc<Notify>>,
    }

    impl Connector for StaticConnector {
        fn acquire(&self) -> BoxFuture<'_, Result<Box<dyn Connection>, ConnectorError>> {
            let fail = self.fail;
            let hold = self.hold.clone();
            Box::pin(async move {
                if let Some(hold) = hold {
                    hold.notified().await;
                }
                if fail {
                    Err(ConnectorError::Acquire("connection refused".to_string()))
                } else {
                    Ok(Box::new(StaticConnection) as Box<dyn Connection>)
                }
            })
        }

        fn close(&self) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
    }

    /// Two targets, `primary` healthy and `replica` as configured.
    pub fn state_with(api_key: Option<&str>, replica_fails: bool, rate_limit: bool) -> SharedState {
        state_from(
            vec![
                Target::new("primary", Arc::new(StaticConnector { fail: false, hold: None })),
                Target::new(
                    "replica",
                    Arc::new(StaticConnector {
                        fail: replica_fails,
                        hold: None,
                    }),
                ),
            ],
            api_key,
            rate_limit,
        )
    }

    /// One healthy target whose `acquire` waits on `hold`.
    pub fn held_state(api_key: Option<&str>, hold: Arc<Notify>) -> SharedState {
        state_from(
            vec![Target::new(
                "primary",
                Arc::new(StaticConnector {
                    fail: false,
                    hold: Some(hold),
                }),
            )],
            api_key,
            false,
        )
    }

    fn state_from(targets: Vec<Target>, api_key: Option<&str>, rate_limit: bool) -> SharedState {
        let targets = TargetRegistry::new(targets).unwrap();

        let instruments = Arc::new(InstrumentRegistry::with_default_labels().unwrap());
        let queries = bind_query_definitions(
            &instruments,
            vec![QueryDefinition {
                name: "queue_depth".to_string(),
                help: "Pending jobs per queue".to_string(),
                kind: MetricKind::Gauge,
                labels: vec!["queue".to_string()],
                query: "SELECT queue, depth FROM jobs".to_string(),
                value_field: None,
            }],
        );

        let orchestrator = Arc::new(ScrapeOrchestrator::new(targets, instruments, queries));

        let config = Config {
            targets_file: Some(PathBuf::from("/etc/dbs.yaml")),
            api_key: api_key.map(str::to_string),
            enable_rate_limit: Some(rate_limit),
            ..Config::default()
        };

        Arc::new(AppState::new(orchestrator, config))
    }
}
