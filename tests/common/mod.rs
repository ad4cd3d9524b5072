//! In-memory database fakes shared by the integration tests.

#![allow(dead_code)]

use futures::future::BoxFuture;
use pg_custom_exporter::orchestrator::{
    ACTIVE_CONNECTIONS_QUERY, DATABASE_SIZE_QUERY, READINESS_QUERY,
};
use pg_custom_exporter::queries::{bind_query_definitions, QueryDefinition};
use pg_custom_exporter::{
    Connection, Connector, ConnectorError, InstrumentRegistry, MetricKind, Row,
    ScrapeOrchestrator, Target, TargetRegistry,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// What a fake target answers.
#[derive(Clone)]
pub struct Script {
    pub fail_acquire: bool,
    pub fail_builtins: bool,
    pub fail_custom: bool,
    pub panic_on_query: bool,
    pub active_connections: i64,
    pub custom_rows: Vec<Row>,
}

impl Script {
    pub fn healthy() -> Self {
        Self {
            fail_acquire: false,
            fail_builtins: false,
            fail_custom: false,
            panic_on_query: false,
            active_connections: 3,
            custom_rows: vec![
                Row::new().with("queue", "mail").with("depth", 7i64),
                Row::new().with("queue", "sms").with("depth", 2i64),
            ],
        }
    }

    pub fn unreachable() -> Self {
        Self {
            fail_acquire: true,
            ..Self::healthy()
        }
    }
}

/// Blocks `acquire` until released, so a cycle can be held in flight.
#[derive(Clone, Default)]
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

pub struct FakeConnector {
    script: Script,
    gate: Option<Gate>,
    pub acquired: Arc<AtomicUsize>,
    pub released: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            gate: None,
            acquired: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn gated(script: Script, gate: Gate) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(script)
        }
    }
}

struct FakeConnection {
    script: Script,
    released: Arc<AtomicUsize>,
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl Connection for FakeConnection {
    fn query<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<Vec<Row>, ConnectorError>> {
        Box::pin(async move {
            if self.script.panic_on_query {
                panic!("driver crashed");
            }

            if sql == ACTIVE_CONNECTIONS_QUERY {
                if self.script.fail_builtins {
                    return Err(ConnectorError::Query("permission denied".to_string()));
                }
                return Ok(vec![Row::new().with("count", self.script.active_connections)]);
            }

            if sql == DATABASE_SIZE_QUERY {
                return Ok(vec![
                    Row::new().with("datname", "app").with("size", 4096i64),
                    Row::new().with("datname", "postgres").with("size", 1024i64),
                ]);
            }

            if sql == READINESS_QUERY {
                return Ok(vec![Row::new().with("?column?", 1i32)]);
            }

            if self.script.fail_custom {
                return Err(ConnectorError::Query("relation \"jobs\" does not exist".to_string()));
            }
            Ok(self.script.custom_rows.clone())
        })
    }
}

impl Connector for FakeConnector {
    fn acquire(&self) -> BoxFuture<'_, Result<Box<dyn Connection>, ConnectorError>> {
        Box::pin(async move {
            if let Some(gate) = &self.gate {
                gate.entered.notify_one();
                gate.release.notified().await;
            }

            if self.script.fail_acquire {
                return Err(ConnectorError::Acquire("connection refused".to_string()));
            }

            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeConnection {
                script: self.script.clone(),
                released: Arc::clone(&self.released),
            }) as Box<dyn Connection>)
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

pub fn queue_depth_definition(kind: MetricKind) -> QueryDefinition {
    QueryDefinition {
        name: "queue_depth".to_string(),
        help: "Pending jobs per queue".to_string(),
        kind,
        labels: vec!["queue".to_string()],
        query: "SELECT queue, depth FROM jobs".to_string(),
        value_field: None,
    }
}

pub fn targets(fakes: Vec<(&str, FakeConnector)>) -> TargetRegistry {
    TargetRegistry::new(
        fakes
            .into_iter()
            .map(|(name, fake)| Target::new(name, Arc::new(fake) as Arc<dyn Connector>))
            .collect(),
    )
    .unwrap()
}

pub fn orchestrator(
    targets: TargetRegistry,
    definitions: Vec<QueryDefinition>,
) -> (ScrapeOrchestrator, Arc<InstrumentRegistry>) {
    let instruments = Arc::new(InstrumentRegistry::with_default_labels().unwrap());
    let queries = bind_query_definitions(&instruments, definitions);
    (
        ScrapeOrchestrator::new(targets, Arc::clone(&instruments), queries),
        instruments,
    )
}

/// Value of a sample of `metric` carrying all `labels`.
pub fn value(instruments: &InstrumentRegistry, metric: &str, labels: &[(&str, &str)]) -> Option<f64> {
    instruments.snapshot(metric)?.value_with(labels)
}
