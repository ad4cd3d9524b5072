//! Scrape orchestration.
//!
//! A collection cycle runs one task per target concurrently and waits for
//! all of them to settle; a failing target never aborts the others. At most
//! one cycle runs at a time: a trigger that arrives while a cycle is in
//! flight is rejected (not queued) and counted in
//! `exporter_scrape_lockouts_total`.

use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::connector::Connection;
use crate::error::{CollectError, ConnectorError, RenderError, ScrapeError};
use crate::extraction::{collect_custom_metrics, CustomScrapeSummary};
use crate::instruments::{BuiltinMetrics, InstrumentRegistry, Rendered};
use crate::queries::BoundQuery;
use crate::targets::{Target, TargetRegistry};

pub const ACTIVE_CONNECTIONS_QUERY: &str =
    "SELECT COUNT(*) AS count FROM pg_stat_activity WHERE state = 'active'";

pub const DATABASE_SIZE_QUERY: &str = "SELECT pg_database.datname, \
     pg_database_size(pg_database.datname) AS size \
     FROM pg_database WHERE datistemplate = false";

pub const READINESS_QUERY: &str = "SELECT 1";

/// Result of one target's scrape within a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeOutcome {
    pub target: String,
    pub succeeded: bool,
    pub error: Option<String>,
    pub duration_seconds: f64,
}

impl ScrapeOutcome {
    fn failed(target: &str, error: String, duration_seconds: f64) -> Self {
        Self {
            target: target.to_string(),
            succeeded: false,
            error: Some(error),
            duration_seconds,
        }
    }
}

/// Per-target outcomes of a completed cycle, in target order.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub outcomes: Vec<ScrapeOutcome>,
    pub duration_seconds: f64,
}

impl CycleReport {
    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.succeeded).count()
    }

    pub fn succeeded_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded).count()
    }

    pub fn outcome(&self, target: &str) -> Option<&ScrapeOutcome> {
        self.outcomes.iter().find(|o| o.target == target)
    }
}

/// Holds the single-flight flag for the duration of a cycle. Dropping it
/// records the cycle duration and clears the flag on every exit path.
struct CycleGuard {
    inner: Arc<Inner>,
    start: Instant,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.inner
            .instruments
            .builtins()
            .set_scrape_duration(self.start.elapsed().as_secs_f64());
        self.inner.in_flight.store(false, Ordering::Release);
    }
}

struct Inner {
    targets: TargetRegistry,
    instruments: Arc<InstrumentRegistry>,
    queries: Arc<[BoundQuery]>,
    in_flight: AtomicBool,
}

/// Coordinates collection cycles across all configured targets.
pub struct ScrapeOrchestrator {
    inner: Arc<Inner>,
}

impl ScrapeOrchestrator {
    pub fn new(
        targets: TargetRegistry,
        instruments: Arc<InstrumentRegistry>,
        queries: Vec<BoundQuery>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                targets,
                instruments,
                queries: queries.into(),
                in_flight: AtomicBool::new(false),
            }),
        }
    }

    pub fn targets(&self) -> &TargetRegistry {
        &self.inner.targets
    }

    pub fn instruments(&self) -> &InstrumentRegistry {
        &self.inner.instruments
    }

    pub fn queries(&self) -> &[BoundQuery] {
        &self.inner.queries
    }

    /// Whether a collection cycle currently holds the gate.
    pub fn is_in_flight(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Runs one collection cycle.
    ///
    /// Individual target failures are reported in the [`CycleReport`] and
    /// never fail the cycle. Only a rejected trigger (`Busy`) or a cycle that
    /// could not be driven to completion (`Collection`) return an error.
    ///
    /// The cycle runs on its own task: dropping the returned future does not
    /// stop it, and the gate stays held until every target has settled.
    #[instrument(skip(self))]
    pub async fn collect(&self) -> Result<CycleReport, CollectError> {
        if self
            .inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.inner.instruments.builtins().inc_lockouts();
            warn!("Scrape already in progress, rejecting request");
            return Err(CollectError::Busy);
        }

        let guard = CycleGuard {
            inner: Arc::clone(&self.inner),
            start: Instant::now(),
        };

        match tokio::spawn(run_cycle(guard)).await {
            Ok(result) => result,
            Err(e) => {
                error!("[COLLECT] Collection cycle did not complete: {}", e);
                Err(CollectError::Collection(e.to_string()))
            }
        }
    }

    /// Encodes the current instrument values.
    pub fn render(&self) -> Result<Rendered, RenderError> {
        self.inner.instruments.render()
    }

    /// Runs a cycle and renders the result.
    pub async fn collect_and_render(&self) -> Result<(CycleReport, Rendered), ScrapeError> {
        let report = self.collect().await?;
        let rendered = self.render()?;
        Ok((report, rendered))
    }

    /// Acquires a connection and runs `SELECT 1` on every target in order.
    /// Returns the first target that is not ready.
    pub async fn probe_targets(&self) -> Result<(), (String, ConnectorError)> {
        for target in self.inner.targets.targets() {
            let result = async {
                let mut conn = target.connector.acquire().await?;
                let rows = conn.query(READINESS_QUERY).await?;
                debug!(db = %target.name, "Readiness probe returned {} row(s)", rows.len());
                Ok::<(), ConnectorError>(())
            }
            .await;

            if let Err(e) = result {
                return Err((target.name.clone(), e));
            }
        }
        Ok(())
    }
}

async fn run_cycle(guard: CycleGuard) -> Result<CycleReport, CollectError> {
    let inner = Arc::clone(&guard.inner);
    let builtins = inner.instruments.builtins();

    debug!("Starting collection cycle for {} target(s)", inner.targets.len());

    let handles: Vec<_> = inner
        .targets
        .targets()
        .iter()
        .map(|target| {
            tokio::spawn(scrape_target(
                target.clone(),
                Arc::clone(&inner.instruments),
                Arc::clone(&inner.queries),
            ))
        })
        .collect();

    let results = join_all(handles).await;

    let mut outcomes = Vec::with_capacity(results.len());
    let mut orchestration_error: Option<String> = None;

    for (target, result) in inner.targets.targets().iter().zip(results) {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => {
                error!(db = %target.name, "[COLLECT] Scrape task panicked");
                ScrapeOutcome::failed(&target.name, "scrape task panicked".to_string(), 0.0)
            }
            Err(e) => {
                error!(db = %target.name, "[COLLECT] Scrape task did not complete: {}", e);
                orchestration_error.get_or_insert_with(|| e.to_string());
                ScrapeOutcome::failed(&target.name, e.to_string(), 0.0)
            }
        };

        builtins.set_scrape_success(&outcome.target, outcome.succeeded);
        if !outcome.succeeded {
            builtins.inc_errors();
        }
        outcomes.push(outcome);
    }

    let duration_seconds = guard.start.elapsed().as_secs_f64();
    drop(guard);

    if let Some(message) = orchestration_error {
        return Err(CollectError::Collection(message));
    }

    let report = CycleReport {
        outcomes,
        duration_seconds,
    };
    info!(
        "Collection cycle finished in {:.3}s: {} ok, {} failed",
        duration_seconds,
        report.succeeded_count(),
        report.failed_count()
    );
    Ok(report)
}

async fn scrape_target(
    target: Target,
    instruments: Arc<InstrumentRegistry>,
    queries: Arc<[BoundQuery]>,
) -> ScrapeOutcome {
    let start = Instant::now();
    let result = run_target(&target, instruments.builtins(), &queries).await;
    let elapsed = start.elapsed().as_secs_f64();

    instruments
        .builtins()
        .set_target_scrape_duration(&target.name, elapsed);

    match result {
        Ok(summary) => {
            debug!(
                db = %target.name,
                "Target scraped in {:.3}s ({} custom ok, {} custom failed, {} samples)",
                elapsed,
                summary.succeeded,
                summary.failed,
                summary.samples
            );
            ScrapeOutcome {
                target: target.name,
                succeeded: true,
                error: None,
                duration_seconds: elapsed,
            }
        }
        Err(e) => {
            error!(db = %target.name, "[COLLECT] Failed to gather metrics: {}", e);
            ScrapeOutcome::failed(&target.name, e.to_string(), elapsed)
        }
    }
}

/// Built-in queries first, then every custom query. The connection is
/// released when `conn` goes out of scope, on every path.
async fn run_target(
    target: &Target,
    builtins: &BuiltinMetrics,
    queries: &[BoundQuery],
) -> Result<CustomScrapeSummary, ConnectorError> {
    let mut conn = target.connector.acquire().await?;

    let builtin_result = collect_builtin_metrics(&mut *conn, &target.name, builtins).await;
    let summary = collect_custom_metrics(&mut *conn, &target.name, queries).await;

    builtin_result.map(|_| summary)
}

async fn collect_builtin_metrics(
    conn: &mut dyn Connection,
    db: &str,
    builtins: &BuiltinMetrics,
) -> Result<(), ConnectorError> {
    let rows = conn.query(ACTIVE_CONNECTIONS_QUERY).await?;
    let active = rows
        .first()
        .and_then(|row| row.number("count"))
        .ok_or_else(|| ConnectorError::Decode("active connection count missing".to_string()))?;
    builtins.set_active_connections(db, active);

    let rows = conn.query(DATABASE_SIZE_QUERY).await?;
    for row in &rows {
        let Some(datname) = row.get("datname") else {
            continue;
        };
        match row.number("size") {
            Some(size) => builtins.set_database_size(db, &datname.to_string(), size),
            None => debug!(db = %db, database = %datname, "Database size not available"),
        }
    }

    Ok(())
}
