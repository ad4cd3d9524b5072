//! Metric instrument registry.
//!
//! Process-wide mapping from exposed metric name to a typed, labeled
//! instrument backed by a `prometheus` vector. Built-in exporter and
//! PostgreSQL health metrics are registered unconditionally; custom query
//! metrics are added at load time and rejected when their name collides with
//! anything already exposed.

use ahash::AHashMap as HashMap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use prometheus::proto::MetricType;
use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::error::{RegistryError, RenderError};

/// Label injected on every per-target sample.
pub const DB_LABEL: &str = "db";

pub const EXPORTER_UP: &str = "exporter_up";
pub const EXPORTER_SCRAPE_DURATION: &str = "exporter_scrape_duration_seconds";
pub const EXPORTER_ERRORS_TOTAL: &str = "exporter_errors_total";
pub const EXPORTER_SCRAPE_LOCKOUTS_TOTAL: &str = "exporter_scrape_lockouts_total";
pub const PG_ACTIVE_CONNECTIONS: &str = "pg_active_connections";
pub const PG_DATABASE_SIZE_BYTES: &str = "pg_database_size_bytes";
pub const PG_SCRAPE_SUCCESS: &str = "pg_scrape_success";
pub const PG_SCRAPE_DURATION: &str = "pg_scrape_duration_seconds";

/// Default process-wide label applied to every exposed series.
pub const DEFAULT_EXPORTER_LABEL: (&str, &str) = ("exporter", "custom_pg_exporter");

/// Instrument type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Gauge => f.write_str("gauge"),
            MetricKind::Counter => f.write_str("counter"),
        }
    }
}

/// Operator-declared shape of a custom instrument. The `db` label is added
/// by the registry and must not be declared here.
#[derive(Debug, Clone)]
pub struct InstrumentSpec {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub label_keys: Vec<String>,
}

#[derive(Clone)]
enum Vector {
    Gauge(GaugeVec),
    Counter(CounterVec),
}

/// Labeled numeric container bound to one exposed metric name.
#[derive(Clone)]
pub struct MetricInstrument {
    name: Arc<str>,
    kind: MetricKind,
    label_names: Arc<[String]>,
    vector: Vector,
}

impl fmt::Debug for MetricInstrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricInstrument")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("label_names", &self.label_names)
            .finish()
    }
}

impl MetricInstrument {
    fn build(name: &str, help: &str, kind: MetricKind, labels: Vec<String>) -> Result<Self, RegistryError> {
        let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();
        let opts = Opts::new(name, help);
        let vector = match kind {
            MetricKind::Gauge => GaugeVec::new(opts, &label_refs).map(Vector::Gauge),
            MetricKind::Counter => CounterVec::new(opts, &label_refs).map(Vector::Counter),
        }
        .map_err(|e| RegistryError::InvalidMetric {
            metric: name.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            name: Arc::from(name),
            kind,
            label_names: labels.into(),
            vector,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Full label schema, including `db` where applicable.
    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    /// Label values in schema order. Keys absent from `labels` are exposed
    /// as the empty string, which Prometheus treats as an absent label.
    fn values<'a>(&'a self, labels: &'a HashMap<String, String>) -> Vec<&'a str> {
        self.label_names
            .iter()
            .map(|k| labels.get(k).map(String::as_str).unwrap_or(""))
            .collect()
    }

    /// Overwrites the gauge value for a label set.
    pub fn set(&self, labels: &HashMap<String, String>, value: f64) -> Result<(), RegistryError> {
        match &self.vector {
            Vector::Gauge(v) => {
                v.with_label_values(&self.values(labels)).set(value);
                Ok(())
            }
            Vector::Counter(_) => Err(self.invalid("set is not supported on a counter")),
        }
    }

    /// Increments the counter for a label set. Negative and NaN increments
    /// are rejected; a counter never decreases.
    pub fn inc(&self, labels: &HashMap<String, String>, value: f64) -> Result<(), RegistryError> {
        match &self.vector {
            Vector::Counter(v) => {
                if value.is_nan() || value < 0.0 {
                    return Err(self.invalid(&format!("counter increment must be >= 0, got {value}")));
                }
                v.with_label_values(&self.values(labels)).inc_by(value);
                Ok(())
            }
            Vector::Gauge(_) => Err(self.invalid("inc is not supported on a gauge")),
        }
    }

    /// `set` for gauges, `inc` by value for counters.
    pub fn apply(&self, labels: &HashMap<String, String>, value: f64) -> Result<(), RegistryError> {
        match self.kind {
            MetricKind::Gauge => self.set(labels, value),
            MetricKind::Counter => self.inc(labels, value),
        }
    }

    fn invalid(&self, message: &str) -> RegistryError {
        RegistryError::InvalidMetric {
            metric: self.name.to_string(),
            message: message.to_string(),
        }
    }

    // Unlabeled and `db`-only helpers for the built-ins. Their label schemas
    // are fixed at construction, so the positional form cannot mismatch.

    fn gauge_at(&self, values: &[&str]) -> Option<prometheus::Gauge> {
        match &self.vector {
            Vector::Gauge(v) => Some(v.with_label_values(values)),
            Vector::Counter(_) => None,
        }
    }

    fn counter_at(&self, values: &[&str]) -> Option<prometheus::Counter> {
        match &self.vector {
            Vector::Counter(v) => Some(v.with_label_values(values)),
            Vector::Gauge(_) => None,
        }
    }

    fn boxed(&self) -> Box<dyn prometheus::core::Collector> {
        match &self.vector {
            Vector::Gauge(v) => Box::new(v.clone()),
            Vector::Counter(v) => Box::new(v.clone()),
        }
    }
}

/// Typed access to the built-in instruments.
#[derive(Clone)]
pub struct BuiltinMetrics {
    pub exporter_up: MetricInstrument,
    pub scrape_duration: MetricInstrument,
    pub errors_total: MetricInstrument,
    pub lockouts_total: MetricInstrument,
    pub active_connections: MetricInstrument,
    pub database_size_bytes: MetricInstrument,
    pub scrape_success: MetricInstrument,
    pub target_scrape_duration: MetricInstrument,
}

impl BuiltinMetrics {
    pub fn set_scrape_duration(&self, seconds: f64) {
        if let Some(g) = self.scrape_duration.gauge_at(&[]) {
            g.set(seconds);
        }
    }

    pub fn inc_errors(&self) {
        if let Some(c) = self.errors_total.counter_at(&[]) {
            c.inc();
        }
    }

    pub fn inc_lockouts(&self) {
        if let Some(c) = self.lockouts_total.counter_at(&[]) {
            c.inc();
        }
    }

    pub fn set_active_connections(&self, db: &str, count: f64) {
        if let Some(g) = self.active_connections.gauge_at(&[db]) {
            g.set(count);
        }
    }

    pub fn set_database_size(&self, db: &str, database: &str, bytes: f64) {
        if let Some(g) = self.database_size_bytes.gauge_at(&[db, database]) {
            g.set(bytes);
        }
    }

    pub fn set_scrape_success(&self, db: &str, success: bool) {
        if let Some(g) = self.scrape_success.gauge_at(&[db]) {
            g.set(if success { 1.0 } else { 0.0 });
        }
    }

    pub fn set_target_scrape_duration(&self, db: &str, seconds: f64) {
        if let Some(g) = self.target_scrape_duration.gauge_at(&[db]) {
            g.set(seconds);
        }
    }
}

/// One labeled value in a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSnapshot {
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

/// Point-in-time view of one metric family.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSnapshot {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub samples: Vec<SampleSnapshot>,
}

impl MetricSnapshot {
    /// Value of the sample whose labels include every given pair.
    pub fn value_with(&self, labels: &[(&str, &str)]) -> Option<f64> {
        self.samples
            .iter()
            .find(|s| {
                labels
                    .iter()
                    .all(|(k, v)| s.labels.iter().any(|(lk, lv)| lk == k && lv == v))
            })
            .map(|s| s.value)
    }
}

/// Encoded exposition body.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub body: String,
    pub content_type: String,
}

/// Name-keyed instrument registry.
pub struct InstrumentRegistry {
    registry: Registry,
    instruments: DashMap<String, MetricInstrument>,
    reserved_labels: Vec<String>,
    builtins: BuiltinMetrics,
}

impl InstrumentRegistry {
    /// Creates the registry with the built-in instruments and the given
    /// process-wide constant labels.
    pub fn new(const_labels: HashMap<String, String>) -> Result<Self, RegistryError> {
        let registry = if const_labels.is_empty() {
            Registry::new()
        } else {
            let labels: std::collections::HashMap<String, String> =
                const_labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            Registry::new_custom(None, Some(labels)).map_err(|e| RegistryError::InvalidMetric {
                metric: "<const labels>".to_string(),
                message: e.to_string(),
            })?
        };

        let mut reserved_labels: Vec<String> = const_labels.keys().cloned().collect();
        reserved_labels.push(DB_LABEL.to_string());

        let instruments = DashMap::new();

        let builtin = |name: &str, help: &str, kind: MetricKind, labels: &[&str]| {
            let labels = labels.iter().map(|s| s.to_string()).collect();
            let instrument = MetricInstrument::build(name, help, kind, labels)?;
            Self::insert(&registry, &instruments, instrument)
        };

        let builtins = BuiltinMetrics {
            exporter_up: builtin(EXPORTER_UP, "Exporter process is running", MetricKind::Gauge, &[])?,
            scrape_duration: builtin(
                EXPORTER_SCRAPE_DURATION,
                "Duration of last scrape in seconds",
                MetricKind::Gauge,
                &[],
            )?,
            errors_total: builtin(
                EXPORTER_ERRORS_TOTAL,
                "Total scrape errors encountered",
                MetricKind::Counter,
                &[],
            )?,
            lockouts_total: builtin(
                EXPORTER_SCRAPE_LOCKOUTS_TOTAL,
                "Number of scrape requests rejected due to concurrency lock",
                MetricKind::Counter,
                &[],
            )?,
            active_connections: builtin(
                PG_ACTIVE_CONNECTIONS,
                "Number of active PostgreSQL connections",
                MetricKind::Gauge,
                &[DB_LABEL],
            )?,
            database_size_bytes: builtin(
                PG_DATABASE_SIZE_BYTES,
                "Database size in bytes",
                MetricKind::Gauge,
                &[DB_LABEL, "database"],
            )?,
            scrape_success: builtin(
                PG_SCRAPE_SUCCESS,
                "Database scrape success (1=success, 0=failure)",
                MetricKind::Gauge,
                &[DB_LABEL],
            )?,
            target_scrape_duration: builtin(
                PG_SCRAPE_DURATION,
                "Scrape duration per database",
                MetricKind::Gauge,
                &[DB_LABEL],
            )?,
        };

        // Unlabeled series are materialised up front so they are exposed
        // (at 0) before the first scrape.
        if let Some(g) = builtins.exporter_up.gauge_at(&[]) {
            g.set(1.0);
        }
        builtins.set_scrape_duration(0.0);
        let _ = builtins.errors_total.counter_at(&[]);
        let _ = builtins.lockouts_total.counter_at(&[]);

        debug!("Built-in instruments registered");

        Ok(Self {
            registry,
            instruments,
            reserved_labels,
            builtins,
        })
    }

    /// Registry with the default `exporter` constant label.
    pub fn with_default_labels() -> Result<Self, RegistryError> {
        let mut labels = HashMap::new();
        labels.insert(
            DEFAULT_EXPORTER_LABEL.0.to_string(),
            DEFAULT_EXPORTER_LABEL.1.to_string(),
        );
        Self::new(labels)
    }

    fn insert(
        registry: &Registry,
        instruments: &DashMap<String, MetricInstrument>,
        instrument: MetricInstrument,
    ) -> Result<MetricInstrument, RegistryError> {
        match instruments.entry(instrument.name().to_string()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateMetricName(
                instrument.name().to_string(),
            )),
            Entry::Vacant(slot) => {
                registry.register(instrument.boxed()).map_err(|e| match e {
                    prometheus::Error::AlreadyReg => {
                        RegistryError::DuplicateMetricName(instrument.name().to_string())
                    }
                    other => RegistryError::InvalidMetric {
                        metric: instrument.name().to_string(),
                        message: other.to_string(),
                    },
                })?;
                slot.insert(instrument.clone());
                Ok(instrument)
            }
        }
    }

    /// Registers a custom instrument with schema `label_keys ∪ {db}`.
    pub fn register(&self, spec: &InstrumentSpec) -> Result<MetricInstrument, RegistryError> {
        if self.instruments.contains_key(&spec.name) {
            return Err(RegistryError::DuplicateMetricName(spec.name.clone()));
        }

        if let Some(label) = spec
            .label_keys
            .iter()
            .find(|k| self.reserved_labels.iter().any(|r| r == *k))
        {
            return Err(RegistryError::ReservedLabel {
                metric: spec.name.clone(),
                label: label.clone(),
            });
        }

        let mut labels = spec.label_keys.clone();
        labels.push(DB_LABEL.to_string());

        let instrument = MetricInstrument::build(&spec.name, &spec.help, spec.kind, labels)?;
        Self::insert(&self.registry, &self.instruments, instrument)
    }

    pub fn get(&self, name: &str) -> Option<MetricInstrument> {
        self.instruments.get(name).map(|r| r.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.instruments.contains_key(name)
    }

    pub fn builtins(&self) -> &BuiltinMetrics {
        &self.builtins
    }

    /// Labels that custom definitions may not declare.
    pub fn reserved_labels(&self) -> &[String] {
        &self.reserved_labels
    }

    /// Current values of every instrument. Each sample is read atomically;
    /// different instruments may be observed at slightly different times.
    pub fn snapshot_all(&self) -> Vec<MetricSnapshot> {
        self.registry
            .gather()
            .iter()
            .map(|family| {
                let kind = match family.get_field_type() {
                    MetricType::COUNTER => MetricKind::Counter,
                    _ => MetricKind::Gauge,
                };
                let samples = family
                    .get_metric()
                    .iter()
                    .map(|m| SampleSnapshot {
                        labels: m
                            .get_label()
                            .iter()
                            .map(|l| (l.get_name().to_string(), l.get_value().to_string()))
                            .collect(),
                        value: match kind {
                            MetricKind::Counter => m.get_counter().value(),
                            MetricKind::Gauge => m.get_gauge().value(),
                        },
                    })
                    .collect();
                MetricSnapshot {
                    name: family.get_name().to_string(),
                    help: family.get_help().to_string(),
                    kind,
                    samples,
                }
            })
            .collect()
    }

    pub fn snapshot(&self, name: &str) -> Option<MetricSnapshot> {
        self.snapshot_all().into_iter().find(|m| m.name == name)
    }

    /// Encodes all instruments in the Prometheus text exposition format.
    pub fn render(&self) -> Result<Rendered, RenderError> {
        let families = self.registry.gather();
        let encoder = TextEncoder::new();
        let mut buffer = Vec::with_capacity(16 * 1024);
        encoder.encode(&families, &mut buffer)?;
        Ok(Rendered {
            body: String::from_utf8(buffer)?,
            content_type: encoder.format_type().to_string(),
        })
    }
}
