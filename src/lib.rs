//! PostgreSQL Custom Exporter Library
//!
//! Core of a Prometheus exporter for one or more PostgreSQL instances. It
//! exposes built-in health metrics per database target plus operator-defined
//! metrics driven by SQL queries declared in a configuration file.
//!
//! # Components
//!
//! - **Target registry**: the configured database targets and their pools
//! - **Instrument registry**: typed, labeled gauges and counters by name
//! - **Extraction**: infers labels and a value from arbitrary result rows
//! - **Orchestrator**: single-flight, settle-all collection cycles
//!
//! # Usage
//!
//! ```rust,no_run
//! use pg_custom_exporter::{InstrumentRegistry, ScrapeOrchestrator, TargetRegistry};
//! use pg_custom_exporter::targets::load_target_configs;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let configs = load_target_configs(Path::new("dbs.yaml"))?;
//! let targets = TargetRegistry::from_configs(&configs)?;
//! let instruments = Arc::new(InstrumentRegistry::with_default_labels()?);
//! let orchestrator = ScrapeOrchestrator::new(targets, instruments, Vec::new());
//!
//! let (report, rendered) = orchestrator.collect_and_render().await?;
//! println!("{} target(s) failed", report.failed_count());
//! print!("{}", rendered.body);
//! # Ok(())
//! # }
//! ```

pub mod connector;
pub mod error;
pub mod extraction;
pub mod instruments;
pub mod loader;
pub mod orchestrator;
pub mod postgres;
pub mod queries;
pub mod scrape_stats;
pub mod targets;

// Re-export main types for convenience
pub use connector::{Connection, Connector, FieldValue, Row};
pub use error::{CollectError, ConfigError, ConnectorError, RegistryError, RenderError, ScrapeError};
pub use instruments::{InstrumentRegistry, MetricInstrument, MetricKind, Rendered};
pub use orchestrator::{CycleReport, ScrapeOrchestrator, ScrapeOutcome};
pub use queries::{BoundQuery, QueryDefinition};
pub use scrape_stats::ScrapeStats;
pub use targets::{Target, TargetConfig, TargetRegistry};
