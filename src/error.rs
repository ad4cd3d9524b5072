//! Error types for the exporter core.
//!
//! Errors are grouped by how far they propagate: configuration errors abort
//! startup, registry errors skip a single query definition, connector errors
//! fail one target (or one custom query), and collect/render errors are what
//! the `/metrics` caller finally sees.

use std::path::PathBuf;

/// Fatal startup errors for the targets file, the queries file and the
/// resulting target set.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("path is not a regular file: {0}")]
    NotAFile(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {what}: {message}")]
    Parse { what: String, message: String },

    #[error("{0} must contain a list of entries")]
    NotAList(String),

    #[error("target entry #{index} is missing mandatory field '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("no database targets configured")]
    NoTargets,

    #[error("duplicate target name '{0}'")]
    DuplicateTarget(String),
}

/// Instrument registration failures. A failing query definition is skipped,
/// the process keeps running.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("metric name '{0}' is already registered")]
    DuplicateMetricName(String),

    #[error("label '{label}' on metric '{metric}' is reserved")]
    ReservedLabel { metric: String, label: String },

    #[error("invalid metric '{metric}': {message}")]
    InvalidMetric { metric: String, message: String },
}

/// Failures talking to a database target.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("failed to acquire connection: {0}")]
    Acquire(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("unexpected result shape: {0}")]
    Decode(String),
}

/// Outcome of a collection cycle that produced no metrics.
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    /// Another cycle holds the single-flight gate. Not a failure.
    #[error("a scrape is already in progress")]
    Busy,

    #[error("collection failed: {0}")]
    Collection(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to encode metrics: {0}")]
    Encode(#[from] prometheus::Error),

    #[error("encoded metrics are not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Everything a scrape request can fail with.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Collect(#[from] CollectError),

    #[error(transparent)]
    Render(#[from] RenderError),
}

impl ScrapeError {
    pub fn is_busy(&self) -> bool {
        matches!(self, ScrapeError::Collect(CollectError::Busy))
    }
}
