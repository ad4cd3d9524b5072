//! Target registry: the configured database targets and their connectors.
//!
//! Targets are loaded once at startup from an ordered list of records. A
//! missing field, a non-list document or an empty list is fatal; the exporter
//! never starts without at least one target.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::connector::Connector;
use crate::error::ConfigError;
use crate::loader::{parse_list, read_regular_file, FileFormat};
use crate::postgres::PgConnector;

const MANDATORY_FIELDS: [&str; 6] = ["name", "host", "port", "user", "password", "database"];

/// Connection settings for one database target.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,

    /// Maximum pooled connections (default: 5)
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection acquisition timeout in milliseconds (default: 5000)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Idle connection timeout in milliseconds (default: 10000)
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    5
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_idle_timeout_ms() -> u64 {
    10000
}

/// Parses the targets document. Every entry must carry all mandatory fields.
pub fn parse_target_configs(
    content: &str,
    format: FileFormat,
) -> Result<Vec<TargetConfig>, ConfigError> {
    let entries = parse_list(content, format, "targets", "targets")?;

    let mut configs = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        for field in MANDATORY_FIELDS {
            if entry.get(field).map_or(true, |v| v.is_null()) {
                return Err(ConfigError::MissingField { index, field });
            }
        }

        let cfg: TargetConfig = serde_json::from_value(entry).map_err(|e| ConfigError::Parse {
            what: format!("target entry #{index}"),
            message: e.to_string(),
        })?;
        configs.push(cfg);
    }

    if configs.is_empty() {
        return Err(ConfigError::NoTargets);
    }

    Ok(configs)
}

pub fn load_target_configs(path: &Path) -> Result<Vec<TargetConfig>, ConfigError> {
    let content = read_regular_file(path)?;
    let configs = parse_target_configs(&content, FileFormat::from_path(path))?;
    info!(
        "Loaded {} database target(s) from: {}",
        configs.len(),
        path.display()
    );
    Ok(configs)
}

/// One configured database instance.
#[derive(Clone)]
pub struct Target {
    pub name: String,
    pub connector: Arc<dyn Connector>,
}

impl Target {
    pub fn new(name: impl Into<String>, connector: Arc<dyn Connector>) -> Self {
        Self {
            name: name.into(),
            connector,
        }
    }
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target").field("name", &self.name).finish()
    }
}

/// Immutable, ordered set of targets.
#[derive(Debug, Clone)]
pub struct TargetRegistry {
    targets: Vec<Target>,
}

impl TargetRegistry {
    pub fn new(targets: Vec<Target>) -> Result<Self, ConfigError> {
        if targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }

        let mut seen = HashSet::new();
        for target in &targets {
            if !seen.insert(target.name.as_str()) {
                return Err(ConfigError::DuplicateTarget(target.name.clone()));
            }
        }

        Ok(Self { targets })
    }

    /// Builds PostgreSQL-backed targets from validated configuration.
    pub fn from_configs(configs: &[TargetConfig]) -> Result<Self, ConfigError> {
        let targets = configs
            .iter()
            .map(|cfg| Target::new(cfg.name.clone(), Arc::new(PgConnector::from_config(cfg))))
            .collect();
        Self::new(targets)
    }

    /// Targets in configuration order.
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn names(&self) -> Vec<String> {
        self.targets.iter().map(|t| t.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Releases every target's pool.
    pub async fn close(&self) {
        for target in &self.targets {
            target.connector.close().await;
        }
    }
}
