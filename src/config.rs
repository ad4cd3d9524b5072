//! Configuration management for pg-custom-exporter.
//!
//! This module handles loading, merging, and validating the server configuration
//! from files and CLI arguments. It supports YAML, JSON, and TOML formats.
//! Database targets and custom queries live in their own files; this config only
//! points at them.

use crate::cli::{Args, ConfigFormat};
use once_cell::sync::Lazy;
use pg_custom_exporter::instruments::{DB_LABEL, DEFAULT_EXPORTER_LABEL};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

// Default configuration constants
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9187;
pub const DEFAULT_RATE_LIMIT_REQUESTS: usize = 2;
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 5;

static LABEL_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("static regex"));

/// Server configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub port: Option<u16>,
    pub bind: Option<String>,

    // Inputs
    #[serde(alias = "targets-file", alias = "dbs_config_file")]
    pub targets_file: Option<PathBuf>,
    #[serde(alias = "queries-file")]
    pub queries_file: Option<PathBuf>,

    // Access control
    #[serde(alias = "api-key", skip_serializing)]
    pub api_key: Option<String>,
    #[serde(alias = "enable-rate-limit")]
    pub enable_rate_limit: Option<bool>,
    #[serde(alias = "rate-limit-requests")]
    pub rate_limit_requests: Option<usize>,
    #[serde(alias = "rate-limit-window-secs")]
    pub rate_limit_window_secs: Option<u64>,

    // TLS/SSL Configuration
    #[serde(alias = "enable-tls")]
    pub enable_tls: Option<bool>,
    #[serde(alias = "tls-cert-path")]
    pub tls_cert_path: Option<String>,
    #[serde(alias = "tls-key-path")]
    pub tls_key_path: Option<String>,

    /// Labels attached to every exposed series.
    #[serde(alias = "const-labels")]
    pub const_labels: Option<BTreeMap<String, String>>,
}

impl Default for Config {
    fn default() -> Self {
        let mut const_labels = BTreeMap::new();
        const_labels.insert(
            DEFAULT_EXPORTER_LABEL.0.to_string(),
            DEFAULT_EXPORTER_LABEL.1.to_string(),
        );

        Self {
            port: Some(DEFAULT_PORT),
            bind: Some(DEFAULT_BIND_ADDR.to_string()),
            targets_file: None,
            queries_file: None,
            api_key: None,
            enable_rate_limit: Some(true),
            rate_limit_requests: Some(DEFAULT_RATE_LIMIT_REQUESTS),
            rate_limit_window_secs: Some(DEFAULT_RATE_LIMIT_WINDOW_SECS),
            enable_tls: Some(false),
            tls_cert_path: None,
            tls_key_path: None,
            const_labels: Some(const_labels),
        }
    }
}

fn check_readable_file(kind: &str, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let p = Path::new(path);
    if !p.exists() {
        return Err(format!("{} file not found: {}", kind, path).into());
    }
    match fs::metadata(p) {
        Ok(meta) if meta.len() == 0 => Err(format!("{} file is empty: {}", kind, path).into()),
        Err(e) => Err(format!("{} file is not readable: {} ({})", kind, path, e).into()),
        Ok(_) => Ok(()),
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<(), Box<dyn std::error::Error>> {
    if cfg.targets_file.is_none() {
        return Err(
            "No targets file configured (set targets_file, --targets-file or DBS_CONFIG_FILE)"
                .into(),
        );
    }

    if cfg.enable_rate_limit.unwrap_or(true) {
        if cfg.rate_limit_requests == Some(0) {
            return Err("rate_limit_requests must be greater than 0".into());
        }
        if cfg.rate_limit_window_secs == Some(0) {
            return Err("rate_limit_window_secs must be greater than 0".into());
        }
    }

    if let Some(labels) = &cfg.const_labels {
        for name in labels.keys() {
            if !LABEL_NAME_RE.is_match(name) || name.starts_with("__") {
                return Err(format!("Invalid constant label name '{}'", name).into());
            }
            if name == DB_LABEL {
                return Err(format!("Constant label '{}' is reserved", DB_LABEL).into());
            }
        }
    }

    // TLS validation
    if cfg.enable_tls.unwrap_or(false) {
        match (cfg.tls_cert_path.as_deref(), cfg.tls_key_path.as_deref()) {
            (None, None) => {
                return Err(
                    "TLS is enabled but neither tls_cert_path nor tls_key_path are set".into(),
                );
            }
            (Some(_), None) => {
                return Err("TLS is enabled but tls_key_path is not set".into());
            }
            (None, Some(_)) => {
                return Err("TLS is enabled but tls_cert_path is not set".into());
            }
            (Some(cert), Some(key)) => {
                check_readable_file("TLS certificate", cert)?;
                check_readable_file("TLS private key", key)?;
            }
        }
    }

    Ok(())
}

/// Resolves configuration from CLI args, config file, and defaults.
/// This enforces precedence: CLI (or its env fallback) > config file > default.
pub fn resolve_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?
    };

    if let Some(bind_ip) = args.bind {
        config.bind = Some(bind_ip.to_string());
    }
    if let Some(cli_port) = args.port {
        config.port = Some(cli_port);
    }

    if let Some(path) = &args.targets_file {
        config.targets_file = Some(path.clone());
    }
    if let Some(path) = &args.queries_file {
        config.queries_file = Some(path.clone());
    }
    if let Some(key) = &args.api_key {
        config.api_key = Some(key.clone());
    }

    // Rate limiting
    if args.disable_rate_limit {
        config.enable_rate_limit = Some(false);
    }
    if let Some(n) = args.rate_limit_requests {
        config.rate_limit_requests = Some(n);
    }
    if let Some(secs) = args.rate_limit_window_secs {
        config.rate_limit_window_secs = Some(secs);
    }

    // TLS configuration: CLI wins if provided
    if args.enable_tls {
        config.enable_tls = Some(true);
    }
    if let Some(cert_path) = &args.tls_cert {
        config.tls_cert_path = Some(cert_path.to_string_lossy().to_string());
    }
    if let Some(key_path) = &args.tls_key {
        config.tls_key_path = Some(key_path.to_string_lossy().to_string());
    }

    Ok(config)
}

/// Configuration loading with multiple format support. Without an explicit
/// path the default locations are tried; if none exists the defaults apply.
pub fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let defaults = [
                "/etc/pg-custom-exporter/config.yaml",
                "/etc/pg-custom-exporter/config.yml",
                "/etc/pg-custom-exporter/config.json",
                "./pg-custom-exporter.yaml",
                "./pg-custom-exporter.yml",
                "./pg-custom-exporter.json",
            ];

            match defaults.iter().find(|p| Path::new(p).exists()) {
                Some(p) => PathBuf::from(p),
                None => return Ok(Config::default()),
            }
        }
    };

    if !path.exists() {
        return Err(format!("Config file not found: {}", path.display()).into());
    }

    let content = fs::read_to_string(&path)?;

    let mut config: Config = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => {
            let config = serde_json::from_str(&content)?;
            info!("Loaded JSON configuration from: {}", path.display());
            config
        }
        Some("toml") => {
            let config = toml::from_str(&content)?;
            info!("Loaded TOML configuration from: {}", path.display());
            config
        }
        _ => {
            // Default to YAML
            let config = serde_yaml::from_str(&content)?;
            info!("Loaded YAML configuration from: {}", path.display());
            config
        }
    };

    // Fields the file leaves out keep their defaults.
    let defaults = Config::default();
    config.port = config.port.or(defaults.port);
    config.bind = config.bind.or(defaults.bind);
    config.enable_rate_limit = config.enable_rate_limit.or(defaults.enable_rate_limit);
    config.rate_limit_requests = config.rate_limit_requests.or(defaults.rate_limit_requests);
    config.rate_limit_window_secs = config
        .rate_limit_window_secs
        .or(defaults.rate_limit_window_secs);
    config.enable_tls = config.enable_tls.or(defaults.enable_tls);
    config.const_labels = config.const_labels.or(defaults.const_labels);

    Ok(config)
}

/// Shows configuration in requested format. The API key is never printed.
pub fn show_config(config: &Config, format: ConfigFormat) -> Result<(), Box<dyn std::error::Error>> {
    let output = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    };

    println!("{output}");
    Ok(())
}
