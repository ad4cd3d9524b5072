//! CLI arguments for pg-custom-exporter.
//!
//! This module defines the command-line interface structure using the clap library.
//! Every option that has an environment fallback names it in its help text.

use clap::{Parser, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Configuration format options for output
#[derive(Debug, Clone, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "pg-custom-exporter",
    about = "Prometheus exporter for PostgreSQL health and custom SQL metrics",
    long_about = "Prometheus exporter for PostgreSQL health and custom SQL metrics.\n\n\
                  Scrapes one or more PostgreSQL databases on every /metrics request and \
                  exposes built-in health metrics plus operator-defined metrics produced by \
                  SQL queries declared in a queries file.",
    version,
    propagate_version = true
)]
pub struct Args {
    /// HTTP listen port
    #[arg(short = 'p', long, env = "PORT")]
    pub port: Option<u16>,

    /// Bind to specific interface/IP
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Log level
    #[arg(long, value_enum, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Server config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable server config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Database targets file (YAML/JSON/TOML list)
    #[arg(long, env = "DBS_CONFIG_FILE")]
    pub targets_file: Option<PathBuf>,

    /// Custom queries file (YAML/JSON/TOML list)
    #[arg(long, env = "QUERIES_FILE")]
    pub queries_file: Option<PathBuf>,

    /// Bearer token required on /metrics and /configz
    #[arg(long, env = "EXPORTER_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Disable the /metrics rate limiter
    #[arg(long)]
    pub disable_rate_limit: bool,

    /// Maximum /metrics requests per rate limit window
    #[arg(long)]
    pub rate_limit_requests: Option<usize>,

    /// Rate limit window in seconds
    #[arg(long)]
    pub rate_limit_window_secs: Option<u64>,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config, targets and queries and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Enable TLS/SSL for HTTPS
    #[arg(long)]
    pub enable_tls: bool,

    /// Path to TLS certificate file (PEM format)
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,

    /// Path to TLS private key file (PEM format)
    #[arg(long)]
    pub tls_key: Option<PathBuf>,
}
