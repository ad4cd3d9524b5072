//! pg-custom-exporter
//!
//! Prometheus exporter for PostgreSQL health and custom SQL metrics.
//! This is the main entry point that loads configuration, targets and queries,
//! and serves the HTTP endpoints.

mod cli;
mod config;
mod handlers;
mod state;

use ahash::AHashMap as HashMap;
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use pg_custom_exporter::queries::{bind_query_definitions, load_query_definitions};
use pg_custom_exporter::targets::load_target_configs;
use pg_custom_exporter::{InstrumentRegistry, ScrapeOrchestrator, TargetRegistry};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tracing::{debug, error, info, warn, Level};

use cli::{Args, LogLevel};
use config::{resolve_config, show_config, validate_effective_config, Config, DEFAULT_BIND_ADDR, DEFAULT_PORT};
use handlers::build_router;
use state::AppState;

/// Initializes tracing logging subsystem with configured log level.
fn setup_logging(args: &Args) {
    let log_level = match args.log_level {
        LogLevel::Off => None,
        LogLevel::Error => Some(Level::ERROR),
        LogLevel::Warn => Some(Level::WARN),
        LogLevel::Info => Some(Level::INFO),
        LogLevel::Debug => Some(Level::DEBUG),
        LogLevel::Trace => Some(Level::TRACE),
    };

    let Some(log_level) = log_level else {
        return;
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    info!("Logging initialized with level: {:?}", args.log_level);
}

fn const_labels(config: &Config) -> HashMap<String, String> {
    config
        .const_labels
        .as_ref()
        .map(|labels| labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

/// Loads targets and queries the same way startup does, without connecting.
fn check_inputs(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let targets_file = config
        .targets_file
        .as_deref()
        .ok_or("No targets file configured")?;
    let targets = load_target_configs(targets_file)?;
    println!("✅ {} database target(s) in {}", targets.len(), targets_file.display());

    let definitions = load_query_definitions(config.queries_file.as_deref())?;
    let total = definitions.len();
    let registry = InstrumentRegistry::new(const_labels(config))?;
    let bound = bind_query_definitions(&registry, definitions);
    println!("✅ {} of {} custom metric(s) accepted", bound.len(), total);

    Ok(())
}

/// Main application entry point.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Early config resolution for show/check modes
    if args.show_config || args.check_config {
        let config = resolve_config(&args)?;

        if args.check_config {
            if let Err(e) = validate_effective_config(&config).and_then(|_| check_inputs(&config)) {
                eprintln!("❌ Configuration invalid: {}", e);
                std::process::exit(1);
            }
            println!("✅ Configuration is valid");
            return Ok(());
        }

        return show_config(&config, args.config_format);
    }

    // Load configuration for main server mode
    let config = resolve_config(&args)?;

    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }

    setup_logging(&args);

    info!("Starting pg-custom-exporter");

    let targets_file = config
        .targets_file
        .as_deref()
        .unwrap_or_else(|| Path::new(""));
    let target_configs = match load_target_configs(targets_file) {
        Ok(configs) => configs,
        Err(e) => {
            error!("❌ Failed to load database targets: {}", e);
            std::process::exit(1);
        }
    };
    let targets = TargetRegistry::from_configs(&target_configs)?;

    let instruments = Arc::new(InstrumentRegistry::new(const_labels(&config))?);
    debug!("Instrument registry initialized");

    let definitions = match load_query_definitions(config.queries_file.as_deref()) {
        Ok(definitions) => definitions,
        Err(e) => {
            error!("❌ Failed to load custom queries: {}", e);
            std::process::exit(1);
        }
    };
    let queries = bind_query_definitions(&instruments, definitions);

    let orchestrator = Arc::new(ScrapeOrchestrator::new(targets, instruments, queries));

    if config.api_key.as_deref().map_or(true, str::is_empty) {
        warn!("⚠️  No API key configured - /metrics and /configz will reject every request");
    } else {
        info!("Auth enabled for /metrics and /configz");
    }

    let bind_ip_str = config.bind.clone().unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
    let port = config.port.unwrap_or(DEFAULT_PORT);
    let enable_tls = config.enable_tls.unwrap_or(false);
    let tls_paths = (config.tls_cert_path.clone(), config.tls_key_path.clone());

    let state = Arc::new(AppState::new(Arc::clone(&orchestrator), config));
    let app = build_router(state);

    // Setup graceful shutdown signal handlers
    let shutdown_signal = async {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
            }
            _ = terminate => {
                info!("Received SIGTERM, shutting down gracefully...");
            }
        }
    };

    let addr: SocketAddr = format!("{}:{}", bind_ip_str, port).parse()?;

    let served: Result<(), Box<dyn std::error::Error>> = match (enable_tls, tls_paths) {
        (true, (Some(cert_path), Some(key_path))) => {
            info!("Loading TLS certificate from: {}", cert_path);
            info!("Loading TLS private key from: {}", key_path);

            let tls_config = RustlsConfig::from_pem_file(&cert_path, &key_path)
                .await
                .map_err(|e| {
                    error!("Failed to load TLS configuration: {}", e);
                    e
                })?;

            info!("🚀 Exporter listening on https://{}:{}/metrics", bind_ip_str, port);

            let server = axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service());

            tokio::select! {
                result = server => result.map_err(|e| Box::new(e) as Box<dyn std::error::Error>),
                _ = shutdown_signal => {
                    info!("Shutdown signal received, exiting...");
                    Ok(())
                }
            }
        }
        _ => {
            let listener = TcpListener::bind(addr).await?;
            info!("🚀 Exporter listening on http://{}:{}/metrics", bind_ip_str, port);

            let server = axum::serve(listener, app);

            tokio::select! {
                result = server => result.map_err(|e| Box::new(e) as Box<dyn std::error::Error>),
                _ = shutdown_signal => {
                    info!("Shutdown signal received, exiting...");
                    Ok(())
                }
            }
        }
    };

    if let Err(e) = &served {
        error!("Server error: {}", e);
    }

    orchestrator.targets().close().await;
    info!("Database pools closed");

    info!("pg-custom-exporter stopped gracefully");
    served
}
