//! Application state management for the exporter.
//!
//! This module defines the shared application state that is passed
//! to HTTP handlers.

use pg_custom_exporter::scrape_stats::{RequestWindow, ScrapeStats};
use pg_custom_exporter::ScrapeOrchestrator;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, DEFAULT_RATE_LIMIT_REQUESTS, DEFAULT_RATE_LIMIT_WINDOW_SECS};

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

/// Sliding-window limiter guarding `/metrics`.
pub struct RateLimiter {
    window: RequestWindow,
    max_requests: usize,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            window: RequestWindow::new(window),
            max_requests,
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.window.try_admit(self.max_requests)
    }
}

/// Global application state shared across requests.
pub struct AppState {
    pub orchestrator: Arc<ScrapeOrchestrator>,
    pub stats: Arc<ScrapeStats>,
    pub config: Arc<Config>,
    /// `None` when rate limiting is disabled.
    pub rate_limiter: Option<RateLimiter>,
}

impl AppState {
    pub fn new(orchestrator: Arc<ScrapeOrchestrator>, config: Config) -> Self {
        let rate_limiter = if config.enable_rate_limit.unwrap_or(true) {
            Some(RateLimiter::new(
                config
                    .rate_limit_requests
                    .unwrap_or(DEFAULT_RATE_LIMIT_REQUESTS),
                Duration::from_secs(
                    config
                        .rate_limit_window_secs
                        .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_SECS),
                ),
            ))
        } else {
            None
        };

        Self {
            orchestrator,
            stats: Arc::new(ScrapeStats::new()),
            config: Arc::new(config),
            rate_limiter,
        }
    }

    /// Configured API key, if any. An empty key counts as unset.
    pub fn api_key(&self) -> Option<&str> {
        self.config.api_key.as_deref().filter(|k| !k.is_empty())
    }
}
