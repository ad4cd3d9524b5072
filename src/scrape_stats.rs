//! In-process scrape statistics.
//!
//! Tracks cycle durations, outcomes and request counters for the landing
//! page. These numbers describe the exporter itself; they are not exposed as
//! Prometheus series.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock as StdRwLock};
use std::time::{Duration, Instant};

use crate::orchestrator::CycleReport;

/// Running statistics for a single value.
#[derive(Clone, Copy, Default)]
pub struct RunningStat {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
}

impl RunningStat {
    pub fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
            self.last = value;
            self.sum = value;
            self.count = 1;
            return;
        }
        self.count += 1;
        self.sum += value;
        self.last = value;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / (self.count as f64)
        }
    }
}

/// Thread-safe wrapper for running statistics.
#[derive(Default)]
pub struct Stat {
    inner: Mutex<RunningStat>,
}

impl Stat {
    pub fn add_sample(&self, value: f64) {
        if let Ok(mut s) = self.inner.lock() {
            s.add(value);
        }
    }

    /// `(last, avg, max, min, count)`
    pub fn snapshot(&self) -> (f64, f64, f64, f64, u64) {
        if let Ok(s) = self.inner.lock() {
            (s.last, s.avg(), s.max, s.min, s.count)
        } else {
            (0.0, 0.0, 0.0, 0.0, 0)
        }
    }
}

/// Sliding window of request timestamps, also used for rate limiting.
pub struct RequestWindow {
    inner: Mutex<VecDeque<Instant>>,
    window: Duration,
}

impl RequestWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(64)),
            window,
        }
    }

    fn prune(guard: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while guard
            .front()
            .is_some_and(|&t| now.duration_since(t) >= window)
        {
            guard.pop_front();
        }
    }

    pub fn record(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            let now = Instant::now();
            Self::prune(&mut guard, now, self.window);
            guard.push_back(now);
        }
    }

    /// Records the request only if fewer than `max` were recorded in the
    /// window. Returns whether it was admitted.
    pub fn try_admit(&self, max: usize) -> bool {
        match self.inner.lock() {
            Ok(mut guard) => {
                let now = Instant::now();
                Self::prune(&mut guard, now, self.window);
                if guard.len() >= max {
                    return false;
                }
                guard.push_back(now);
                true
            }
            Err(_) => true,
        }
    }

    pub fn count(&self) -> u64 {
        match self.inner.lock() {
            Ok(mut guard) => {
                Self::prune(&mut guard, Instant::now(), self.window);
                guard.len() as u64
            }
            Err(_) => 0,
        }
    }
}

/// Exporter-level counters and timings.
pub struct ScrapeStats {
    pub cycle_duration_seconds: Stat,
    pub cycles_total: AtomicU64,
    pub cycles_failed: AtomicU64,
    pub busy_rejections: AtomicU64,
    pub rate_limited: AtomicU64,
    pub render_failures: AtomicU64,
    pub target_failures: AtomicU64,
    pub http_requests: RequestWindow,
    pub start_time: Instant,
    pub last_cycle_at: StdRwLock<Option<DateTime<Utc>>>,
}

impl Default for ScrapeStats {
    fn default() -> Self {
        Self {
            cycle_duration_seconds: Stat::default(),
            cycles_total: AtomicU64::new(0),
            cycles_failed: AtomicU64::new(0),
            busy_rejections: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            render_failures: AtomicU64::new(0),
            target_failures: AtomicU64::new(0),
            http_requests: RequestWindow::new(Duration::from_secs(60)),
            start_time: Instant::now(),
            last_cycle_at: StdRwLock::new(None),
        }
    }
}

impl ScrapeStats {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn record_cycle(&self, report: &CycleReport) {
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
        self.cycle_duration_seconds
            .add_sample(report.duration_seconds);
        self.target_failures
            .fetch_add(report.failed_count() as u64, Ordering::Relaxed);
        if let Ok(mut guard) = self.last_cycle_at.write() {
            *guard = Some(Utc::now());
        }
    }

    pub fn record_cycle_failure(&self) {
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_busy(&self) {
        self.busy_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_render_failure(&self) {
        self.render_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_http_request(&self) {
        self.http_requests.record();
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn get_last_cycle_str(&self) -> String {
        match self.last_cycle_at.read() {
            Ok(guard) => guard
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "N/A".to_string()),
            Err(_) => "N/A".to_string(),
        }
    }

    pub fn render_table(&self) -> String {
        let (cd_cur, cd_avg, cd_max, cd_min, _) = self.cycle_duration_seconds.snapshot();
        let left_col = 26usize;
        let col_w = 12usize;

        let mut out = String::new();

        writeln!(out, "SCRAPE STATISTICS").ok();
        writeln!(out, "=================").ok();
        writeln!(out).ok();

        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "",
            "current",
            "average",
            "max",
            "min",
            left = left_col,
            col = col_w
        )
        .ok();
        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "cycle_duration (s)",
            format!("{:.3}", cd_cur),
            format!("{:.3}", cd_avg),
            format!("{:.3}", cd_max),
            format!("{:.3}", cd_min),
            left = left_col,
            col = col_w
        )
        .ok();
        writeln!(out).ok();

        let counters = [
            ("cycles_total", self.cycles_total.load(Ordering::Relaxed)),
            ("cycles_failed", self.cycles_failed.load(Ordering::Relaxed)),
            ("target_failures", self.target_failures.load(Ordering::Relaxed)),
            ("busy_rejections", self.busy_rejections.load(Ordering::Relaxed)),
            ("rate_limited", self.rate_limited.load(Ordering::Relaxed)),
            ("render_failures", self.render_failures.load(Ordering::Relaxed)),
            ("http_requests_last_minute", self.http_requests.count()),
        ];
        for (name, value) in counters {
            writeln!(out, "{:left$} | {:>col$}", name, value, left = left_col, col = col_w).ok();
        }

        writeln!(out).ok();
        writeln!(out, "last_cycle: {}", self.get_last_cycle_str()).ok();
        out
    }
}
