//! Server metrics and Prometheus exposition
//!
//! Lightweight request counters over atomics, with latency buckets, exported
//! in Prometheus text format alongside the core's limiter counters. Minimal
//! overhead and zero allocations in the hot path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tidegate::MetricsSnapshot;

/// Request-level counters for the HTTP surface.
pub struct ServerMetrics {
    /// Server start time
    start_time: Instant,

    /// Total check requests received
    pub total_requests: AtomicU64,
    /// Checks that admitted the request
    pub requests_allowed: AtomicU64,
    /// Checks that denied the request
    pub requests_denied: AtomicU64,
    /// Checks that failed internally
    pub requests_errors: AtomicU64,

    /// Request latency buckets (in microseconds)
    pub latency_under_1ms: AtomicU64,
    pub latency_under_10ms: AtomicU64,
    pub latency_under_100ms: AtomicU64,
    pub latency_under_1s: AtomicU64,
    pub latency_over_1s: AtomicU64,

    /// Histogram support
    pub latency_sum_micros: AtomicU64,
    pub latency_count: AtomicU64,
}

impl ServerMetrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_requests: AtomicU64::new(0),
            requests_allowed: AtomicU64::new(0),
            requests_denied: AtomicU64::new(0),
            requests_errors: AtomicU64::new(0),
            latency_under_1ms: AtomicU64::new(0),
            latency_under_10ms: AtomicU64::new(0),
            latency_under_100ms: AtomicU64::new(0),
            latency_under_1s: AtomicU64::new(0),
            latency_over_1s: AtomicU64::new(0),
            latency_sum_micros: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
        }
    }

    /// Record a check and its latency
    pub fn record_request(&self, latency_us: u64, allowed: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if allowed {
            self.requests_allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_denied.fetch_add(1, Ordering::Relaxed);
        }
        self.record_latency(latency_us);
    }

    /// Record an internal error
    pub fn record_error(&self, latency_us: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.requests_errors.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency_us);
    }

    fn record_latency(&self, latency_us: u64) {
        match latency_us {
            0..=999 => self.latency_under_1ms.fetch_add(1, Ordering::Relaxed),
            1000..=9999 => self.latency_under_10ms.fetch_add(1, Ordering::Relaxed),
            10000..=99999 => self.latency_under_100ms.fetch_add(1, Ordering::Relaxed),
            100000..=999999 => self.latency_under_1s.fetch_add(1, Ordering::Relaxed),
            _ => self.latency_over_1s.fetch_add(1, Ordering::Relaxed),
        };
        self.latency_sum_micros
            .fetch_add(latency_us, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Export server and core metrics in Prometheus text format
    pub fn export_prometheus(&self, core: &MetricsSnapshot) -> String {
        let mut output = String::with_capacity(2048);

        output.push_str("# HELP tidegate_uptime_seconds Time since server start in seconds\n");
        output.push_str("# TYPE tidegate_uptime_seconds gauge\n");
        output.push_str(&format!(
            "tidegate_uptime_seconds {}\n\n",
            self.uptime_seconds()
        ));

        output.push_str("# HELP tidegate_requests_total Total number of checks processed\n");
        output.push_str("# TYPE tidegate_requests_total counter\n");
        output.push_str(&format!(
            "tidegate_requests_total {}\n\n",
            self.total_requests.load(Ordering::Relaxed)
        ));

        output.push_str("# HELP tidegate_requests_allowed Total checks that admitted\n");
        output.push_str("# TYPE tidegate_requests_allowed counter\n");
        output.push_str(&format!(
            "tidegate_requests_allowed {}\n\n",
            self.requests_allowed.load(Ordering::Relaxed)
        ));

        output.push_str("# HELP tidegate_requests_denied Total checks that denied\n");
        output.push_str("# TYPE tidegate_requests_denied counter\n");
        output.push_str(&format!(
            "tidegate_requests_denied {}\n\n",
            self.requests_denied.load(Ordering::Relaxed)
        ));

        output.push_str("# HELP tidegate_requests_errors Total internal errors\n");
        output.push_str("# TYPE tidegate_requests_errors counter\n");
        output.push_str(&format!(
            "tidegate_requests_errors {}\n\n",
            self.requests_errors.load(Ordering::Relaxed)
        ));

        output.push_str("# HELP tidegate_denials_by_reason Denials by structured reason\n");
        output.push_str("# TYPE tidegate_denials_by_reason counter\n");
        output.push_str(&format!(
            "tidegate_denials_by_reason{{reason=\"rate_limited\"}} {}\n",
            core.denied_rate_limited
        ));
        output.push_str(&format!(
            "tidegate_denials_by_reason{{reason=\"banned\"}} {}\n\n",
            core.denied_banned
        ));

        output.push_str("# HELP tidegate_clients_total Clients first seen within state retention\n");
        output.push_str("# TYPE tidegate_clients_total counter\n");
        output.push_str(&format!("tidegate_clients_total {}\n\n", core.total_clients));

        output.push_str("# HELP tidegate_banned_clients Clients currently banned\n");
        output.push_str("# TYPE tidegate_banned_clients gauge\n");
        output.push_str(&format!(
            "tidegate_banned_clients {}\n\n",
            core.banned_clients
        ));

        output.push_str("# HELP tidegate_bans_issued_total Bans issued by abuse escalation\n");
        output.push_str("# TYPE tidegate_bans_issued_total counter\n");
        output.push_str(&format!("tidegate_bans_issued_total {}\n\n", core.bans_issued));

        output.push_str("# HELP tidegate_bans_cleared_total Bans cleared administratively\n");
        output.push_str("# TYPE tidegate_bans_cleared_total counter\n");
        output.push_str(&format!(
            "tidegate_bans_cleared_total {}\n\n",
            core.bans_cleared
        ));

        output.push_str("# HELP tidegate_storage_errors_total Storage backend failures\n");
        output.push_str("# TYPE tidegate_storage_errors_total counter\n");
        output.push_str(&format!(
            "tidegate_storage_errors_total {}\n\n",
            core.storage_errors
        ));

        output.push_str("# HELP tidegate_request_duration_bucket Check latency distribution\n");
        output.push_str("# TYPE tidegate_request_duration_bucket histogram\n");
        let under_1ms = self.latency_under_1ms.load(Ordering::Relaxed);
        let under_10ms = under_1ms + self.latency_under_10ms.load(Ordering::Relaxed);
        let under_100ms = under_10ms + self.latency_under_100ms.load(Ordering::Relaxed);
        let under_1s = under_100ms + self.latency_under_1s.load(Ordering::Relaxed);
        output.push_str(&format!(
            "tidegate_request_duration_bucket{{le=\"0.001\"}} {under_1ms}\n"
        ));
        output.push_str(&format!(
            "tidegate_request_duration_bucket{{le=\"0.01\"}} {under_10ms}\n"
        ));
        output.push_str(&format!(
            "tidegate_request_duration_bucket{{le=\"0.1\"}} {under_100ms}\n"
        ));
        output.push_str(&format!(
            "tidegate_request_duration_bucket{{le=\"1\"}} {under_1s}\n"
        ));
        output.push_str(&format!(
            "tidegate_request_duration_bucket{{le=\"+Inf\"}} {}\n",
            self.latency_count.load(Ordering::Relaxed)
        ));
        let latency_sum_seconds =
            self.latency_sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        output.push_str(&format!(
            "tidegate_request_duration_sum {latency_sum_seconds:.6}\n"
        ));
        output.push_str(&format!(
            "tidegate_request_duration_count {}\n",
            self.latency_count.load(Ordering::Relaxed)
        ));

        output
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
