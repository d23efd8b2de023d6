//! Shared metrics collection
//!
//! Lightweight atomic counters used by both the limiter and the cache.
//! Designed for minimal overhead in the hot path; a [`snapshot`] turns the
//! counters into a serializable view for admin surfaces.
//!
//! [`snapshot`]: CoreMetrics::snapshot

use super::limiter::DenyReason;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the limiter and the cache.
#[derive(Debug, Default)]
pub struct CoreMetrics {
    /// Requests admitted by the limiter
    pub requests_allowed: AtomicU64,
    /// Requests denied, any reason
    pub requests_denied: AtomicU64,
    /// Denials with a rate-limited reason
    pub denied_rate_limited: AtomicU64,
    /// Denials with a banned reason
    pub denied_banned: AtomicU64,
    /// Bans issued by abuse escalation
    pub bans_issued: AtomicU64,
    /// Bans cleared administratively
    pub bans_cleared: AtomicU64,
    /// Clients first seen within the state retention horizon
    pub clients_seen: AtomicU64,
    /// Storage backend failures observed
    pub storage_errors: AtomicU64,

    /// Cache hits served from the memory tier
    pub cache_memory_hits: AtomicU64,
    /// Cache hits served from the durable tier
    pub cache_durable_hits: AtomicU64,
    /// Cache misses that ran the computation
    pub cache_misses: AtomicU64,
    /// Concurrent misses collapsed into another caller's computation
    pub cache_collapsed_waits: AtomicU64,
    /// Entries dropped by invalidation
    pub cache_invalidations: AtomicU64,
    /// Computations over the slow-query threshold
    pub slow_queries: AtomicU64,
    /// Cumulative computation wall time in microseconds
    pub compute_time_micros: AtomicU64,
}

impl CoreMetrics {
    /// Create a zeroed metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_allowed(&self) {
        self.requests_allowed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_denied(&self, reason: DenyReason) {
        self.requests_denied.fetch_add(1, Ordering::Relaxed);
        match reason {
            DenyReason::RateLimited => self.denied_rate_limited.fetch_add(1, Ordering::Relaxed),
            DenyReason::Banned => self.denied_banned.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub(crate) fn record_ban_issued(&self) {
        self.bans_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ban_cleared(&self) {
        self.bans_cleared.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_new_client(&self) {
        self.clients_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_storage_error(&self) {
        self.storage_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time view of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let bans_issued = self.bans_issued.load(Ordering::Relaxed);
        let bans_cleared = self.bans_cleared.load(Ordering::Relaxed);
        MetricsSnapshot {
            requests_allowed: self.requests_allowed.load(Ordering::Relaxed),
            requests_denied: self.requests_denied.load(Ordering::Relaxed),
            denied_rate_limited: self.denied_rate_limited.load(Ordering::Relaxed),
            denied_banned: self.denied_banned.load(Ordering::Relaxed),
            bans_issued,
            bans_cleared,
            // get/set/delete storage has no scan, so live bans are tracked by
            // bookkeeping rather than enumeration; lazily expired bans are not
            // subtracted until cleared or reissued.
            banned_clients: bans_issued.saturating_sub(bans_cleared),
            total_clients: self.clients_seen.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
            cache_memory_hits: self.cache_memory_hits.load(Ordering::Relaxed),
            cache_durable_hits: self.cache_durable_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_collapsed_waits: self.cache_collapsed_waits.load(Ordering::Relaxed),
            cache_invalidations: self.cache_invalidations.load(Ordering::Relaxed),
            slow_queries: self.slow_queries.load(Ordering::Relaxed),
            compute_time_micros: self.compute_time_micros.load(Ordering::Relaxed),
        }
    }
}

/// Serializable view of [`CoreMetrics`], as returned by admin stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub requests_allowed: u64,
    pub requests_denied: u64,
    pub denied_rate_limited: u64,
    pub denied_banned: u64,
    pub bans_issued: u64,
    pub bans_cleared: u64,
    pub banned_clients: u64,
    pub total_clients: u64,
    pub storage_errors: u64,
    pub cache_memory_hits: u64,
    pub cache_durable_hits: u64,
    pub cache_misses: u64,
    pub cache_collapsed_waits: u64,
    pub cache_invalidations: u64,
    pub slow_queries: u64,
    pub compute_time_micros: u64,
}
