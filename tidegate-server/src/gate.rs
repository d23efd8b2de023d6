//! Gate assembly
//!
//! Builds the shared application state from configuration: the storage
//! backend, the sliding-window limiter over it, the ordered policy table, and
//! the metrics both the core and the HTTP surface record into. Everything is
//! behind `Arc`s; handlers share one limiter, which serializes per-client
//! work with sharded locks rather than a global choke point.

use crate::config::Config;
use crate::metrics::ServerMetrics;
use std::sync::Arc;
use tidegate::{CoreMetrics, MemoryBackend, PolicyTable, SlidingWindowLimiter};

/// Shared state for the HTTP surface.
#[derive(Clone)]
pub struct Gate {
    /// The rate limiter
    pub limiter: Arc<SlidingWindowLimiter<MemoryBackend>>,
    /// Ordered route rules with the default fallback
    pub policies: Arc<PolicyTable>,
    /// Core counters (shared with the limiter)
    pub core_metrics: Arc<CoreMetrics>,
    /// HTTP-surface counters
    pub server_metrics: Arc<ServerMetrics>,
}

/// Assemble a gate from configuration.
pub fn build(config: &Config) -> Gate {
    let backend = MemoryBackend::builder()
        .capacity(config.store_capacity)
        .cleanup_interval(config.store_cleanup_interval)
        .build();

    let core_metrics = Arc::new(CoreMetrics::new());
    let limiter = Arc::new(SlidingWindowLimiter::new(
        backend,
        config.limiter_config(),
        Arc::clone(&core_metrics),
    ));

    Gate {
        limiter,
        policies: Arc::new(config.policy_table()),
        core_metrics,
        server_metrics: Arc::new(ServerMetrics::new()),
    }
}
