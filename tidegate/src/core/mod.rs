//! Core components of the tidegate library
//!
//! - [`limiter`]: the sliding-window rate limiter with ban escalation
//! - [`policy`]: rate-limit policies and ordered route rules
//! - [`identity`]: client identity resolution
//! - [`cache`]: the two-tier query cache and cursor pagination
//! - [`store`]: the key-value storage interface and in-memory backend
//! - [`metrics`]: shared atomic counters

pub mod cache;
pub mod identity;
pub mod limiter;
pub mod metrics;
pub mod policy;
pub mod store;


pub use cache::{
    CachedResult, Computed, Cursor, Page, PageBound, PageDirection, PageItem, PageRequest,
    QueryCache, QueryDescriptor, QueryKeyStats,
};
pub use identity::{ClientIdentity, IdentityStrategy, RequestContext};
pub use limiter::{Decision, DenyReason, FailurePolicy, LimiterConfig, Quota, SlidingWindowLimiter};
pub use metrics::{CoreMetrics, MetricsSnapshot};
pub use policy::{PolicyTable, RateLimitPolicy, RouteMatcher};
pub use store::{MemoryBackend, MemoryBackendBuilder, StorageBackend};

use std::error::Error as StdError;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Errors surfaced by the rate limiter and the query cache.
///
/// Rate-limit and ban denials are not errors: they come back as a
/// [`Decision`] with a [`DenyReason`] so the boundary layer can shape a
/// response with retry hints. This enum covers the failure modes underneath.
#[derive(Debug)]
pub enum Error {
    /// The storage backend failed and the configured failure policy does not
    /// permit continuing without it.
    StorageUnavailable(String),
    /// The caller-supplied query computation returned an error. Nothing was
    /// written to either cache tier.
    ComputeFailed(String),
    /// A policy failed validation (zero window, zero ceiling).
    InvalidPolicy(&'static str),
    /// An internal error occurred (e.g. state serialization).
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::StorageUnavailable(msg) => write!(f, "storage backend unavailable: {msg}"),
            Error::ComputeFailed(msg) => write!(f, "query computation failed: {msg}"),
            Error::InvalidPolicy(msg) => write!(f, "invalid policy: {msg}"),
            Error::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl StdError for Error {}

/// Seconds since the unix epoch, collapsing a pre-epoch clock to 0.
pub(crate) fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
