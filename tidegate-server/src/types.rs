//! Wire types for the HTTP surface
//!
//! The server is a boundary layer: it parses requests into the core's
//! [`RequestContext`], and shapes core decisions back into JSON plus
//! `X-RateLimit-*` headers. No internal state crosses this boundary; denials
//! carry a structured reason and a numeric retry hint, nothing more.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tidegate::{Decision, MetricsSnapshot, RequestContext};

/// A rate-limit check for one inbound request.
///
/// `timestamp` (unix seconds) is optional and defaults to the current time;
/// passing it keeps distributed callers and tests deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRequest {
    /// Resolved route path, e.g. `/api/orders`
    pub route: String,
    /// HTTP method of the inbound request
    #[serde(default = "default_method")]
    pub method: String,
    /// Peer network address
    pub addr: IpAddr,
    /// Authenticated user id, if any
    #[serde(default)]
    pub user_id: Option<u64>,
    /// Unix seconds override for the check
    #[serde(default)]
    pub timestamp: Option<u64>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl CheckRequest {
    /// The core-facing view of this request.
    pub fn context(&self) -> RequestContext {
        RequestContext {
            route: self.route.clone(),
            method: self.method.clone(),
            user_id: self.user_id,
            remote_addr: self.addr,
        }
    }
}

/// Outcome of a rate-limit check.
///
/// ```json
/// {
///   "allowed": false,
///   "reason": "rate_limited",
///   "retry_after": 42,
///   "limit": 100,
///   "remaining": 0,
///   "reset_at": 1723000000,
///   "scope": "/api/search"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResponse {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Denial reason (`rate_limited` or `banned`), absent when allowed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Seconds to wait before retrying (0 when allowed)
    pub retry_after: u64,
    /// The applied policy's sustained ceiling
    pub limit: u32,
    /// Requests left in the current window
    pub remaining: u32,
    /// Unix seconds when the window fully resets
    pub reset_at: u64,
    /// Scope of the policy that applied
    pub scope: String,
}

impl CheckResponse {
    /// Shape a core decision for the wire.
    pub fn from_decision(decision: &Decision, scope: &str) -> Self {
        CheckResponse {
            allowed: decision.allowed,
            reason: decision.reason.map(|r| r.as_str().to_string()),
            retry_after: decision.retry_after.as_secs(),
            limit: decision.quota.limit,
            remaining: decision.quota.remaining,
            reset_at: crate::unix_secs(decision.quota.reset_at),
            scope: scope.to_string(),
        }
    }
}

/// Administrative unban request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnbanRequest {
    /// Client key to unban, e.g. `user:482` or `ip:203.0.113.5`
    pub client_key: String,
}

/// Unban outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnbanResponse {
    /// Whether an active ban existed and was cleared
    pub cleared: bool,
}

/// Admin stats snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    /// Seconds since server start
    pub uptime_seconds: u64,
    /// Core limiter and cache counters
    #[serde(flatten)]
    pub metrics: MetricsSnapshot,
}

/// Error response format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
}
