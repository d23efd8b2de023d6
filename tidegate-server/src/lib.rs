//! # Tidegate Server
//!
//! A standalone HTTP rate-limiting service over the tidegate core.
//!
//! ## Purpose
//!
//! Instead of embedding rate limiting in every service, run one gate that
//! they all consult: an application asks `POST /v1/check` whether an inbound
//! request may proceed and relays the decision (and the `X-RateLimit-*`
//! headers) outward. Policies are an ordered list of route rules with a
//! default fallback; abusive clients escalate into timed bans that operators
//! clear through the admin surface.
//!
//! ## Quick Start
//!
//! ```bash
//! # Defaults: 100 requests / 60s window, burst ceiling 20, port 8080
//! tidegate
//!
//! # Route rules (first match wins) and a tighter default
//! tidegate --rule /api/search=30:10 --rule /api=60:20 --max-requests 50
//! ```
//!
//! Check a request:
//!
//! ```bash
//! curl -X POST http://localhost:8080/v1/check \
//!   -H "Content-Type: application/json" \
//!   -d '{"route": "/api/search", "addr": "203.0.113.5", "user_id": 482}'
//! ```
//!
//! Clear a ban:
//!
//! ```bash
//! curl -X POST http://localhost:8080/v1/admin/unban \
//!   -H "Content-Type: application/json" \
//!   -d '{"client_key": "user:482"}'
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐
//! │    HTTP     │  axum handlers
//! │  Transport  │
//! └──────┬──────┘
//!        │ Arc<…>, per-client sharded locks
//! ┌──────▼──────┐   ┌──────────────┐
//! │ PolicyTable │──▶│ SlidingWindow│
//! │ (route →    │   │   Limiter    │
//! │  policy)    │   │  + bans      │
//! └─────────────┘   └──────┬───────┘
//!                   ┌──────▼───────┐
//!                   │MemoryBackend │  TTL key-value store
//!                   └──────────────┘
//! ```
//!
//! Configuration comes from CLI arguments or `TIDEGATE_`-prefixed
//! environment variables (CLI wins); see `tidegate --help`.

pub mod config;
pub mod gate;
pub mod metrics;
pub mod transport;
pub mod types;

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the unix epoch, collapsing a pre-epoch clock to 0.
pub(crate) fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
