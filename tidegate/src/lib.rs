//! # Tidegate
//!
//! Sliding-window rate limiting with progressive bans, plus a two-tier query
//! cache with cursor pagination.
//!
//! ## Overview
//!
//! Tidegate provides two independently usable components and the glue they
//! share:
//!
//! - [`SlidingWindowLimiter`]: tracks per-client request timestamps in a
//!   trailing window, enforces a sustained ceiling and a burst ceiling,
//!   escalates repeated violations into timed bans, and reports quota
//!   information (`limit` / `remaining` / `reset_at`) on every decision so
//!   callers can populate rate-limit headers.
//! - [`QueryCache`]: wraps an expensive read behind a fast in-memory tier and
//!   a durable tier, with deterministic keys derived from normalized query
//!   parameters, single-flight miss collapsing, tag-based invalidation, and
//!   cursor pagination that works independently of cache state.
//! - A shared client-identity layer ([`ClientIdentity`]) and a counters
//!   facility ([`CoreMetrics`]) used by both.
//!
//! All state lives behind an injected [`StorageBackend`] (`get`/`set`/`delete`
//! with TTLs), so an in-process map, Redis, or anything else with key-value
//! semantics can hold it. The crate ships [`MemoryBackend`], a sharded
//! in-process TTL map.
//!
//! ## Quick start
//!
//! ```
//! use std::sync::Arc;
//! use std::time::SystemTime;
//! use tidegate::{
//!     CoreMetrics, LimiterConfig, MemoryBackend, RateLimitPolicy, RequestContext,
//!     SlidingWindowLimiter,
//! };
//!
//! let metrics = Arc::new(CoreMetrics::new());
//! let limiter = SlidingWindowLimiter::new(
//!     MemoryBackend::new(),
//!     LimiterConfig::default(),
//!     Arc::clone(&metrics),
//! );
//!
//! // 100 requests per 60s window, burst ceiling of 20
//! let policy = RateLimitPolicy::new("api", 100, 20);
//! let ctx = RequestContext {
//!     route: "/api/orders".into(),
//!     method: "GET".into(),
//!     user_id: Some(482),
//!     remote_addr: "203.0.113.5".parse().unwrap(),
//! };
//!
//! let decision = limiter.admit(&ctx, &policy, SystemTime::now()).unwrap();
//! if decision.allowed {
//!     println!("allowed, {} remaining", decision.quota.remaining);
//! } else {
//!     println!("denied, retry after {:?}", decision.retry_after);
//! }
//! ```
//!
//! ## Caching a query
//!
//! ```
//! use std::sync::Arc;
//! use std::time::{Duration, SystemTime};
//! use tidegate::{Computed, CoreMetrics, MemoryBackend, QueryCache, QueryDescriptor};
//!
//! let cache = QueryCache::new(
//!     MemoryBackend::new(),
//!     MemoryBackend::new(),
//!     Arc::new(CoreMetrics::new()),
//! );
//!
//! let desc = QueryDescriptor::new("orders.list")
//!     .tenant("acme")
//!     .param("status", "open");
//!
//! let result = cache
//!     .fetch(&desc, Duration::from_secs(300), SystemTime::now(), || {
//!         // the expensive read; only runs on a miss
//!         Ok::<_, String>(Computed::new(vec![482u64, 483, 519]))
//!     })
//!     .unwrap();
//! assert!(!result.from_cache);
//! ```
//!
//! ## Thread safety
//!
//! Both components take `&self` and are `Send + Sync`. The limiter guards its
//! read-modify-write cycle with per-client sharded locks; the cache collapses
//! concurrent misses for one key into a single computation. Share either via
//! `Arc` across threads or async tasks.
//!
//! ## Features
//!
//! - `ahash` (default): use AHash for the internal hash maps

pub mod core;

pub use core::{
    CachedResult, ClientIdentity, Computed, CoreMetrics, Cursor, Decision, DenyReason, Error,
    FailurePolicy, IdentityStrategy, LimiterConfig, MemoryBackend, MemoryBackendBuilder,
    MetricsSnapshot, Page, PageBound, PageDirection, PageItem, PageRequest, PolicyTable,
    QueryCache, QueryDescriptor, QueryKeyStats, Quota, RateLimitPolicy, RequestContext,
    RouteMatcher, SlidingWindowLimiter, StorageBackend,
};
