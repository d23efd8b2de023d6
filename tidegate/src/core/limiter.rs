//! Sliding-window rate limiter with ban escalation
//!
//! The limiter counts a client's requests inside the trailing window rather
//! than a fixed bucket, which avoids the thundering-herd reset fixed windows
//! produce at boundary edges. Two ceilings apply per policy: the sustained
//! `max_requests` and the `burst_capacity`. A window violation that trips
//! both ceilings at once increments the client's abuse counter; at the
//! configured threshold the client is banned outright for a fixed duration.
//!
//! All state (window timestamps, abuse counters, ban records) lives in the
//! injected [`StorageBackend`], each record under its own TTL, so the limiter
//! itself owns no cross-request memory. Concurrent checks for one client are
//! serialized by a sharded lock keyed by the client, never a global mutex.

use super::identity::{ClientIdentity, RequestContext};
use super::metrics::CoreMetrics;
use super::policy::RateLimitPolicy;
use super::store::StorageBackend;
use super::{Error, unix_secs};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

const DEFAULT_BAN_THRESHOLD: u32 = 5;
const DEFAULT_BAN_DURATION_SECS: u64 = 3600;
const DEFAULT_STATE_TTL_SECS: u64 = 120;
const DEFAULT_ABUSE_TTL_SECS: u64 = 3600;
const DEFAULT_LOCK_SHARDS: usize = 64;

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// The window is exhausted; retry when it slides.
    RateLimited,
    /// The client is banned; retry when the ban lapses.
    Banned,
}

impl DenyReason {
    /// Wire-friendly name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::RateLimited => "rate_limited",
            DenyReason::Banned => "banned",
        }
    }
}

/// Quota information exposed on every decision, allowed or not, so the
/// boundary layer can populate `X-RateLimit-*` headers on all responses.
#[derive(Debug, Clone)]
pub struct Quota {
    /// The policy's sustained ceiling
    pub limit: u32,
    /// Requests left in the current window
    pub remaining: u32,
    /// When the window fully resets
    pub reset_at: SystemTime,
}

/// Result of an admission check.
#[derive(Debug, Clone)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Denial reason, when not allowed
    pub reason: Option<DenyReason>,
    /// How long to wait before retrying (zero when allowed)
    pub retry_after: Duration,
    /// Quota state for header population
    pub quota: Quota,
}

impl Decision {
    fn allow(quota: Quota) -> Self {
        Decision {
            allowed: true,
            reason: None,
            retry_after: Duration::ZERO,
            quota,
        }
    }

    fn deny(reason: DenyReason, retry_after: Duration, quota: Quota) -> Self {
        Decision {
            allowed: false,
            reason: Some(reason),
            retry_after,
            quota,
        }
    }
}

/// What to do when the storage backend fails mid-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Admit requests as if the failed read returned nothing. Favors
    /// availability; a storage outage disables rate limiting.
    Open,
    /// Surface [`Error::StorageUnavailable`] to the caller. Favors
    /// enforcement; a storage outage rejects traffic.
    Closed,
}

/// Tuning for ban escalation and state retention.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Consecutive window violations before a ban is issued
    pub ban_threshold: u32,
    /// How long a ban lasts
    pub ban_duration: Duration,
    /// TTL on window state records
    pub state_ttl: Duration,
    /// TTL on abuse counters; longer than the window so repeat offenders
    /// cannot reset their count by idling out the window state
    pub abuse_ttl: Duration,
    /// Storage failure behavior
    pub failure_policy: FailurePolicy,
    /// Number of client lock shards
    pub lock_shards: usize,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        LimiterConfig {
            ban_threshold: DEFAULT_BAN_THRESHOLD,
            ban_duration: Duration::from_secs(DEFAULT_BAN_DURATION_SECS),
            state_ttl: Duration::from_secs(DEFAULT_STATE_TTL_SECS),
            abuse_ttl: Duration::from_secs(DEFAULT_ABUSE_TTL_SECS),
            failure_policy: FailurePolicy::Open,
            lock_shards: DEFAULT_LOCK_SHARDS,
        }
    }
}

/// Per-(client, scope) window record.
#[derive(Debug, Default, Serialize, Deserialize)]
struct WindowState {
    /// Unix seconds of admitted requests inside the trailing window,
    /// ascending; pruned lazily on each check
    timestamps: Vec<u64>,
    first_seen: u64,
    last_seen: u64,
}

/// Consecutive window-violation count. Not wall-clock decayed; expires with
/// its record TTL or is cleared administratively.
#[derive(Debug, Default, Serialize, Deserialize)]
struct AbuseState {
    count: u32,
}

/// Active ban. Keyed by client alone: a banned client is banned everywhere,
/// and `unban` can clear it without enumerating scopes.
#[derive(Debug, Serialize, Deserialize)]
struct BanState {
    banned_until: u64,
}

/// Sliding-window rate limiter.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::SystemTime;
/// use tidegate::{CoreMetrics, LimiterConfig, MemoryBackend, RateLimitPolicy, SlidingWindowLimiter};
///
/// let limiter = SlidingWindowLimiter::new(
///     MemoryBackend::new(),
///     LimiterConfig::default(),
///     Arc::new(CoreMetrics::new()),
/// );
/// let policy = RateLimitPolicy::new("search", 30, 10);
///
/// let decision = limiter
///     .admit_key("user:482", &policy, SystemTime::now())
///     .unwrap();
/// assert!(decision.allowed);
/// ```
pub struct SlidingWindowLimiter<S: StorageBackend> {
    store: S,
    config: LimiterConfig,
    metrics: Arc<CoreMetrics>,
    locks: Vec<Mutex<()>>,
}

impl<S: StorageBackend> SlidingWindowLimiter<S> {
    /// Create a limiter over the given storage backend.
    pub fn new(store: S, config: LimiterConfig, metrics: Arc<CoreMetrics>) -> Self {
        let shards = config.lock_shards.max(1);
        SlidingWindowLimiter {
            store,
            config,
            metrics,
            locks: (0..shards).map(|_| Mutex::new(())).collect(),
        }
    }

    /// The metrics instance this limiter records into.
    pub fn metrics(&self) -> &Arc<CoreMetrics> {
        &self.metrics
    }

    /// Resolve the client identity per the policy's strategy and check the
    /// request against the policy.
    pub fn admit(
        &self,
        ctx: &RequestContext,
        policy: &RateLimitPolicy,
        now: SystemTime,
    ) -> Result<Decision, Error> {
        let identity = ClientIdentity::resolve(ctx, policy.identity_strategy);
        self.admit_key(&identity.key, policy, now)
    }

    /// Check a pre-resolved client key against a policy.
    ///
    /// Order of evaluation: active-ban check, window prune, burst check
    /// (both ceilings must be exceeded; trips abuse escalation), standard
    /// ceiling check, then admit-and-record. Quota is populated on every
    /// decision.
    pub fn admit_key(
        &self,
        client_key: &str,
        policy: &RateLimitPolicy,
        now: SystemTime,
    ) -> Result<Decision, Error> {
        policy.validate()?;

        let now_secs = unix_secs(now);
        let window_secs = policy.window.as_secs();
        let window_key = format!("win:{}:{}", policy.scope, client_key);
        let abuse_key = format!("abuse:{}:{}", policy.scope, client_key);
        let ban_key = ban_key(client_key);

        let _guard = self.lock_client(client_key);

        // Ban check comes first; a banned client pays no pruning cost.
        if let Some(ban) = self.read_record::<BanState>(&ban_key, now)? {
            if ban.banned_until > now_secs {
                self.metrics.record_denied(DenyReason::Banned);
                return Ok(Decision::deny(
                    DenyReason::Banned,
                    Duration::from_secs(ban.banned_until - now_secs),
                    Quota {
                        limit: policy.max_requests,
                        remaining: 0,
                        reset_at: now + policy.window,
                    },
                ));
            }
            // Lapsed ban; drop the record lazily.
            self.delete_record(&ban_key)?;
        }

        let mut state = self
            .read_record::<WindowState>(&window_key, now)?
            .unwrap_or_default();
        let is_new_client = state.first_seen == 0;

        // Slide the window: keep only timestamps strictly inside it.
        let cutoff = now_secs.saturating_sub(window_secs);
        state.timestamps.retain(|t| *t > cutoff);
        let count = state.timestamps.len() as u32;

        let quota = Quota {
            limit: policy.max_requests,
            remaining: policy.max_requests.saturating_sub(count),
            reset_at: now + policy.window,
        };

        // Burst violation requires BOTH ceilings exhausted. With the usual
        // burst < max configuration this means every limit denial lands here
        // and escalates the abuse counter; only burst > max policies reach
        // the standard check below.
        if count >= policy.burst_capacity && count >= policy.max_requests {
            let mut abuse = self
                .read_record::<AbuseState>(&abuse_key, now)?
                .unwrap_or_default();
            abuse.count += 1;
            self.write_record(&abuse_key, &abuse, self.config.abuse_ttl, now)?;

            if abuse.count >= self.config.ban_threshold {
                let ban = BanState {
                    banned_until: now_secs + self.config.ban_duration.as_secs(),
                };
                self.write_record(&ban_key, &ban, self.config.ban_duration, now)?;
                self.metrics.record_ban_issued();
                self.metrics.record_denied(DenyReason::Banned);
                tracing::warn!(
                    client = client_key,
                    scope = %policy.scope,
                    violations = abuse.count,
                    ban_secs = self.config.ban_duration.as_secs(),
                    "client banned after repeated burst violations"
                );
                return Ok(Decision::deny(
                    DenyReason::Banned,
                    self.config.ban_duration,
                    quota,
                ));
            }

            self.metrics.record_denied(DenyReason::RateLimited);
            return Ok(Decision::deny(
                DenyReason::RateLimited,
                policy.window,
                quota,
            ));
        }

        if count >= policy.max_requests {
            // count >= max_requests >= 1 implies a non-empty window.
            debug_assert!(
                !state.timestamps.is_empty(),
                "exhausted window must hold at least one timestamp"
            );
            let oldest = state.timestamps[0];
            let retry_secs = (oldest + window_secs).saturating_sub(now_secs).max(1);
            self.metrics.record_denied(DenyReason::RateLimited);
            return Ok(Decision::deny(
                DenyReason::RateLimited,
                Duration::from_secs(retry_secs),
                quota,
            ));
        }

        if is_new_client {
            state.first_seen = now_secs;
            self.metrics.record_new_client();
        }
        state.timestamps.push(now_secs);
        state.last_seen = now_secs;
        self.write_record(&window_key, &state, self.config.state_ttl, now)?;
        self.metrics.record_allowed();

        Ok(Decision::allow(Quota {
            limit: policy.max_requests,
            remaining: policy.max_requests.saturating_sub(count + 1),
            reset_at: now + policy.window,
        }))
    }

    /// Clear a client's ban unconditionally.
    ///
    /// The next request is evaluated normally; it is not auto-allowed, just
    /// no longer banned. Authorization for calling this is the host
    /// application's concern.
    pub fn unban(&self, client_key: &str, now: SystemTime) -> Result<bool, Error> {
        let key = ban_key(client_key);
        let _guard = self.lock_client(client_key);
        let had_ban = self.read_record::<BanState>(&key, now)?.is_some();
        if had_ban {
            self.delete_record(&key)?;
            self.metrics.record_ban_cleared();
            tracing::info!(client = client_key, "ban cleared");
        }
        Ok(had_ban)
    }

    /// Reset a client's abuse counter for one scope.
    ///
    /// The counter is not wall-clock decayed, so a forgiven client can
    /// otherwise sit one violation away from a fresh ban until the record's
    /// TTL lapses.
    pub fn clear_abuse(&self, client_key: &str, scope: &str) -> Result<(), Error> {
        let key = format!("abuse:{scope}:{client_key}");
        let _guard = self.lock_client(client_key);
        self.delete_record(&key)
    }

    fn lock_client(&self, client_key: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        client_key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.locks.len();
        // The guard carries no data, so a poisoned lock is still usable.
        match self.locks[idx].lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn read_record<T: DeserializeOwned>(
        &self,
        key: &str,
        now: SystemTime,
    ) -> Result<Option<T>, Error> {
        match self.store.get(key, now) {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(value) => Ok(Some(value)),
                Err(err) => {
                    tracing::warn!(key, error = %err, "discarding undecodable limiter record");
                    let _ = self.store.delete(key);
                    Ok(None)
                }
            },
            Ok(None) => Ok(None),
            Err(err) => self.storage_failure(key, err).map(|_| None),
        }
    }

    fn write_record<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        now: SystemTime,
    ) -> Result<(), Error> {
        let bytes = serde_json::to_vec(value).map_err(|e| Error::Internal(e.to_string()))?;
        match self.store.set(key, &bytes, ttl, now) {
            Ok(()) => Ok(()),
            Err(err) => self.storage_failure(key, err),
        }
    }

    fn delete_record(&self, key: &str) -> Result<(), Error> {
        match self.store.delete(key) {
            Ok(()) => Ok(()),
            Err(err) => self.storage_failure(key, err),
        }
    }

    fn storage_failure(&self, key: &str, err: String) -> Result<(), Error> {
        self.metrics.record_storage_error();
        match self.config.failure_policy {
            FailurePolicy::Open => {
                tracing::warn!(key, error = %err, "storage failed; continuing per fail-open policy");
                Ok(())
            }
            FailurePolicy::Closed => Err(Error::StorageUnavailable(err)),
        }
    }
}

fn ban_key(client_key: &str) -> String {
    format!("ban:{client_key}")
}
