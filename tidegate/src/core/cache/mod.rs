//! Two-tier query cache with cursor pagination
//!
//! [`QueryCache`] wraps an expensive read behind a fast tier and a durable
//! tier, both expressed through [`StorageBackend`]. Lookups walk memory
//! first, then the durable tier (promoting hits back into memory), and only
//! then run the caller's computation, once per key across concurrent
//! callers. Results are written to both tiers along with any related entries
//! the computation primes, so rendering the payload needs no further round
//! trips.
//!
//! Entries register tags (the entity ids they cover); mutations invalidate by
//! tag rather than by enumerating every variant key.

mod cursor;
mod key;
mod single_flight;

pub use cursor::{Cursor, Page, PageBound, PageDirection, PageItem, PageRequest};
pub use key::QueryDescriptor;

#[cfg(test)]
mod tests;

use super::metrics::CoreMetrics;
use super::store::StorageBackend;
use super::{Error, unix_secs};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use single_flight::{Flight, SingleFlight};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

/// Computations above this wall time are flagged for slow-query reporting.
pub const DEFAULT_SLOW_QUERY_THRESHOLD: Duration = Duration::from_millis(100);

/// Stored form of one cache entry. The envelope carries its own expiry so a
/// durable hit can be promoted into the memory tier with the TTL it has left.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    computed_at: u64,
    expires_at: u64,
    payload: Value,
}

/// Result of a cache fetch.
#[derive(Debug, Clone)]
pub struct CachedResult<T> {
    /// The query result
    pub payload: T,
    /// Whether the payload was served without running this caller's
    /// computation (either tier, or another caller's collapsed computation)
    pub from_cache: bool,
    /// Wall time of the computation; zero when served from cache
    pub compute_time: Duration,
}

/// Output of a compute callback: the payload plus any related entries to
/// prime so the result set renders without further round trips.
pub struct Computed<T> {
    value: T,
    related: Vec<(QueryDescriptor, Value)>,
}

impl<T> Computed<T> {
    /// A payload with nothing related to prime.
    pub fn new(value: T) -> Self {
        Computed {
            value,
            related: Vec::new(),
        }
    }

    /// Prime a related entry (already serialized) under its own descriptor.
    /// It is written to both tiers, with the same TTL, inside the same fetch.
    pub fn with_related(mut self, descriptor: QueryDescriptor, payload: Value) -> Self {
        self.related.push((descriptor, payload));
        self
    }
}

/// Per-key cache statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryKeyStats {
    /// Lookups served without running the caller's computation
    pub hits: u64,
    /// Lookups that ran the computation
    pub misses: u64,
    /// Cumulative computation wall time in microseconds
    pub total_compute_micros: u64,
    /// Unix seconds of the most recent lookup
    pub last_access: u64,
    /// Whether any computation exceeded the slow-query threshold
    pub slow: bool,
}

/// Two-tier query cache.
///
/// `F` is the fast tier (typically [`MemoryBackend`](super::MemoryBackend)),
/// `D` the durable tier (a shared or external store).
pub struct QueryCache<F: StorageBackend, D: StorageBackend> {
    memory: F,
    durable: D,
    metrics: Arc<CoreMetrics>,
    flights: SingleFlight,
    tags: Mutex<HashMap<String, HashSet<String>>>,
    stats: Mutex<HashMap<String, QueryKeyStats>>,
    slow_threshold: Duration,
}

impl<F: StorageBackend, D: StorageBackend> QueryCache<F, D> {
    /// Create a cache over the two tiers.
    pub fn new(memory: F, durable: D, metrics: Arc<CoreMetrics>) -> Self {
        QueryCache {
            memory,
            durable,
            metrics,
            flights: SingleFlight::new(),
            tags: Mutex::new(HashMap::new()),
            stats: Mutex::new(HashMap::new()),
            slow_threshold: DEFAULT_SLOW_QUERY_THRESHOLD,
        }
    }

    /// Override the slow-query threshold.
    pub fn with_slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }

    /// The metrics instance this cache records into.
    pub fn metrics(&self) -> &Arc<CoreMetrics> {
        &self.metrics
    }

    /// Fetch a query result, computing and populating both tiers on a miss.
    ///
    /// Concurrent misses for one key collapse into a single computation; the
    /// other callers block and share its result. A failed computation is
    /// propagated uncached (no partial entry is written), and every caller
    /// collapsed into it sees the same [`Error::ComputeFailed`].
    pub fn fetch<T, E, C>(
        &self,
        descriptor: &QueryDescriptor,
        ttl: Duration,
        now: SystemTime,
        compute: C,
    ) -> Result<CachedResult<T>, Error>
    where
        T: Serialize + DeserializeOwned,
        E: fmt::Display,
        C: FnOnce() -> Result<Computed<T>, E>,
    {
        let key = descriptor.cache_key();
        let now_secs = unix_secs(now);

        if let Some(envelope) = self.tier_get(&self.memory, &key, now, now_secs) {
            self.metrics.cache_memory_hits.fetch_add(1, Ordering::Relaxed);
            self.record_hit(&key, now_secs);
            return Ok(CachedResult {
                payload: decode_payload(envelope.payload)?,
                from_cache: true,
                compute_time: Duration::ZERO,
            });
        }

        if let Some(envelope) = self.tier_get(&self.durable, &key, now, now_secs) {
            // Promote with the TTL the entry has left.
            let remaining = Duration::from_secs(envelope.expires_at.saturating_sub(now_secs));
            if let Ok(bytes) = serde_json::to_vec(&envelope) {
                self.tier_set(&self.memory, &key, &bytes, remaining, now);
            }
            self.metrics
                .cache_durable_hits
                .fetch_add(1, Ordering::Relaxed);
            self.record_hit(&key, now_secs);
            return Ok(CachedResult {
                payload: decode_payload(envelope.payload)?,
                from_cache: true,
                compute_time: Duration::ZERO,
            });
        }

        match self.flights.join(&key) {
            Flight::Follower(slot) => {
                let bytes = slot.wait().map_err(Error::ComputeFailed)?;
                let envelope: Envelope = serde_json::from_slice(&bytes)
                    .map_err(|e| Error::Internal(e.to_string()))?;
                self.metrics
                    .cache_collapsed_waits
                    .fetch_add(1, Ordering::Relaxed);
                self.record_hit(&key, now_secs);
                Ok(CachedResult {
                    payload: decode_payload(envelope.payload)?,
                    from_cache: true,
                    compute_time: Duration::ZERO,
                })
            }
            Flight::Leader(slot) => {
                let started = Instant::now();
                let outcome = compute();
                let elapsed = started.elapsed();
                match outcome {
                    Err(err) => {
                        let message = err.to_string();
                        self.flights.complete(&key, &slot, Err(message.clone()));
                        Err(Error::ComputeFailed(message))
                    }
                    Ok(Computed { value, related }) => {
                        let payload = serde_json::to_value(&value)
                            .map_err(|e| Error::Internal(e.to_string()))?;
                        let envelope = Envelope {
                            computed_at: now_secs,
                            // Sub-second TTLs still get one second of life;
                            // expiry bookkeeping is whole seconds.
                            expires_at: now_secs + ttl.as_secs().max(1),
                            payload,
                        };
                        let bytes = serde_json::to_vec(&envelope)
                            .map_err(|e| Error::Internal(e.to_string()))?;

                        self.tier_set(&self.memory, &key, &bytes, ttl, now);
                        self.tier_set(&self.durable, &key, &bytes, ttl, now);
                        self.register_tags(descriptor, &key);

                        for (related_desc, related_payload) in related {
                            self.prime_related(&related_desc, related_payload, ttl, now, now_secs);
                        }

                        self.record_compute(&key, elapsed, now_secs);
                        self.flights.complete(&key, &slot, Ok(bytes));

                        Ok(CachedResult {
                            payload: value,
                            from_cache: false,
                            compute_time: elapsed,
                        })
                    }
                }
            }
        }
    }

    /// Fetch one page of a cursor-paginated query.
    ///
    /// The opaque cursor is decoded leniently: a malformed token means "no
    /// cursor", paging from the beginning. The decoded bound is handed to the
    /// data source, which must return items matching it (see
    /// [`PageBound::admits`]) in canonical descending `(order_value, id)`
    /// order, at most `limit` of them. Page metadata and edge cursors are
    /// derived here and cached with the items.
    pub fn fetch_page<T, E, C>(
        &self,
        descriptor: &QueryDescriptor,
        page: &PageRequest,
        ttl: Duration,
        now: SystemTime,
        source: C,
    ) -> Result<CachedResult<Page<T>>, Error>
    where
        T: Serialize + DeserializeOwned + PageItem,
        E: fmt::Display,
        C: FnOnce(Option<&PageBound>) -> Result<Computed<Vec<T>>, E>,
    {
        let cursor = page.cursor.as_deref().and_then(Cursor::decode);
        let bound = cursor.map(|c| PageBound {
            order_value: c.order_value,
            id: c.id,
            direction: page.direction,
        });

        // Pagination inputs shape the result set, so they are keyed params:
        // distinct pages are distinct entries, while the items-only descriptor
        // stays usable for tag invalidation.
        let mut page_descriptor = descriptor
            .clone()
            .param("page.limit", page.limit)
            .param(
                "page.dir",
                match page.direction {
                    PageDirection::Next => "next",
                    PageDirection::Prev => "prev",
                },
            );
        if let Some(c) = cursor {
            page_descriptor = page_descriptor.param("page.after", format!("{}:{}", c.order_value, c.id));
        }

        let limit = page.limit;
        let has_previous = cursor.is_some();
        self.fetch(&page_descriptor, ttl, now, move || {
            source(bound.as_ref()).map(|computed| {
                let Computed { value: items, related } = computed;
                Computed {
                    value: Page::assemble(items, limit, has_previous),
                    related,
                }
            })
        })
    }

    /// Drop the entry for one descriptor from both tiers.
    pub fn invalidate(&self, descriptor: &QueryDescriptor) {
        let key = descriptor.cache_key();
        self.drop_keys(std::iter::once(key));
    }

    /// Drop every entry tagged with any of the given tags, from both tiers.
    ///
    /// The tag index is in-process state: entries written by other processes
    /// against a shared durable tier are not tracked here and lapse by TTL.
    pub fn invalidate_tags(&self, tags: &[&str]) -> usize {
        let keys: HashSet<String> = {
            let mut index = lock_unpoisoned(&self.tags);
            tags.iter()
                .filter_map(|tag| index.remove(*tag))
                .flatten()
                .collect()
        };
        let count = keys.len();
        self.drop_keys(keys.into_iter());
        count
    }

    /// Per-key statistics, keyed by cache key.
    pub fn stats(&self) -> Vec<(String, QueryKeyStats)> {
        let stats = lock_unpoisoned(&self.stats);
        let mut entries: Vec<_> = stats.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Statistics for keys flagged slow, sorted by cumulative compute time
    /// descending.
    pub fn slow_queries(&self) -> Vec<(String, QueryKeyStats)> {
        let mut entries: Vec<_> = self
            .stats()
            .into_iter()
            .filter(|(_, stats)| stats.slow)
            .collect();
        entries.sort_by(|a, b| b.1.total_compute_micros.cmp(&a.1.total_compute_micros));
        entries
    }

    fn prime_related(
        &self,
        descriptor: &QueryDescriptor,
        payload: Value,
        ttl: Duration,
        now: SystemTime,
        now_secs: u64,
    ) {
        let key = descriptor.cache_key();
        let envelope = Envelope {
            computed_at: now_secs,
            expires_at: now_secs + ttl.as_secs().max(1),
            payload,
        };
        match serde_json::to_vec(&envelope) {
            Ok(bytes) => {
                self.tier_set(&self.memory, &key, &bytes, ttl, now);
                self.tier_set(&self.durable, &key, &bytes, ttl, now);
                self.register_tags(descriptor, &key);
            }
            Err(err) => {
                tracing::warn!(key, error = %err, "failed to serialize primed entry");
            }
        }
    }

    fn drop_keys(&self, keys: impl Iterator<Item = String>) {
        let mut dropped = 0u64;
        let mut index = lock_unpoisoned(&self.tags);
        for key in keys {
            if let Err(err) = self.memory.delete(&key) {
                self.note_tier_error(&key, &err);
            }
            if let Err(err) = self.durable.delete(&key) {
                self.note_tier_error(&key, &err);
            }
            for members in index.values_mut() {
                members.remove(&key);
            }
            dropped += 1;
        }
        self.metrics
            .cache_invalidations
            .fetch_add(dropped, Ordering::Relaxed);
    }

    fn register_tags(&self, descriptor: &QueryDescriptor, key: &str) {
        if descriptor.tags().is_empty() {
            return;
        }
        let mut index = lock_unpoisoned(&self.tags);
        for tag in descriptor.tags() {
            index
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
    }

    /// Read one tier, treating failures and undecodable entries as misses:
    /// reads fall back through tiers rather than failing the lookup.
    fn tier_get<B: StorageBackend>(
        &self,
        tier: &B,
        key: &str,
        now: SystemTime,
        now_secs: u64,
    ) -> Option<Envelope> {
        match tier.get(key, now) {
            Ok(Some(bytes)) => match serde_json::from_slice::<Envelope>(&bytes) {
                Ok(envelope) if envelope.expires_at > now_secs => Some(envelope),
                Ok(_) => None,
                Err(err) => {
                    tracing::warn!(key, error = %err, "discarding undecodable cache entry");
                    let _ = tier.delete(key);
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                self.note_tier_error(key, &err);
                None
            }
        }
    }

    /// Write one tier best-effort; a failed write costs a recompute later,
    /// never the current result.
    fn tier_set<B: StorageBackend>(
        &self,
        tier: &B,
        key: &str,
        bytes: &[u8],
        ttl: Duration,
        now: SystemTime,
    ) {
        if let Err(err) = tier.set(key, bytes, ttl, now) {
            self.note_tier_error(key, &err);
        }
    }

    fn note_tier_error(&self, key: &str, err: &str) {
        self.metrics.record_storage_error();
        tracing::warn!(key, error = err, "cache tier operation failed");
    }

    fn record_hit(&self, key: &str, now_secs: u64) {
        let mut stats = lock_unpoisoned(&self.stats);
        let entry = stats.entry(key.to_string()).or_default();
        entry.hits += 1;
        entry.last_access = now_secs;
    }

    fn record_compute(&self, key: &str, elapsed: Duration, now_secs: u64) {
        let micros = elapsed.as_micros() as u64;
        self.metrics.cache_misses.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .compute_time_micros
            .fetch_add(micros, Ordering::Relaxed);

        let slow = elapsed >= self.slow_threshold;
        if slow {
            self.metrics.slow_queries.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(key, elapsed_ms = elapsed.as_millis() as u64, "slow query");
        }

        let mut stats = lock_unpoisoned(&self.stats);
        let entry = stats.entry(key.to_string()).or_default();
        entry.misses += 1;
        entry.total_compute_micros += micros;
        entry.last_access = now_secs;
        entry.slow |= slow;
    }
}

fn decode_payload<T: DeserializeOwned>(payload: Value) -> Result<T, Error> {
    serde_json::from_value(payload).map_err(|e| Error::Internal(e.to_string()))
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
