//! Storage interface for limiter state and cache entries
//!
//! Everything the limiter and the cache persist flows through
//! [`StorageBackend`]: window states, abuse counters, ban records, and both
//! cache tiers. Any key-value store with TTL semantics satisfies it: the
//! in-process [`MemoryBackend`] here, or an adapter over Redis or similar.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

mod memory;

pub use memory::{MemoryBackend, MemoryBackendBuilder};


/// Byte-oriented key-value storage with per-entry TTLs.
///
/// Implementations must be safe to share across threads; callers pass the
/// current time explicitly so expiry can be tested deterministically.
pub trait StorageBackend: Send + Sync {
    /// Get the value for a key, or `None` if absent or expired.
    fn get(&self, key: &str, now: SystemTime) -> Result<Option<Vec<u8>>, String>;

    /// Set a value with a TTL, replacing any existing entry.
    fn set(&self, key: &str, value: &[u8], ttl: Duration, now: SystemTime) -> Result<(), String>;

    /// Remove a key. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> Result<(), String>;
}

impl<B: StorageBackend + ?Sized> StorageBackend for Arc<B> {
    fn get(&self, key: &str, now: SystemTime) -> Result<Option<Vec<u8>>, String> {
        (**self).get(key, now)
    }

    fn set(&self, key: &str, value: &[u8], ttl: Duration, now: SystemTime) -> Result<(), String> {
        (**self).set(key, value, ttl, now)
    }

    fn delete(&self, key: &str) -> Result<(), String> {
        (**self).delete(key)
    }
}
