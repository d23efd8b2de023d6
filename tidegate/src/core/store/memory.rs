use super::StorageBackend;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

#[cfg(feature = "ahash")]
use ahash::AHashMap as HashMap;
#[cfg(not(feature = "ahash"))]
use std::collections::HashMap;

const DEFAULT_CAPACITY: usize = 1000;
const CAPACITY_OVERHEAD_FACTOR: f64 = 1.3;
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;

/// Sharded in-process TTL store
///
/// Keys are partitioned across shards, each behind its own lock, so
/// concurrent requests for unrelated clients or cache keys rarely contend.
/// Expired entries are swept per shard at a fixed interval; reads never
/// return an expired value regardless of sweep timing.
///
/// # Example
///
/// ```
/// use tidegate::MemoryBackend;
/// use std::time::Duration;
///
/// let store = MemoryBackend::builder()
///     .capacity(100_000)
///     .cleanup_interval(Duration::from_secs(300))
///     .build();
/// ```
pub struct MemoryBackend {
    shards: Vec<Shard>,
}

struct Shard {
    data: Mutex<HashMap<String, (Vec<u8>, SystemTime)>>,
    next_cleanup: Mutex<SystemTime>,
    cleanup_interval: Duration,
}

/// Builder for configuring a [`MemoryBackend`]
pub struct MemoryBackendBuilder {
    capacity: usize,
    shard_count: usize,
    cleanup_interval: Duration,
}

impl MemoryBackend {
    /// Create a backend with default capacity, shard count, and sweep interval.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder for fine-grained configuration.
    pub fn builder() -> MemoryBackendBuilder {
        MemoryBackendBuilder::default()
    }

    fn with_config(capacity: usize, shard_count: usize, cleanup_interval: Duration) -> Self {
        let per_shard = (capacity as f64 * CAPACITY_OVERHEAD_FACTOR) as usize / shard_count.max(1);
        let shards = (0..shard_count.max(1))
            .map(|_| Shard {
                data: Mutex::new(HashMap::with_capacity(per_shard)),
                next_cleanup: Mutex::new(SystemTime::now() + cleanup_interval),
                cleanup_interval,
            })
            .collect();
        MemoryBackend { shards }
    }

    fn shard(&self, key: &str) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    /// Number of live (possibly-expired-but-unswept) entries, for tests.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.data.lock().map(|d| d.len()).unwrap_or(0))
            .sum()
    }
}

impl Shard {
    fn maybe_clean_expired(&self, now: SystemTime) {
        let due = match self.next_cleanup.lock() {
            Ok(next) => now >= *next,
            Err(_) => return,
        };
        if !due {
            return;
        }
        if let Ok(mut data) = self.data.lock() {
            data.retain(|_, (_, expiry)| *expiry > now);
        }
        if let Ok(mut next) = self.next_cleanup.lock() {
            *next = now + self.cleanup_interval;
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str, now: SystemTime) -> Result<Option<Vec<u8>>, String> {
        let shard = self.shard(key);
        let data = shard.data.lock().map_err(|_| "shard lock poisoned".to_string())?;
        match data.get(key) {
            Some((value, expiry)) if *expiry > now => Ok(Some(value.clone())),
            _ => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &[u8], ttl: Duration, now: SystemTime) -> Result<(), String> {
        let shard = self.shard(key);
        shard.maybe_clean_expired(now);
        let mut data = shard.data.lock().map_err(|_| "shard lock poisoned".to_string())?;
        data.insert(key.to_string(), (value.to_vec(), now + ttl));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), String> {
        let shard = self.shard(key);
        let mut data = shard.data.lock().map_err(|_| "shard lock poisoned".to_string())?;
        data.remove(key);
        Ok(())
    }
}

impl Default for MemoryBackendBuilder {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            shard_count: default_shard_count(),
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
        }
    }
}

fn default_shard_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 4)
        .unwrap_or(16)
}

impl MemoryBackendBuilder {
    /// Expected number of keys; 30% extra space is allocated to reduce
    /// rehashing.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Number of lock shards. Defaults to 4x the available parallelism.
    pub fn shard_count(mut self, shard_count: usize) -> Self {
        self.shard_count = shard_count.max(1);
        self
    }

    /// Interval between per-shard sweeps of expired entries.
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Build the backend.
    pub fn build(self) -> MemoryBackend {
        MemoryBackend::with_config(self.capacity, self.shard_count, self.cleanup_interval)
    }
}
