use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TtlCache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct CacheEntry<V> {
    value: V,
    expires_at: Option<Instant>,
}

/// A bounded LRU cache with per-entry TTL.
///
/// `get` refreshes recency; an entry past its expiry is removed on access
/// and reported missing. `set` evicts the least-recently-used entries
/// until the size is within the cap.
pub struct TtlCache<V> {
    inner: Mutex<LruCache<String, CacheEntry<V>>>,
    default_ttl: Option<Duration>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(capacity: usize, default_ttl: Option<Duration>) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(cap)),
            default_ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut cache = self.inner.lock();
        let expired = match cache.get(key) {
            Some(entry) => match entry.expires_at {
                Some(deadline) if Instant::now() >= deadline => true,
                _ => return Some(entry.value.clone()),
            },
            None => return None,
        };
        if expired {
            cache.pop(key);
        }
        None
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let entry = CacheEntry {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
        };
        self.inner.lock().put(key.into(), entry);
    }

    pub fn remove(&self, key: &str) -> bool {
        self.inner.lock().pop(key).is_some()
    }

    /// Current entry count, including not-yet-collected expired entries.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Whether a live (non-expired) entry exists, without refreshing
    /// recency or collecting it.
    pub fn contains(&self, key: &str) -> bool {
        let cache = self.inner.lock();
        match cache.peek(key) {
            Some(entry) => match entry.expires_at {
                Some(deadline) => Instant::now() < deadline,
                None => true,
            },
            None => false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MemoryPool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const DEFAULT_KV_CAPACITY: usize = 1024;
pub const DEFAULT_EMBEDDINGS_CAPACITY: usize = 4096;
pub const DEFAULT_SNAPSHOT_CAPACITY: usize = 1024;

/// A cached file snapshot: content hash plus raw bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub hash: String,
    pub bytes: Vec<u8>,
}

impl FileSnapshot {
    pub fn of(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let hash = hex::encode(Sha256::digest(&bytes));
        Self { hash, bytes }
    }
}

/// The three shared caches. Safe for concurrent access across runs.
pub struct MemoryPool {
    pub kv: TtlCache<Value>,
    pub embeddings: TtlCache<Vec<f32>>,
    pub file_snapshots: TtlCache<FileSnapshot>,
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new(None)
    }
}

impl MemoryPool {
    pub fn new(default_ttl: Option<Duration>) -> Self {
        Self::with_capacities(
            DEFAULT_KV_CAPACITY,
            DEFAULT_EMBEDDINGS_CAPACITY,
            DEFAULT_SNAPSHOT_CAPACITY,
            default_ttl,
        )
    }

    pub fn with_capacities(
        kv_cap: usize,
        embeddings_cap: usize,
        snapshots_cap: usize,
        default_ttl: Option<Duration>,
    ) -> Self {
        Self {
            kv: TtlCache::new(kv_cap, default_ttl),
            embeddings: TtlCache::new(embeddings_cap, default_ttl),
            file_snapshots: TtlCache::new(snapshots_cap, default_ttl),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_then_get_roundtrip() {
        let cache: TtlCache<Value> = TtlCache::new(8, None);
        cache.set("a", json!(1));
        assert_eq!(cache.get("a"), Some(json!(1)));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn eviction_removes_exactly_oldest_keys() {
        let cache: TtlCache<Value> = TtlCache::new(4, None);
        for i in 0..6 {
            cache.set(format!("k{i}"), json!(i));
        }
        // 6 writes into capacity 4: k0 and k1 evicted, the rest present.
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.get("k0"), None);
        assert_eq!(cache.get("k1"), None);
        for i in 2..6 {
            assert!(cache.get(&format!("k{i}")).is_some(), "k{i} should survive");
        }
    }

    #[test]
    fn get_refreshes_recency() {
        let cache: TtlCache<Value> = TtlCache::new(2, None);
        cache.set("old", json!(0));
        cache.set("mid", json!(1));
        // Touch "old" so "mid" becomes the eviction candidate.
        assert!(cache.get("old").is_some());
        cache.set("new", json!(2));
        assert!(cache.get("old").is_some());
        assert_eq!(cache.get("mid"), None);
    }

    #[test]
    fn expired_entry_is_removed_on_get() {
        let cache: TtlCache<Value> = TtlCache::new(8, Some(Duration::from_millis(0)));
        cache.set("gone", json!(true));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("gone"), None);
        // The expired entry was collected, not just hidden.
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn per_set_ttl_overrides_default() {
        let cache: TtlCache<Value> = TtlCache::new(8, Some(Duration::from_millis(0)));
        cache.set_with_ttl("sticky", json!(1), None);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("sticky"), Some(json!(1)));
    }

    #[test]
    fn contains_does_not_refresh() {
        let cache: TtlCache<Value> = TtlCache::new(2, None);
        cache.set("a", json!(1));
        cache.set("b", json!(2));
        assert!(cache.contains("a"));
        // "a" is still the LRU entry because contains() peeked.
        cache.set("c", json!(3));
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn snapshot_hash_is_content_addressed() {
        let a = FileSnapshot::of(b"hello".to_vec());
        let b = FileSnapshot::of(b"hello".to_vec());
        let c = FileSnapshot::of(b"other".to_vec());
        assert_eq!(a.hash, b.hash);
        assert_ne!(a.hash, c.hash);
        assert_eq!(a.bytes, b"hello");
    }

    #[test]
    fn pool_caches_are_independent() {
        let pool = MemoryPool::with_capacities(2, 2, 2, None);
        pool.kv.set("k", json!("v"));
        pool.embeddings.set("k", vec![0.1, 0.2]);
        pool.file_snapshots.set("k", FileSnapshot::of(b"x".to_vec()));
        assert!(pool.kv.get("k").is_some());
        assert!(pool.embeddings.get("k").is_some());
        assert!(pool.file_snapshots.get("k").is_some());
        pool.kv.remove("k");
        assert!(pool.kv.get("k").is_none());
        assert!(pool.embeddings.get("k").is_some());
    }
}
