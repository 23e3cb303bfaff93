//! Cache entry storage.
//!
//! [`CachedResponseStore`] owns expiry and metrics; the key/value backend
//! behind it is a [`KeyValueCache`] handed out by a [`CacheManager`].

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use lru::LruCache;
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Duration, OffsetDateTime, PrimitiveDateTime};
use tracing::{debug, warn};

use super::capture::{CaptureOutcome, CapturedBody};
use super::clock::Clock;
use super::keys::CacheKey;
use super::lock::{rw_read, rw_write};
use super::operation::Operation;
use super::replay::replay;
use crate::response::{HttpResponse, ResponseError};

const SOURCE: &str = "cache::store";

pub const METRIC_CACHE_HIT_TOTAL: &str = "rewind_cache_hit_total";
pub const METRIC_CACHE_MISS_TOTAL: &str = "rewind_cache_miss_total";
pub const METRIC_CACHE_EXPIRED_TOTAL: &str = "rewind_cache_expired_total";
pub const METRIC_CACHE_STORE_TOTAL: &str = "rewind_cache_store_total";
pub const METRIC_CACHE_STORE_ERROR_TOTAL: &str = "rewind_cache_store_error_total";

/// Replication scope requested from a [`CacheManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheScope {
    #[default]
    Instance,
    Cluster,
}

impl fmt::Display for CacheScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Instance => "instance",
            Self::Cluster => "cluster",
        })
    }
}

#[derive(Debug, Error)]
pub enum CacheStoreError {
    #[error("cache `{cache}` failed to {op}: {reason}")]
    Backend {
        cache: String,
        op: &'static str,
        reason: String,
    },
}

impl CacheStoreError {
    pub fn backend(cache: impl Into<String>, op: &'static str, reason: impl Into<String>) -> Self {
        Self::Backend {
            cache: cache.into(),
            op,
            reason: reason.into(),
        }
    }
}

/// A stored response: operation log, body, and the instant it stops being valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(with = "time::serde::rfc3339")]
    expires_at: OffsetDateTime,
    operations: Vec<Operation>,
    body: CapturedBody,
}

impl CacheEntry {
    pub fn new(expires_at: OffsetDateTime, operations: Vec<Operation>, body: CapturedBody) -> Self {
        Self {
            expires_at,
            operations,
            body,
        }
    }

    pub fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn byte_body(&self) -> Option<&[u8]> {
        self.body.bytes()
    }

    pub fn string_body(&self) -> Option<&str> {
        self.body.text()
    }

    /// Expired at or after `expires_at`.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }

    pub fn replay(&self, response: &mut dyn HttpResponse) -> Result<(), ResponseError> {
        replay(&self.operations, &self.body, response)
    }
}

/// Scoped key/value backend. Implementations must tolerate concurrent use.
pub trait KeyValueCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<Arc<CacheEntry>>, CacheStoreError>;

    fn put(&self, key: CacheKey, entry: Arc<CacheEntry>) -> Result<(), CacheStoreError>;

    fn remove(&self, key: &CacheKey) -> Result<(), CacheStoreError>;
}

/// Hands out named caches.
pub trait CacheManager: Send + Sync {
    fn cache(&self, name: &str, scope: CacheScope) -> Arc<dyn KeyValueCache>;
}

/// LRU-bounded in-process cache.
pub struct MemoryCache {
    entries: RwLock<LruCache<CacheKey, Arc<CacheEntry>>>,
}

impl MemoryCache {
    pub fn new(limit: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(limit)),
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "memory_len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueCache for MemoryCache {
    fn get(&self, key: &CacheKey) -> Result<Option<Arc<CacheEntry>>, CacheStoreError> {
        // LRU lookups update recency, so even reads take the write lock.
        Ok(rw_write(&self.entries, SOURCE, "memory_get")
            .get(key)
            .cloned())
    }

    fn put(&self, key: CacheKey, entry: Arc<CacheEntry>) -> Result<(), CacheStoreError> {
        if let Some((evicted, _)) = rw_write(&self.entries, SOURCE, "memory_put").push(key, entry)
        {
            debug!(cache = "response", key = %evicted, "evicted least recently used entry");
        }
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> Result<(), CacheStoreError> {
        rw_write(&self.entries, SOURCE, "memory_remove").pop(key);
        Ok(())
    }
}

/// One [`MemoryCache`] per `(name, scope)`.
///
/// There is no replication: a cluster-scoped cache is served from process
/// memory like an instance-scoped one.
pub struct MemoryCacheManager {
    limit: NonZeroUsize,
    caches: DashMap<(String, CacheScope), Arc<MemoryCache>>,
}

impl MemoryCacheManager {
    pub fn new(limit: NonZeroUsize) -> Self {
        Self {
            limit,
            caches: DashMap::new(),
        }
    }

    /// Concrete handle, for inspection.
    pub fn memory_cache(&self, name: &str, scope: CacheScope) -> Arc<MemoryCache> {
        let entry = self
            .caches
            .entry((name.to_string(), scope))
            .or_insert_with(|| {
                if scope == CacheScope::Cluster {
                    warn!(
                        cache = name,
                        scope = %scope,
                        "cluster scope requested but no replication is available, serving from process memory"
                    );
                }
                Arc::new(MemoryCache::new(self.limit))
            });
        Arc::clone(entry.value())
    }
}

impl CacheManager for MemoryCacheManager {
    fn cache(&self, name: &str, scope: CacheScope) -> Arc<dyn KeyValueCache> {
        self.memory_cache(name, scope)
    }
}

/// Time-limited response entries on top of a [`KeyValueCache`].
///
/// Backend failures never reach the caller: a failed load is a miss and a
/// failed save leaves the cache as it was.
#[derive(Clone)]
pub struct CachedResponseStore {
    cache: Arc<dyn KeyValueCache>,
    clock: Arc<dyn Clock>,
}

impl CachedResponseStore {
    pub fn new(cache: Arc<dyn KeyValueCache>, clock: Arc<dyn Clock>) -> Self {
        Self { cache, clock }
    }

    pub fn load(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let entry = match self.cache.get(key) {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                counter!(METRIC_CACHE_MISS_TOTAL).increment(1);
                debug!(cache = "response", outcome = "miss", key = %key);
                return None;
            }
            Err(err) => {
                counter!(METRIC_CACHE_STORE_ERROR_TOTAL, "op" => "get").increment(1);
                counter!(METRIC_CACHE_MISS_TOTAL).increment(1);
                warn!(cache = "response", key = %key, error = %err, "cache lookup failed, treating as miss");
                return None;
            }
        };

        if entry.is_expired(self.clock.now()) {
            counter!(METRIC_CACHE_EXPIRED_TOTAL).increment(1);
            counter!(METRIC_CACHE_MISS_TOTAL).increment(1);
            debug!(cache = "response", outcome = "expired", key = %key);
            if let Err(err) = self.cache.remove(key) {
                counter!(METRIC_CACHE_STORE_ERROR_TOTAL, "op" => "remove").increment(1);
                warn!(cache = "response", key = %key, error = %err, "failed to remove expired entry");
            }
            return None;
        }

        counter!(METRIC_CACHE_HIT_TOTAL).increment(1);
        debug!(cache = "response", outcome = "hit", key = %key);
        Some(entry)
    }

    /// Store `outcome` for `ttl`. Returns whether an entry was written.
    pub fn save(&self, key: CacheKey, outcome: CaptureOutcome, ttl: Duration) -> bool {
        if !outcome.can_cache() {
            debug!(cache = "response", outcome = "uncacheable", key = %key);
            return false;
        }

        let expires_at = self
            .clock
            .now()
            .checked_add(ttl)
            .unwrap_or_else(|| PrimitiveDateTime::MAX.assume_utc());
        let (operations, body) = outcome.into_parts();
        let entry = Arc::new(CacheEntry::new(expires_at, operations, body));

        match self.cache.put(key.clone(), entry) {
            Ok(()) => {
                counter!(METRIC_CACHE_STORE_TOTAL).increment(1);
                debug!(cache = "response", outcome = "stored", key = %key, ttl_seconds = ttl.whole_seconds());
                true
            }
            Err(err) => {
                counter!(METRIC_CACHE_STORE_ERROR_TOTAL, "op" => "put").increment(1);
                warn!(cache = "response", key = %key, error = %err, "failed to store response");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use time::macros::datetime;

    use super::*;
    use crate::cache::capture::ResponseCapture;
    use crate::cache::clock::ManualClock;
    use crate::response::BufferedResponse;

    fn limit(value: usize) -> NonZeroUsize {
        NonZeroUsize::new(value).expect("non-zero")
    }

    fn outcome_with_body(text: &str) -> CaptureOutcome {
        let mut capture = ResponseCapture::new();
        capture.record(Operation::SetStatus { status: 200 });
        capture.record(Operation::SetContentType {
            content_type: "text/plain".into(),
        });
        {
            use std::fmt::Write as _;
            let mut sink = String::new();
            capture
                .writer(Box::new(&mut sink))
                .expect("writer")
                .write_str(text)
                .expect("write");
        }
        capture.into_outcome()
    }

    fn store_with_clock() -> (CachedResponseStore, Arc<MemoryCache>, Arc<ManualClock>) {
        let backend = Arc::new(MemoryCache::new(limit(8)));
        let clock = Arc::new(ManualClock::new(datetime!(2024-06-01 12:00:00 UTC)));
        let store = CachedResponseStore::new(backend.clone(), clock.clone());
        (store, backend, clock)
    }

    #[test]
    fn save_then_load_hits() {
        let (store, _, _) = store_with_clock();
        let key = CacheKey::from_parts("/p/a.html", None);
        assert!(store.save(key.clone(), outcome_with_body("hello"), Duration::hours(1)));

        let entry = store.load(&key).expect("hit");
        assert_eq!(entry.string_body(), Some("hello"));
        assert_eq!(entry.expires_at(), datetime!(2024-06-01 13:00:00 UTC));

        let mut response = BufferedResponse::new();
        entry.replay(&mut response).expect("replay");
        assert_eq!(response.body_text(), "hello");
        assert_eq!(response.header("content-type").as_deref(), Some("text/plain"));
    }

    #[test]
    fn expired_entry_is_removed_on_load() {
        let (store, backend, clock) = store_with_clock();
        let key = CacheKey::from_parts("/p/a.html", None);
        store.save(key.clone(), outcome_with_body("hello"), Duration::seconds(60));

        clock.advance(Duration::seconds(59));
        assert!(store.load(&key).is_some());

        clock.advance(Duration::seconds(1));
        assert!(store.load(&key).is_none(), "expiry is inclusive");
        assert!(backend.is_empty());
    }

    #[test]
    fn unrepresentable_expiry_saturates() {
        let (store, _, _) = store_with_clock();
        let key = CacheKey::from_parts("/p/a.html", None);
        assert!(store.save(key.clone(), outcome_with_body("hello"), Duration::MAX));

        let entry = store.load(&key).expect("hit");
        assert_eq!(entry.expires_at(), PrimitiveDateTime::MAX.assume_utc());
    }

    #[test]
    fn uncacheable_outcome_is_not_saved() {
        let (store, backend, _) = store_with_clock();
        let mut capture = ResponseCapture::new();
        capture.record(Operation::SetStatus { status: 404 });
        let saved = store.save(
            CacheKey::from_parts("/p/missing", None),
            capture.into_outcome(),
            Duration::hours(1),
        );
        assert!(!saved);
        assert!(backend.is_empty());
    }

    #[test]
    fn save_overwrites_existing_entry() {
        let (store, backend, _) = store_with_clock();
        let key = CacheKey::from_parts("/p/a.html", Some("v=1"));
        store.save(key.clone(), outcome_with_body("first"), Duration::hours(1));
        store.save(key.clone(), outcome_with_body("second"), Duration::hours(1));
        assert_eq!(backend.len(), 1);
        assert_eq!(store.load(&key).expect("hit").string_body(), Some("second"));
    }

    struct BrokenCache;

    impl KeyValueCache for BrokenCache {
        fn get(&self, _: &CacheKey) -> Result<Option<Arc<CacheEntry>>, CacheStoreError> {
            Err(CacheStoreError::backend("broken", "get", "offline"))
        }

        fn put(&self, _: CacheKey, _: Arc<CacheEntry>) -> Result<(), CacheStoreError> {
            Err(CacheStoreError::backend("broken", "put", "offline"))
        }

        fn remove(&self, _: &CacheKey) -> Result<(), CacheStoreError> {
            Err(CacheStoreError::backend("broken", "remove", "offline"))
        }
    }

    #[test]
    fn backend_failures_are_swallowed() {
        let clock = Arc::new(ManualClock::new(datetime!(2024-06-01 12:00:00 UTC)));
        let store = CachedResponseStore::new(Arc::new(BrokenCache), clock);
        let key = CacheKey::from_parts("/p/a.html", None);
        assert!(!store.save(key.clone(), outcome_with_body("x"), Duration::hours(1)));
        assert!(store.load(&key).is_none());
    }

    #[test]
    fn memory_cache_evicts_least_recently_used() {
        let cache = MemoryCache::new(limit(1));
        let entry = Arc::new(CacheEntry::new(
            datetime!(2030-01-01 00:00:00 UTC),
            Vec::new(),
            CapturedBody::Empty,
        ));
        let first = CacheKey::from_parts("/a", None);
        let second = CacheKey::from_parts("/b", None);
        cache.put(first.clone(), entry.clone()).expect("put");
        cache.put(second.clone(), entry).expect("put");
        assert!(cache.get(&first).expect("get").is_none());
        assert!(cache.get(&second).expect("get").is_some());
    }

    #[test]
    fn manager_returns_one_cache_per_name_and_scope() {
        let manager = MemoryCacheManager::new(limit(4));
        let a = manager.memory_cache("responses", CacheScope::Instance);
        let b = manager.memory_cache("responses", CacheScope::Instance);
        let c = manager.memory_cache("responses", CacheScope::Cluster);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn entry_round_trips_through_json() {
        let entry = CacheEntry::new(
            datetime!(2030-01-01 00:00:00 UTC),
            vec![Operation::SetStatus { status: 200 }],
            CapturedBody::Bytes(vec![1, 2, 3]),
        );
        let json = serde_json::to_string(&entry).expect("serialize");
        let back: CacheEntry = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, entry);
    }

    #[test]
    fn memory_cache_recovers_from_poisoned_lock() {
        let cache = MemoryCache::new(limit(2));

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = cache.entries.write().expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        let key = CacheKey::from_parts("/a", None);
        let entry = Arc::new(CacheEntry::new(
            datetime!(2030-01-01 00:00:00 UTC),
            Vec::new(),
            CapturedBody::Empty,
        ));
        cache.put(key.clone(), entry).expect("put");
        assert!(cache.get(&key).expect("get").is_some());
    }
}
