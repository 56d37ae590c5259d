//! Two-tier render cache.
//!
//! Vector tier: encoded vector documents (`Bytes`).
//! Bitmap tier: rasterized bitmaps, shared by reference.
//!
//! Every operation holds its tier lock for its whole duration, and stored
//! values are immutable, so a reader sees either the previous or the new
//! value for a key, never a partially written one.

use std::sync::RwLock;

use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use thiserror::Error;
use tracing::info;

use crate::domain::vector::Bitmap;

use super::config::CacheConfig;
use super::keys::{CacheKey, CacheTier};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

pub(crate) const METRIC_CACHE_HIT: &str = "calamo_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS: &str = "calamo_cache_miss_total";
pub(crate) const METRIC_CACHE_EVICT: &str = "calamo_cache_evict_total";
pub(crate) const METRIC_CACHE_PURGE: &str = "calamo_cache_purge_total";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheStoreError {
    #[error("key belongs to the {actual} tier, not the {expected} tier")]
    TierMismatch {
        expected: CacheTier,
        actual: CacheTier,
    },
}

pub struct CacheStore {
    vectors: RwLock<LruCache<CacheKey, Bytes>>,
    bitmaps: RwLock<LruCache<CacheKey, Bitmap>>,
}

impl CacheStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            vectors: RwLock::new(LruCache::new(config.vector_limit_non_zero())),
            bitmaps: RwLock::new(LruCache::new(config.bitmap_limit_non_zero())),
        }
    }

    // ========================================================================
    // Vector tier
    // ========================================================================

    pub fn get_vector(&self, key: &CacheKey) -> Option<Bytes> {
        let value = rw_write(&self.vectors, SOURCE, "get_vector")
            .get(key)
            .cloned();
        record_lookup(CacheTier::Vector, value.is_some());
        value
    }

    /// Read without touching recency or hit/miss accounting.
    pub fn peek_vector(&self, key: &CacheKey) -> Option<Bytes> {
        rw_read(&self.vectors, SOURCE, "peek_vector")
            .peek(key)
            .cloned()
    }

    pub fn put_vector(&self, key: CacheKey, value: Bytes) -> Result<(), CacheStoreError> {
        ensure_tier(&key, CacheTier::Vector)?;
        let mut tier = rw_write(&self.vectors, SOURCE, "put_vector");
        let replacing = tier.contains(&key);
        if tier.push(key, value).is_some() && !replacing {
            counter!(METRIC_CACHE_EVICT, "tier" => CacheTier::Vector.tag()).increment(1);
        }
        Ok(())
    }

    /// Drop a single entry, used when its bytes no longer decode.
    pub fn evict_vector(&self, key: &CacheKey) -> bool {
        rw_write(&self.vectors, SOURCE, "evict_vector")
            .pop(key)
            .is_some()
    }

    pub fn clear_vectors(&self) {
        rw_write(&self.vectors, SOURCE, "clear_vectors").clear();
    }

    pub fn vector_len(&self) -> usize {
        rw_read(&self.vectors, SOURCE, "vector_len").len()
    }

    // ========================================================================
    // Bitmap tier
    // ========================================================================

    pub fn get_bitmap(&self, key: &CacheKey) -> Option<Bitmap> {
        let value = rw_write(&self.bitmaps, SOURCE, "get_bitmap")
            .get(key)
            .cloned();
        record_lookup(CacheTier::Bitmap, value.is_some());
        value
    }

    /// Presence check without touching recency or hit/miss accounting.
    pub fn contains_bitmap(&self, key: &CacheKey) -> bool {
        rw_read(&self.bitmaps, SOURCE, "contains_bitmap").contains(key)
    }

    pub fn put_bitmap(&self, key: CacheKey, value: Bitmap) -> Result<(), CacheStoreError> {
        ensure_tier(&key, CacheTier::Bitmap)?;
        let mut tier = rw_write(&self.bitmaps, SOURCE, "put_bitmap");
        let replacing = tier.contains(&key);
        if tier.push(key, value).is_some() && !replacing {
            counter!(METRIC_CACHE_EVICT, "tier" => CacheTier::Bitmap.tag()).increment(1);
        }
        Ok(())
    }

    pub fn evict_bitmap(&self, key: &CacheKey) -> bool {
        rw_write(&self.bitmaps, SOURCE, "evict_bitmap")
            .pop(key)
            .is_some()
    }

    pub fn clear_bitmaps(&self) {
        rw_write(&self.bitmaps, SOURCE, "clear_bitmaps").clear();
    }

    pub fn bitmap_len(&self) -> usize {
        rw_read(&self.bitmaps, SOURCE, "bitmap_len").len()
    }

    // ========================================================================
    // Bulk operations
    // ========================================================================

    /// Empty both tiers.
    pub fn clear(&self) {
        let vectors = self.vector_len();
        let bitmaps = self.bitmap_len();
        self.clear_vectors();
        self.clear_bitmaps();
        counter!(METRIC_CACHE_PURGE).increment(1);
        info!(
            target = "cache::store",
            op = "clear",
            vectors_dropped = vectors,
            bitmaps_dropped = bitmaps,
            "Render cache purged"
        );
    }

    pub fn is_empty(&self) -> bool {
        self.vector_len() == 0 && self.bitmap_len() == 0
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

fn ensure_tier(key: &CacheKey, expected: CacheTier) -> Result<(), CacheStoreError> {
    if key.tier() == expected {
        Ok(())
    } else {
        Err(CacheStoreError::TierMismatch {
            expected,
            actual: key.tier(),
        })
    }
}

fn record_lookup(tier: CacheTier, hit: bool) {
    let name = if hit { METRIC_CACHE_HIT } else { METRIC_CACHE_MISS };
    counter!(name, "tier" => tier.tag()).increment(1);
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::domain::types::{ConversionOptions, EngineOptions};
    use crate::domain::vector::VectorDocument;

    fn vector_key(text: &str) -> CacheKey {
        CacheKey::vector(
            text,
            &ConversionOptions { display: false },
            &EngineOptions::default(),
        )
    }

    fn bitmap_key(x_height: f64) -> CacheKey {
        let doc = VectorDocument::from_markup(r#"<svg width="1ex" height="1ex"/>"#)
            .expect("valid svg");
        CacheKey::bitmap(&doc, x_height, 1.0)
    }

    fn sample_bitmap() -> Bitmap {
        Bitmap::new(1, 1, 1.0, vec![0, 0, 0, 255])
    }

    #[test]
    fn vector_tier_roundtrip() {
        let store = CacheStore::default();
        let key = vector_key("x");

        assert!(store.get_vector(&key).is_none());
        store
            .put_vector(key.clone(), Bytes::from_static(b"<svg/>"))
            .expect("vector key");
        assert_eq!(
            store.get_vector(&key),
            Some(Bytes::from_static(b"<svg/>"))
        );

        assert!(store.evict_vector(&key));
        assert!(store.get_vector(&key).is_none());
        assert!(!store.evict_vector(&key));
    }

    #[test]
    fn bitmap_tier_roundtrip() {
        let store = CacheStore::default();
        let key = bitmap_key(8.0);

        store
            .put_bitmap(key.clone(), sample_bitmap())
            .expect("bitmap key");
        assert!(store.contains_bitmap(&key));
        assert_eq!(store.get_bitmap(&key), Some(sample_bitmap()));
        assert!(!store.contains_bitmap(&bitmap_key(9.0)));
    }

    #[test]
    fn keys_are_rejected_by_the_other_tier() {
        let store = CacheStore::default();

        let err = store
            .put_vector(bitmap_key(8.0), Bytes::new())
            .expect_err("bitmap key in vector tier");
        assert_eq!(
            err,
            CacheStoreError::TierMismatch {
                expected: CacheTier::Vector,
                actual: CacheTier::Bitmap,
            }
        );
        assert!(store.put_bitmap(vector_key("x"), sample_bitmap()).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn tiers_clear_independently() {
        let store = CacheStore::default();
        store
            .put_vector(vector_key("x"), Bytes::from_static(b"a"))
            .expect("vector key");
        store
            .put_bitmap(bitmap_key(8.0), sample_bitmap())
            .expect("bitmap key");

        store.clear_bitmaps();
        assert_eq!(store.vector_len(), 1);
        assert_eq!(store.bitmap_len(), 0);

        store
            .put_bitmap(bitmap_key(8.0), sample_bitmap())
            .expect("bitmap key");
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn lru_eviction_bounds_each_tier() {
        let store = CacheStore::new(&CacheConfig {
            vector_limit: 2,
            ..Default::default()
        });

        store.put_vector(vector_key("a"), Bytes::from_static(b"a")).expect("a");
        store.put_vector(vector_key("b"), Bytes::from_static(b"b")).expect("b");
        assert!(store.get_vector(&vector_key("a")).is_some());

        // "b" is now least recently used.
        store.put_vector(vector_key("c"), Bytes::from_static(b"c")).expect("c");

        assert_eq!(store.vector_len(), 2);
        assert!(store.peek_vector(&vector_key("a")).is_some());
        assert!(store.peek_vector(&vector_key("b")).is_none());
        assert!(store.peek_vector(&vector_key("c")).is_some());
    }

    #[test]
    fn concurrent_writers_never_lose_or_tear_entries() {
        let store = Arc::new(CacheStore::default());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for round in 0..50 {
                        let key = vector_key(&format!("eq-{round}"));
                        let payload = format!("payload-{round}");
                        store
                            .put_vector(key.clone(), Bytes::from(payload.clone()))
                            .expect("vector key");
                        let seen = store.get_vector(&key).expect("present after put");
                        assert_eq!(seen, Bytes::from(payload), "worker {worker}");
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("worker finished");
        }
        assert_eq!(store.vector_len(), 50);
    }

    #[test]
    fn store_recovers_from_poisoned_lock() {
        let store = CacheStore::default();

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store
                .vectors
                .write()
                .expect("vector lock should be acquired");
            panic!("poison vector lock");
        }));

        store
            .put_vector(vector_key("x"), Bytes::from_static(b"x"))
            .expect("vector key");
        assert!(store.get_vector(&vector_key("x")).is_some());
    }
}
