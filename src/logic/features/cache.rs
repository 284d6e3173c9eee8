//! Feature Cache - TTL + LRU memoization of per-entity aggregates
//!
//! Keys are `(EntityKey, FeatureFamily)` so two families of the same entity
//! expire independently. Each key owns a slot with its own mutex: the map lock
//! is only held to find or insert the slot, and the slot lock serializes the
//! computation so concurrent misses on one key compute once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::record::EntityKey;
use crate::constants::{DEFAULT_CACHE_CAPACITY, DEFAULT_FEATURE_CACHE_TTL};

// ============================================================================
// KEYS
// ============================================================================

/// Group of features cached and invalidated as a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureFamily {
    Rate,
    BaselineDeviation,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub entity: EntityKey,
    pub family: FeatureFamily,
}

impl CacheKey {
    pub fn new(entity: EntityKey, family: FeatureFamily) -> Self {
        Self { entity, family }
    }
}

// ============================================================================
// SLOTS
// ============================================================================

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

struct CacheSlot<V> {
    entry: Mutex<Option<CacheEntry<V>>>,
    last_access: AtomicU64,
}

impl<V> CacheSlot<V> {
    fn new(tick: u64) -> Self {
        Self {
            entry: Mutex::new(None),
            last_access: AtomicU64::new(tick),
        }
    }
}

/// Counters since construction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// ============================================================================
// FEATURE CACHE
// ============================================================================

pub struct FeatureCache<V> {
    slots: RwLock<HashMap<CacheKey, Arc<CacheSlot<V>>>>,
    capacity: usize,
    default_ttl: Duration,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V: Clone> FeatureCache<V> {
    pub fn new(default_ttl: Duration, capacity: usize) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            default_ttl,
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Return the live value for `(entity, family)` or compute and store it
    ///
    /// A failed computation stores nothing and the error is returned as-is.
    pub fn get_or_compute<F, E>(
        &self,
        entity: &EntityKey,
        family: FeatureFamily,
        ttl: Duration,
        compute: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        self.with_value(entity, family, ttl, compute, |value| Ok(value.clone()))
    }

    /// Run `visit` on the live value, computing it first on a miss
    ///
    /// `visit` holds the slot lock, so it may update the value in place without
    /// racing other callers for the same key. The expiry is not extended.
    pub fn with_value<F, G, R, E>(
        &self,
        entity: &EntityKey,
        family: FeatureFamily,
        ttl: Duration,
        compute: F,
        visit: G,
    ) -> Result<R, E>
    where
        F: FnOnce() -> Result<V, E>,
        G: FnOnce(&mut V) -> Result<R, E>,
    {
        let key = CacheKey::new(entity.clone(), family);
        let slot = self.slot(&key);
        let mut entry = slot.entry.lock();
        slot.last_access.store(self.tick(), Ordering::Relaxed);

        match entry.as_ref().map(|cached| cached.expires_at > Instant::now()) {
            Some(true) => {
                if let Some(cached) = entry.as_mut() {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return visit(&mut cached.value);
                }
            }
            Some(false) => {
                log::trace!("Cache entry expired: {} / {:?}", key.entity, key.family);
                *entry = None;
            }
            None => {}
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let cached = entry.insert(CacheEntry {
            value: compute()?,
            expires_at: Instant::now() + ttl,
        });
        visit(&mut cached.value)
    }

    /// `get_or_compute` with the configured TTL
    pub fn get_or_compute_default<F, E>(
        &self,
        entity: &EntityKey,
        family: FeatureFamily,
        compute: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        self.get_or_compute(entity, family, self.default_ttl, compute)
    }

    /// Live value without computing
    pub fn peek(&self, entity: &EntityKey, family: FeatureFamily) -> Option<V> {
        let key = CacheKey::new(entity.clone(), family);
        let slot = self.slots.read().get(&key).cloned()?;
        let entry = slot.entry.lock();
        entry
            .as_ref()
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value.clone())
    }

    /// Drop every family cached for an entity
    pub fn invalidate(&self, entity: &EntityKey) -> usize {
        let mut slots = self.slots.write();
        let before = slots.len();
        slots.retain(|key, _| key.entity != *entity);
        before - slots.len()
    }

    pub fn clear(&self) {
        self.slots.write().clear();
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn slot(&self, key: &CacheKey) -> Arc<CacheSlot<V>> {
        if let Some(slot) = self.slots.read().get(key) {
            return Arc::clone(slot);
        }

        let mut slots = self.slots.write();
        if let Some(slot) = slots.get(key) {
            return Arc::clone(slot);
        }

        let slot = Arc::new(CacheSlot::new(self.tick()));
        slots.insert(key.clone(), Arc::clone(&slot));
        if slots.len() > self.capacity {
            self.evict(&mut slots, key);
        }
        slot
    }

    /// Purge expired entries, then least-recently-used ones until under capacity
    fn evict(&self, slots: &mut HashMap<CacheKey, Arc<CacheSlot<V>>>, keep: &CacheKey) {
        let now = Instant::now();
        let before = slots.len();

        // A slot handed to a caller is in use even before its lock is taken
        slots.retain(|key, slot| {
            if key == keep || Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.entry.try_lock() {
                Some(entry) => entry.as_ref().map(|e| e.expires_at > now).unwrap_or(false),
                None => true,
            }
        });

        while slots.len() > self.capacity {
            let oldest = slots
                .iter()
                .filter(|(key, slot)| *key != keep && Arc::strong_count(slot) == 1)
                .min_by_key(|(_, slot)| slot.last_access.load(Ordering::Relaxed))
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    slots.remove(&key);
                }
                None => break,
            }
        }

        let evicted = (before - slots.len()) as u64;
        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
            log::debug!("Feature cache evicted {} entries", evicted);
        }
    }
}

impl<V: Clone> Default for FeatureCache<V> {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(DEFAULT_FEATURE_CACHE_TTL),
            DEFAULT_CACHE_CAPACITY,
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;

    fn ip(n: u8) -> EntityKey {
        EntityKey::source_ip(format!("10.0.0.{}", n))
    }

    #[test]
    fn test_hit_before_expiry() {
        let cache: FeatureCache<u32> = FeatureCache::default();
        let ttl = Duration::from_secs(60);

        let first = cache.get_or_compute(&ip(1), FeatureFamily::Rate, ttl, || Ok::<_, Infallible>(7));
        let second = cache.get_or_compute_default(&ip(1), FeatureFamily::Rate, || Ok::<_, Infallible>(99));

        assert_eq!(first, Ok(7));
        assert_eq!(second, Ok(7));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_recompute_after_ttl() {
        let cache: FeatureCache<u32> = FeatureCache::default();
        let ttl = Duration::from_millis(20);

        cache.get_or_compute(&ip(1), FeatureFamily::Rate, ttl, || Ok::<_, Infallible>(1)).unwrap();
        thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.peek(&ip(1), FeatureFamily::Rate), None);

        let value = cache.get_or_compute(&ip(1), FeatureFamily::Rate, ttl, || Ok::<_, Infallible>(2));
        assert_eq!(value, Ok(2));
    }

    #[test]
    fn test_families_independent() {
        let cache: FeatureCache<&'static str> = FeatureCache::default();
        let ttl = Duration::from_secs(60);

        cache.get_or_compute(&ip(1), FeatureFamily::Rate, ttl, || Ok::<_, Infallible>("rate")).unwrap();
        let deviation = cache
            .get_or_compute(&ip(1), FeatureFamily::BaselineDeviation, ttl, || Ok::<_, Infallible>("dev"))
            .unwrap();

        assert_eq!(deviation, "dev");
        assert_eq!(cache.peek(&ip(1), FeatureFamily::Rate), Some("rate"));
        assert_eq!(cache.invalidate(&ip(1)), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_error_not_cached() {
        let cache: FeatureCache<u32> = FeatureCache::default();
        let ttl = Duration::from_secs(60);

        let failed: Result<u32, &str> = cache.get_or_compute(&ip(1), FeatureFamily::Rate, ttl, || Err("db down"));
        assert_eq!(failed, Err("db down"));

        let ok: Result<u32, &str> = cache.get_or_compute(&ip(1), FeatureFamily::Rate, ttl, || Ok(5));
        assert_eq!(ok, Ok(5));
    }

    #[test]
    fn test_concurrent_miss_computes_once() {
        let cache: FeatureCache<u64> = FeatureCache::default();
        let computations = AtomicUsize::new(0);
        let barrier = Barrier::new(8);
        let ttl = Duration::from_secs(60);

        let results: Vec<u64> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        cache
                            .get_or_compute(&ip(1), FeatureFamily::Rate, ttl, || {
                                computations.fetch_add(1, Ordering::SeqCst);
                                thread::sleep(Duration::from_millis(50));
                                Ok::<_, Infallible>(42)
                            })
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(computations.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|&v| v == 42));
    }

    #[test]
    fn test_with_value_updates_in_place() {
        let cache: FeatureCache<Vec<u32>> = FeatureCache::default();
        let ttl = Duration::from_secs(60);

        let len = cache.with_value(&ip(1), FeatureFamily::Rate, ttl, || Ok::<_, Infallible>(vec![1]), |v| {
            v.push(2);
            Ok(v.len())
        });
        assert_eq!(len, Ok(2));
        assert_eq!(cache.peek(&ip(1), FeatureFamily::Rate), Some(vec![1, 2]));
    }

    #[test]
    fn test_eviction_skips_slot_in_use() {
        let cache: FeatureCache<u8> = FeatureCache::new(Duration::from_secs(60), 1);
        let ttl = Duration::from_secs(60);
        let held_key = CacheKey::new(ip(1), FeatureFamily::Rate);

        // Handed out but not locked yet
        let held = cache.slot(&held_key);
        cache.get_or_compute(&ip(2), FeatureFamily::Rate, ttl, || Ok::<_, Infallible>(2)).unwrap();

        let current = cache.slots.read().get(&held_key).cloned().unwrap();
        assert!(Arc::ptr_eq(&held, &current));
        drop((held, current));

        // Once released the slot is an ordinary eviction candidate
        cache.get_or_compute(&ip(3), FeatureFamily::Rate, ttl, || Ok::<_, Infallible>(3)).unwrap();
        assert!(!cache.slots.read().contains_key(&held_key));
    }

    #[test]
    fn test_capacity_pressure_computes_once_per_key() {
        let cache: FeatureCache<u64> = FeatureCache::new(Duration::from_secs(60), 1);
        let ttl = Duration::from_secs(60);

        for round in 0..20u8 {
            let keys = [ip(round.wrapping_mul(2)), ip(round.wrapping_mul(2) + 1)];
            let computations = [AtomicUsize::new(0), AtomicUsize::new(0)];
            let barrier = Barrier::new(8);

            thread::scope(|s| {
                for t in 0..8 {
                    let (keys, computations, barrier, cache) = (&keys, &computations, &barrier, &cache);
                    s.spawn(move || {
                        let which = t % 2;
                        barrier.wait();
                        cache
                            .get_or_compute(&keys[which], FeatureFamily::Rate, ttl, || {
                                computations[which].fetch_add(1, Ordering::SeqCst);
                                // Both keys in flight at once, so each insert overflows capacity
                                let started = Instant::now();
                                while computations[1 - which].load(Ordering::SeqCst) == 0
                                    && started.elapsed() < Duration::from_secs(1)
                                {
                                    thread::yield_now();
                                }
                                Ok::<_, Infallible>(which as u64)
                            })
                            .unwrap();
                    });
                }
            });

            assert_eq!(computations[0].load(Ordering::SeqCst), 1, "round {}", round);
            assert_eq!(computations[1].load(Ordering::SeqCst), 1, "round {}", round);
        }
    }

    #[test]
    fn test_lru_eviction_bounds_size() {
        let cache: FeatureCache<u8> = FeatureCache::new(Duration::from_secs(60), 2);
        let ttl = Duration::from_secs(60);

        cache.get_or_compute(&ip(1), FeatureFamily::Rate, ttl, || Ok::<_, Infallible>(1)).unwrap();
        cache.get_or_compute(&ip(2), FeatureFamily::Rate, ttl, || Ok::<_, Infallible>(2)).unwrap();
        // Touch ip(1) so ip(2) is the least recently used
        cache.get_or_compute(&ip(1), FeatureFamily::Rate, ttl, || Ok::<_, Infallible>(0)).unwrap();
        cache.get_or_compute(&ip(3), FeatureFamily::Rate, ttl, || Ok::<_, Infallible>(3)).unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.peek(&ip(1), FeatureFamily::Rate), Some(1));
        assert_eq!(cache.peek(&ip(2), FeatureFamily::Rate), None);
        assert_eq!(cache.stats().evictions, 1);
    }
}
