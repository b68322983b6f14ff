//! LRU cache with statistics and autowarming.
//!
//! Design:
//! - LRU map protected by Mutex (every lookup updates recency)
//! - Counters are atomics so stats never take the map lock
//! - Cumulative counters carry over from the cache this one warmed from

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Instant;

use lru::LruCache;
use searchcore_types::{AutowarmCount, CacheConfig};
use tracing::{debug, warn};

use super::{CacheRegenerator, CacheState, CacheStats, SearchCache};
use crate::error::SearchError;
use crate::searcher::Searcher;

#[derive(Default)]
struct Counters {
    lookups: AtomicU64,
    hits: AtomicU64,
    inserts: AtomicU64,
    evictions: AtomicU64,
}

/// Totals inherited from previous generations.
#[derive(Default, Clone, Copy)]
struct Inherited {
    lookups: u64,
    hits: u64,
    inserts: u64,
    evictions: u64,
}

/// Bounded LRU cache.
pub struct LruSearchCache<K, V> {
    name: String,
    capacity: usize,
    autowarm: AutowarmCount,
    cache: Mutex<LruCache<K, V>>,
    state: RwLock<CacheState>,
    regenerator: Option<Arc<dyn CacheRegenerator<K, V>>>,
    counters: Counters,
    inherited: RwLock<Inherited>,
    warmup_ms: AtomicU64,
}

impl<K, V> LruSearchCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    pub fn new(
        name: impl Into<String>,
        config: &CacheConfig,
        regenerator: Option<Arc<dyn CacheRegenerator<K, V>>>,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            name: name.into(),
            capacity: capacity.get(),
            autowarm: config.autowarm_count,
            cache: Mutex::new(LruCache::new(capacity)),
            state: RwLock::new(CacheState::Created),
            regenerator,
            counters: Counters::default(),
            inherited: RwLock::new(Inherited::default()),
            warmup_ms: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock_cache(&self) -> MutexGuard<'_, LruCache<K, V>> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn inherit(&self, old: &CacheStats) {
        let mut inherited = match self.inherited.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *inherited = Inherited {
            lookups: old.cumulative_lookups,
            hits: old.cumulative_hits,
            inserts: old.cumulative_inserts,
            evictions: old.cumulative_evictions,
        };
    }
}

impl<K, V> SearchCache<K, V> for LruSearchCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn peek(&self, key: &K) -> Option<V> {
        self.lock_cache().get(key).cloned()
    }

    fn record_lookup(&self, hit: bool) {
        self.counters.lookups.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn put(&self, key: K, value: V) -> Option<V> {
        let mut cache = self.lock_cache();
        let replaced = cache.push(key.clone(), value);
        drop(cache);

        self.counters.inserts.fetch_add(1, Ordering::Relaxed);
        match replaced {
            Some((old_key, old_value)) if old_key == key => Some(old_value),
            Some(_) => {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => None,
        }
    }

    fn len(&self) -> usize {
        self.lock_cache().len()
    }

    fn clear(&self) {
        self.lock_cache().clear();
    }

    fn state(&self) -> CacheState {
        match self.state.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_state(&self, state: CacheState) {
        match self.state.write() {
            Ok(mut guard) => *guard = state,
            Err(poisoned) => *poisoned.into_inner() = state,
        }
    }

    fn hot_entries(&self, limit: usize) -> Vec<(K, V)> {
        self.lock_cache()
            .iter()
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn warm(&self, searcher: &Searcher, old: &dyn SearchCache<K, V>) -> Result<usize, SearchError> {
        self.inherit(&old.stats());

        let Some(regenerator) = &self.regenerator else {
            return Ok(0);
        };
        if self.autowarm.is_disabled() {
            return Ok(0);
        }

        let start = Instant::now();
        let entries = old.hot_entries(self.autowarm.resolve(old.len()));

        let mut warmed = 0;
        // Least recently used first so the new cache keeps the same recency order.
        for (key, value) in entries.iter().rev() {
            match regenerator.regenerate(searcher, self, key, value) {
                Ok(true) => warmed += 1,
                Ok(false) => break,
                Err(e) => {
                    warn!(cache = %self.name, error = %e, "Error during autowarming of cache entry");
                }
            }
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        self.warmup_ms.store(elapsed_ms, Ordering::Relaxed);
        debug!(cache = %self.name, warmed, elapsed_ms, "Autowarmed cache");
        Ok(warmed)
    }

    fn close(&self) {
        self.set_state(CacheState::Closed);
        self.clear();
    }

    fn stats(&self) -> CacheStats {
        let lookups = self.counters.lookups.load(Ordering::Relaxed);
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let inserts = self.counters.inserts.load(Ordering::Relaxed);
        let evictions = self.counters.evictions.load(Ordering::Relaxed);
        let inherited = match self.inherited.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };

        CacheStats {
            name: self.name.clone(),
            state: self.state(),
            size: self.len(),
            capacity: self.capacity,
            autowarm_count: self.autowarm.to_string(),
            lookups,
            hits,
            hit_ratio: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            inserts,
            evictions,
            warmup_ms: self.warmup_ms.load(Ordering::Relaxed),
            cumulative_lookups: inherited.lookups + lookups,
            cumulative_hits: inherited.hits + hits,
            cumulative_inserts: inherited.inserts + inserts,
            cumulative_evictions: inherited.evictions + evictions,
        }
    }
}
