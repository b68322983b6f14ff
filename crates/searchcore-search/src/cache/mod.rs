//! Searcher cache tier.
//!
//! Each searcher owns a set of bounded caches. When a new searcher replaces
//! an old one, each new cache can regenerate the most recently used entries
//! of its predecessor against the new index state (autowarming).
//!
//! - `SearchCache`: the cache contract
//! - `LruSearchCache`: the LRU implementation with statistics
//! - `CacheRegenerator`: recomputes one entry for a new searcher
//! - `SearcherCaches`: the named caches of one searcher

mod lru_cache;
mod regenerator;
mod tier;

use serde::Serialize;

use crate::error::SearchError;
use crate::searcher::Searcher;

pub use lru_cache::LruSearchCache;
pub use regenerator::{
    CacheRegenerator, CopyRegenerator, FieldValueRegenerator, FilterRegenerator,
    QueryResultRegenerator,
};
pub use tier::{
    DocumentCache, FieldValueCache, FilterCache, ResultCache, SearcherCaches, UserCache,
    UserRegenerator, UserValue,
};

/// Lifecycle of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheState {
    /// Being filled or warmed; not yet serving a registered searcher
    Created,
    Live,
    Closed,
}

/// Cache statistics. `cumulative_*` counters span every searcher generation.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub name: String,
    pub state: CacheState,
    pub size: usize,
    pub capacity: usize,
    pub autowarm_count: String,
    pub lookups: u64,
    pub hits: u64,
    pub hit_ratio: f64,
    pub inserts: u64,
    pub evictions: u64,
    pub warmup_ms: u64,
    pub cumulative_lookups: u64,
    pub cumulative_hits: u64,
    pub cumulative_inserts: u64,
    pub cumulative_evictions: u64,
}

/// A bounded, thread-safe cache owned by one searcher.
pub trait SearchCache<K, V>: Send + Sync {
    fn name(&self) -> &str;

    /// Lookup that counts toward `lookups` and `hits`.
    fn get(&self, key: &K) -> Option<V> {
        let found = self.peek(key);
        self.record_lookup(found.is_some());
        found
    }

    /// Lookup that refreshes recency without touching the statistics.
    ///
    /// Callers that decide afterwards whether the entry was usable report
    /// the outcome through [`SearchCache::record_lookup`].
    fn peek(&self, key: &K) -> Option<V>;

    fn record_lookup(&self, hit: bool);

    /// Insert, returning the previous value for `key`.
    fn put(&self, key: K, value: V) -> Option<V>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&self);

    fn state(&self) -> CacheState;

    fn set_state(&self, state: CacheState);

    /// Up to `limit` entries, most recently used first.
    fn hot_entries(&self, limit: usize) -> Vec<(K, V)>;

    /// Regenerate entries of `old` into this cache using `searcher`.
    ///
    /// Returns the number of entries regenerated.
    fn warm(&self, searcher: &Searcher, old: &dyn SearchCache<K, V>) -> Result<usize, SearchError>;

    fn close(&self);

    fn stats(&self) -> CacheStats;
}
