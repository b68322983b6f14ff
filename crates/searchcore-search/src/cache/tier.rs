//! The named caches owned by one searcher.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use searchcore_index::{IndexDocument, Query};
use searchcore_types::{CacheConfig, CoreConfig};
use tracing::{info, warn};

use super::{
    CacheRegenerator, CacheState, CacheStats, FieldValueRegenerator, FilterRegenerator,
    LruSearchCache, QueryResultRegenerator, SearchCache,
};
use crate::command::QueryResultKey;
use crate::doclist::DocList;
use crate::docset::DocSet;
use crate::error::SearchError;
use crate::field_values::UninvertedField;
use crate::searcher::Searcher;

/// Opaque value stored in a user-defined cache.
pub type UserValue = Arc<dyn Any + Send + Sync>;

/// Regenerator for a user-defined cache.
pub type UserRegenerator = Arc<dyn CacheRegenerator<String, UserValue>>;

pub type FilterCache = LruSearchCache<Query, Arc<DocSet>>;
pub type ResultCache = LruSearchCache<QueryResultKey, Arc<DocList>>;
pub type DocumentCache = LruSearchCache<u32, Arc<IndexDocument>>;
pub type FieldValueCache = LruSearchCache<String, Arc<UninvertedField>>;
pub type UserCache = LruSearchCache<String, UserValue>;

/// Every cache of one searcher. A disabled cache is `None`.
#[derive(Default)]
pub struct SearcherCaches {
    pub filter: Option<FilterCache>,
    pub result: Option<ResultCache>,
    pub document: Option<DocumentCache>,
    pub field_value: Option<FieldValueCache>,
    pub user: BTreeMap<String, UserCache>,
}

fn build<K, V>(
    name: &str,
    config: &CacheConfig,
    regenerator: Option<Arc<dyn CacheRegenerator<K, V>>>,
) -> Option<LruSearchCache<K, V>>
where
    K: std::hash::Hash + Eq + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    if !config.enabled {
        return None;
    }
    if regenerator.is_none() && !config.autowarm_count.is_disabled() {
        warn!(
            cache = name,
            autowarm = %config.autowarm_count,
            "Cache has autowarm configured but no regenerator; autowarming disabled"
        );
    }
    Some(LruSearchCache::new(name, config, regenerator))
}

impl SearcherCaches {
    pub fn from_config(config: &CoreConfig, user_regenerators: &HashMap<String, UserRegenerator>) -> Self {
        let user = config
            .user_caches
            .iter()
            .filter_map(|(name, cache_config)| {
                build(name, cache_config, user_regenerators.get(name).cloned())
                    .map(|cache| (name.clone(), cache))
            })
            .collect();

        Self {
            filter: build("filterCache", &config.filter_cache, Some(Arc::new(FilterRegenerator))),
            result: build(
                "queryResultCache",
                &config.query_result_cache,
                Some(Arc::new(QueryResultRegenerator)),
            ),
            document: build("documentCache", &config.document_cache, None),
            field_value: build(
                "fieldValueCache",
                &config.field_value_cache,
                Some(Arc::new(FieldValueRegenerator)),
            ),
            user,
        }
    }

    /// No caching at all. Used by realtime searchers.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_disabled(&self) -> bool {
        self.filter.is_none()
            && self.result.is_none()
            && self.document.is_none()
            && self.field_value.is_none()
            && self.user.is_empty()
    }

    /// Autowarm every cache from the matching cache of `old`.
    ///
    /// Field values warm first since sorted result regeneration reads them,
    /// and filters before results for the same reason.
    pub fn warm(&self, searcher: &Searcher, old: &SearcherCaches) {
        warm_one(searcher, self.field_value.as_ref(), old.field_value.as_ref());
        warm_one(searcher, self.filter.as_ref(), old.filter.as_ref());
        warm_one(searcher, self.result.as_ref(), old.result.as_ref());
        warm_one(searcher, self.document.as_ref(), old.document.as_ref());
        for (name, cache) in &self.user {
            warm_one(searcher, Some(cache), old.user.get(name));
        }
    }

    pub fn set_state(&self, state: CacheState) {
        self.for_each(|cache| cache.set_state(state));
    }

    pub fn close(&self) {
        self.for_each(|cache| cache.close());
    }

    pub fn stats(&self) -> Vec<CacheStats> {
        let mut stats = Vec::new();
        self.for_each(|cache| stats.push(cache.stats()));
        stats
    }

    fn for_each(&self, mut f: impl FnMut(&dyn CacheOps)) {
        if let Some(cache) = &self.filter {
            f(cache);
        }
        if let Some(cache) = &self.result {
            f(cache);
        }
        if let Some(cache) = &self.document {
            f(cache);
        }
        if let Some(cache) = &self.field_value {
            f(cache);
        }
        for cache in self.user.values() {
            f(cache);
        }
    }
}

/// Key-independent operations, so caches of different types can be visited together.
trait CacheOps {
    fn set_state(&self, state: CacheState);
    fn close(&self);
    fn stats(&self) -> CacheStats;
}

impl<K, V> CacheOps for LruSearchCache<K, V>
where
    K: std::hash::Hash + Eq + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn set_state(&self, state: CacheState) {
        SearchCache::set_state(self, state)
    }

    fn close(&self) {
        SearchCache::close(self)
    }

    fn stats(&self) -> CacheStats {
        SearchCache::stats(self)
    }
}

fn warm_one<K, V>(
    searcher: &Searcher,
    new: Option<&LruSearchCache<K, V>>,
    old: Option<&LruSearchCache<K, V>>,
) where
    K: std::hash::Hash + Eq + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    let (Some(new), Some(old)) = (new, old) else {
        return;
    };
    let result: Result<usize, SearchError> = new.warm(searcher, old);
    match result {
        Ok(warmed) if warmed > 0 => {
            info!(searcher = %searcher.name(), cache = new.name(), warmed, "Autowarmed cache");
        }
        Ok(_) => {}
        Err(e) => {
            warn!(searcher = %searcher.name(), cache = new.name(), error = %e, "Cache autowarm failed");
        }
    }
}
