//! Entry regeneration for autowarming.

use std::sync::Arc;

use searchcore_index::Query;

use super::SearchCache;
use crate::command::{QueryCommand, QueryFlags, QueryResultKey};
use crate::doclist::DocList;
use crate::docset::DocSet;
use crate::error::SearchError;
use crate::field_values::UninvertedField;
use crate::searcher::Searcher;

/// Recomputes one old cache entry against a new searcher.
pub trait CacheRegenerator<K, V>: Send + Sync {
    /// Regenerate `key` into `new_cache`.
    ///
    /// Returning `Ok(false)` stops warming the rest of the cache.
    fn regenerate(
        &self,
        searcher: &Searcher,
        new_cache: &dyn SearchCache<K, V>,
        key: &K,
        old_value: &V,
    ) -> Result<bool, SearchError>;
}

/// Recomputes the document set of a filter query.
#[derive(Debug, Default, Clone, Copy)]
pub struct FilterRegenerator;

impl CacheRegenerator<Query, Arc<DocSet>> for FilterRegenerator {
    fn regenerate(
        &self,
        searcher: &Searcher,
        new_cache: &dyn SearchCache<Query, Arc<DocSet>>,
        key: &Query,
        _old_value: &Arc<DocSet>,
    ) -> Result<bool, SearchError> {
        let set = searcher.compute_doc_set(key)?;
        new_cache.put(key.clone(), Arc::new(set));
        Ok(true)
    }
}

/// Re-runs a cached search with the window the old entry covered.
///
/// The search itself fills the new result cache.
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryResultRegenerator;

impl CacheRegenerator<QueryResultKey, Arc<DocList>> for QueryResultRegenerator {
    fn regenerate(
        &self,
        searcher: &Searcher,
        _new_cache: &dyn SearchCache<QueryResultKey, Arc<DocList>>,
        key: &QueryResultKey,
        old_value: &Arc<DocList>,
    ) -> Result<bool, SearchError> {
        let mut cmd = QueryCommand::new(key.query().clone())
            .with_sort(key.sort().clone())
            .with_window(0, old_value.len().max(1));
        cmd.filters = key.filters().to_vec();
        cmd.flags = QueryFlags::from_bits(key.flags());

        searcher.search(&cmd)?;
        Ok(true)
    }
}

/// Rebuilds per-document field values.
#[derive(Debug, Default, Clone, Copy)]
pub struct FieldValueRegenerator;

impl CacheRegenerator<String, Arc<UninvertedField>> for FieldValueRegenerator {
    fn regenerate(
        &self,
        searcher: &Searcher,
        new_cache: &dyn SearchCache<String, Arc<UninvertedField>>,
        key: &String,
        _old_value: &Arc<UninvertedField>,
    ) -> Result<bool, SearchError> {
        let field = searcher.build_field_values(key)?;
        new_cache.put(key.clone(), Arc::new(field));
        Ok(true)
    }
}

/// Carries old values over unchanged. Suitable for values that do not
/// depend on index contents.
#[derive(Debug, Default, Clone, Copy)]
pub struct CopyRegenerator;

impl<K: Clone, V: Clone> CacheRegenerator<K, V> for CopyRegenerator {
    fn regenerate(
        &self,
        _searcher: &Searcher,
        new_cache: &dyn SearchCache<K, V>,
        key: &K,
        old_value: &V,
    ) -> Result<bool, SearchError> {
        new_cache.put(key.clone(), old_value.clone());
        Ok(true)
    }
}
