//! Query commands, results and result-cache keys.

use std::sync::Arc;
use std::time::Duration;

use searchcore_index::Query;

use crate::doclist::DocList;
use crate::docset::DocSet;
use crate::filter::Filter;
use crate::sort::SortSpec;

/// Request flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryFlags(u32);

impl QueryFlags {
    /// Return scores with the document list
    pub const GET_SCORES: u32 = 0x01;
    /// Also return the full set of matching documents
    pub const GET_DOCSET: u32 = 0x02;
    /// Do not consult or fill the result cache
    pub const NO_CACHE: u32 = 0x04;

    /// Flags that change the cached value and therefore belong in the key.
    const KEY_MASK: u32 = Self::GET_SCORES;

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    pub fn with(self, flag: u32) -> Self {
        Self(self.0 | flag)
    }

    pub fn needs_scores(&self) -> bool {
        self.contains(Self::GET_SCORES)
    }

    pub fn needs_doc_set(&self) -> bool {
        self.contains(Self::GET_DOCSET)
    }

    pub fn key_bits(&self) -> u32 {
        self.0 & Self::KEY_MASK
    }
}

/// A search request.
#[derive(Debug, Clone)]
pub struct QueryCommand {
    pub query: Query,
    pub filters: Vec<Filter>,
    /// Ad-hoc restriction; commands carrying one are never result-cached
    pub filter_set: Option<Arc<DocSet>>,
    pub sort: SortSpec,
    pub offset: usize,
    pub len: usize,
    pub flags: QueryFlags,
    /// Budget after which collection stops and the result is marked partial
    pub time_allowed: Option<Duration>,
}

impl QueryCommand {
    /// Top 10 by relevance.
    pub fn new(query: Query) -> Self {
        Self {
            query,
            filters: Vec::new(),
            filter_set: None,
            sort: SortSpec::relevance(),
            offset: 0,
            len: 10,
            flags: QueryFlags::default(),
            time_allowed: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_filter_set(mut self, set: Arc<DocSet>) -> Self {
        self.filter_set = Some(set);
        self
    }

    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_window(mut self, offset: usize, len: usize) -> Self {
        self.offset = offset;
        self.len = len;
        self
    }

    pub fn with_scores(mut self) -> Self {
        self.flags = self.flags.with(QueryFlags::GET_SCORES);
        self
    }

    pub fn with_doc_set(mut self) -> Self {
        self.flags = self.flags.with(QueryFlags::GET_DOCSET);
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.flags = self.flags.with(QueryFlags::NO_CACHE);
        self
    }

    pub fn with_time_allowed(mut self, budget: Duration) -> Self {
        self.time_allowed = Some(budget);
        self
    }

    /// True if this command may use the result cache.
    pub fn is_cacheable(&self) -> bool {
        self.filter_set.is_none() && !self.flags.contains(QueryFlags::NO_CACHE)
    }

    /// Scores must be computed, for returning or for ordering.
    pub fn needs_scoring(&self) -> bool {
        self.flags.needs_scores() || self.sort.needs_scores()
    }
}

/// Outcome of a search.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub doc_list: DocList,
    pub doc_set: Option<Arc<DocSet>>,
    /// Collection stopped early; the result may be incomplete
    pub partial: bool,
}

/// Result cache key. Filter order does not matter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryResultKey {
    query: Query,
    filters: Vec<Filter>,
    sort: SortSpec,
    flags: u32,
}

impl QueryResultKey {
    pub fn new(query: Query, filters: &[Filter], sort: SortSpec, flags: u32) -> Self {
        let mut filters = filters.to_vec();
        filters.sort();
        filters.dedup();
        Self {
            query,
            filters,
            sort,
            flags,
        }
    }

    pub fn for_command(cmd: &QueryCommand) -> Self {
        Self::new(
            cmd.query.clone(),
            &cmd.filters,
            cmd.sort.clone(),
            cmd.flags.key_bits(),
        )
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn sort(&self) -> &SortSpec {
        &self.sort
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of(key: &QueryResultKey) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_key_ignores_filter_order() {
        let a = Filter::cached(Query::term("category", "a"));
        let b = Filter::cached(Query::term("year", 2020i64));
        let q = Query::term("title", "rust");

        let k1 = QueryResultKey::new(q.clone(), &[a.clone(), b.clone()], SortSpec::relevance(), 0);
        let k2 = QueryResultKey::new(q, &[b, a], SortSpec::relevance(), 0);
        assert_eq!(k1, k2);
        assert_eq!(hash_of(&k1), hash_of(&k2));
    }

    #[test]
    fn test_key_distinguishes_sort_and_flags() {
        let q = Query::term("title", "rust");
        let by_score = QueryResultKey::new(q.clone(), &[], SortSpec::relevance(), 0);
        let by_price = QueryResultKey::new(q.clone(), &[], SortSpec::by_field("price", true), 0);
        let scored = QueryResultKey::new(q, &[], SortSpec::relevance(), QueryFlags::GET_SCORES);
        assert_ne!(by_score, by_price);
        assert_ne!(by_score, scored);
    }

    #[test]
    fn test_cacheability() {
        let cmd = QueryCommand::new(Query::MatchAll);
        assert!(cmd.is_cacheable());
        assert!(!cmd.clone().no_cache().is_cacheable());
        assert!(!cmd
            .with_filter_set(Arc::new(DocSet::empty(4)))
            .is_cacheable());
    }

    #[test]
    fn test_key_bits_exclude_doc_set_and_no_cache() {
        let flags = QueryFlags::default()
            .with(QueryFlags::GET_DOCSET)
            .with(QueryFlags::NO_CACHE);
        assert_eq!(flags.key_bits(), 0);
        assert_eq!(
            flags.with(QueryFlags::GET_SCORES).key_bits(),
            QueryFlags::GET_SCORES
        );
    }
}
