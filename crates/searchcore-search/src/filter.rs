//! Filter queries.
//!
//! A filter restricts results without affecting scores. How it is applied
//! depends on two knobs:
//! - cached filters are resolved to document sets through the filter cache
//!   and intersected
//! - uncached filters with cost below `POST_FILTER_COST` join the main query
//!   as constant-score required clauses
//! - uncached filters at or above `POST_FILTER_COST` are checked per hit,
//!   cheapest first

use std::sync::Arc;

use searchcore_index::Query;
use serde::{Deserialize, Serialize};

use crate::docset::DocSet;

/// Uncached filters at or above this cost are evaluated per candidate hit.
pub const POST_FILTER_COST: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Filter {
    pub query: Query,
    #[serde(default = "default_cache")]
    pub cache: bool,
    #[serde(default)]
    pub cost: u32,
}

fn default_cache() -> bool {
    true
}

impl Filter {
    /// A filter resolved through the filter cache.
    pub fn cached(query: Query) -> Self {
        Self {
            query,
            cache: true,
            cost: 0,
        }
    }

    /// A filter that bypasses the filter cache.
    pub fn uncached(query: Query, cost: u32) -> Self {
        Self {
            query,
            cache: false,
            cost,
        }
    }

    pub fn is_post_filter(&self) -> bool {
        !self.cache && self.cost >= POST_FILTER_COST
    }
}

/// Filters sorted by how they will be applied.
#[derive(Debug, Default)]
pub(crate) struct ProcessedFilters {
    /// Intersection of all cached filters and any ad-hoc set
    pub answer: Option<Arc<DocSet>>,
    /// Added to the main query as constant-score clauses
    pub prefilters: Vec<Query>,
    /// Checked per hit, ascending cost
    pub post_filters: Vec<Filter>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_classification() {
        let q = Query::term("category", "a");
        assert!(!Filter::cached(q.clone()).is_post_filter());
        assert!(!Filter::uncached(q.clone(), 99).is_post_filter());
        assert!(Filter::uncached(q, POST_FILTER_COST).is_post_filter());
    }
}
