//! Cache autowarming from the registered searcher into its successor.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use e2e_tests::{add_products, commit_and_wait, TestHarness};
use searchcore_index::Query;
use searchcore_search::cache::CopyRegenerator;
use searchcore_search::{QueryCommand, SearchCache, UserValue};
use searchcore_types::{AutowarmCount, CacheConfig};

#[test]
fn test_filter_cache_warms_most_recent_entries() {
    let harness = TestHarness::with_config(|mut config| {
        config.filter_cache = CacheConfig::new(16).with_autowarm(AutowarmCount::Entries(2));
        config
    });
    let core = harness.open();
    add_products(&core, 0..30);
    commit_and_wait(&core);

    let old = core.searcher().unwrap();
    let filters = [
        Query::term("category", "books"),
        Query::term("category", "music"),
        Query::term("category", "tools"),
        Query::term("year", 2003i64),
    ];
    for filter in &filters {
        old.get_doc_set(filter).unwrap();
    }
    let old_stats = old.caches().filter.as_ref().unwrap().stats();

    add_products(&core, 30..60);
    commit_and_wait(&core);
    let new = core.searcher().unwrap();
    assert_ne!(new.id(), old.id());

    let cache = new.caches().filter.as_ref().unwrap();
    assert_eq!(cache.len(), 2);
    let stats = cache.stats();
    assert_eq!(stats.lookups, 0);
    assert!(stats.cumulative_lookups >= old_stats.cumulative_lookups);
    assert!(stats.cumulative_inserts >= old_stats.cumulative_inserts + 2);

    // Recomputed against the new documents
    let tools = cache.get(&filters[2]).expect("tools filter was warmed");
    assert_eq!(tools.len(), 20);
    assert!(cache.get(&filters[3]).is_some());
    assert!(cache.get(&filters[0]).is_none());
}

#[test]
fn test_result_cache_warms_by_percentage() {
    let harness = TestHarness::with_config(|mut config| {
        config.query_result_cache = CacheConfig::new(16).with_autowarm(AutowarmCount::Percent(50));
        config
    });
    let core = harness.open();
    add_products(&core, 0..12);
    commit_and_wait(&core);

    let old = core.searcher().unwrap();
    let queries = [
        Query::MatchAll,
        Query::term("category", "books"),
        Query::term("category", "music"),
        Query::term("title", "product"),
    ];
    for query in &queries {
        old.search(&QueryCommand::new(query.clone())).unwrap();
    }
    assert_eq!(old.caches().result.as_ref().unwrap().len(), 4);

    add_products(&core, 12..24);
    commit_and_wait(&core);
    let new = core.searcher().unwrap();
    let cache = new.caches().result.as_ref().unwrap();
    assert_eq!(cache.len(), 2);

    // A warmed query is a hit and reflects the new commit
    let before = cache.stats().hits;
    let result = new.search(&QueryCommand::new(queries[3].clone())).unwrap();
    assert_eq!(result.doc_list.matches(), 24);
    assert_eq!(cache.stats().hits, before + 1);
}

#[test]
fn test_document_cache_is_not_warmed() {
    let harness = TestHarness::new();
    let core = harness.open();
    add_products(&core, 0..5);
    commit_and_wait(&core);

    let old = core.searcher().unwrap();
    for doc in 0..5 {
        old.doc(doc).unwrap();
    }
    assert_eq!(old.caches().document.as_ref().unwrap().len(), 5);

    add_products(&core, 5..6);
    commit_and_wait(&core);
    let new = core.searcher().unwrap();
    assert_eq!(new.caches().document.as_ref().unwrap().len(), 0);
}

#[test]
fn test_user_cache_carried_over_by_regenerator() {
    let harness = TestHarness::with_config(|config| {
        config.with_user_cache(
            "lookups",
            CacheConfig::new(8).with_autowarm(AutowarmCount::Entries(8)),
        )
    });
    let core = harness
        .builder()
        .with_user_regenerator("lookups", Arc::new(CopyRegenerator))
        .open()
        .unwrap();

    let old = core.searcher().unwrap();
    let value: UserValue = Arc::new(42u32);
    assert!(old.user_cache_put("lookups", "answer", value).is_none());
    assert!(old.user_cache_put("missing", "answer", Arc::new(1u32)).is_none());

    add_products(&core, 0..3);
    commit_and_wait(&core);
    let new = core.searcher().unwrap();
    assert_ne!(new.id(), old.id());

    let carried = new.user_cache_get("lookups", "answer").expect("entry was warmed");
    assert_eq!(carried.downcast_ref::<u32>(), Some(&42));
}

#[test]
fn test_warming_queries_populate_new_searcher() {
    let harness = TestHarness::new();
    let warm_query = QueryCommand::new(Query::term("category", "music"));
    let core = harness
        .builder()
        .with_warming_queries(vec![warm_query.clone()])
        .open()
        .unwrap();

    add_products(&core, 0..9);
    commit_and_wait(&core);

    let searcher = core.searcher().unwrap();
    let cache = searcher.caches().result.as_ref().unwrap();
    assert!(cache.len() >= 1);
    let before = cache.stats().hits;
    let result = searcher.search(&warm_query).unwrap();
    assert_eq!(result.doc_list.matches(), 3);
    assert_eq!(cache.stats().hits, before + 1);
}
