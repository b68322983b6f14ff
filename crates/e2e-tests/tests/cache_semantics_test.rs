//! Cache behavior of a registered searcher.
//!
//! Covers filter-cache sharing between a query and its negation, result
//! windows served from a cached superset, and results that must never be
//! cached.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use e2e_tests::{add_products, commit_and_wait, ids_of, TestHarness};
use searchcore_index::Query;
use searchcore_search::{CommitOptions, DocSet, Filter, QueryCommand, SearchCache, SortSpec};

#[test]
fn test_negated_filter_shares_cache_entry() {
    let harness = TestHarness::new();
    let core = harness.open();
    add_products(&core, 0..30);
    commit_and_wait(&core);

    let searcher = core.searcher().unwrap();
    let filter_cache = searcher.caches().filter.as_ref().unwrap();
    let books = Query::term("category", "books");

    let positive = searcher.get_doc_set(&books).unwrap();
    let negative = searcher.get_doc_set(&books.clone().negate()).unwrap();

    // One entry, keyed by the positive form
    assert_eq!(filter_cache.len(), 1);
    assert!(filter_cache.get(&books).is_some());
    assert_eq!(filter_cache.stats().inserts, 1);

    assert_eq!(positive.len(), 10);
    assert_eq!(negative.len(), 20);
    assert_eq!(positive.intersection_size(&negative), 0);
    assert_eq!(positive.union(&negative).len() as u64, searcher.num_docs());
}

#[test]
fn test_result_window_served_from_superset() {
    let harness = TestHarness::new();
    let core = harness.open();
    add_products(&core, 0..50);
    commit_and_wait(&core);

    let searcher = core.searcher().unwrap();
    let result_cache = searcher.caches().result.as_ref().unwrap();
    let by_price = QueryCommand::new(Query::MatchAll).with_sort(SortSpec::by_field("price", false));

    let first_page = searcher.search(&by_price.clone().with_window(0, 5)).unwrap();
    assert_eq!(ids_of(&searcher, first_page.doc_list.docs()), ["p-0", "p-1", "p-2", "p-3", "p-4"]);
    assert_eq!(result_cache.stats().inserts, 1);

    // Inside the cached superset of window size 20
    let second_page = searcher.search(&by_price.clone().with_window(5, 5)).unwrap();
    assert_eq!(ids_of(&searcher, second_page.doc_list.docs()), ["p-5", "p-6", "p-7", "p-8", "p-9"]);
    assert_eq!(second_page.doc_list.offset(), 5);
    assert_eq!(second_page.doc_list.matches(), 50);
    let stats = result_cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.inserts, 1);

    // Past the superset: collected again up to the next window boundary
    let straddling = searcher.search(&by_price.clone().with_window(18, 5)).unwrap();
    assert_eq!(
        ids_of(&searcher, straddling.doc_list.docs()),
        ["p-18", "p-19", "p-20", "p-21", "p-22"]
    );
    assert_eq!(result_cache.stats().inserts, 2);
    assert_eq!(result_cache.len(), 1);

    let deeper = searcher.search(&by_price.with_window(30, 5)).unwrap();
    assert_eq!(ids_of(&searcher, deeper.doc_list.docs()), ["p-30", "p-31", "p-32", "p-33", "p-34"]);
    assert_eq!(result_cache.stats().hits, 2);
}

#[test]
fn test_windows_are_consistent_with_full_ranking() {
    let harness = TestHarness::new();
    let core = harness.open();
    add_products(&core, 0..45);
    commit_and_wait(&core);

    let searcher = core.searcher().unwrap();
    let cmd = QueryCommand::new(Query::MatchAll)
        .with_filter(Filter::cached(Query::term("category", "music")))
        .with_sort(SortSpec::by_field("price", true));

    let full = searcher.search(&cmd.clone().no_cache().with_window(0, 100)).unwrap();
    let full_ids = ids_of(&searcher, full.doc_list.docs());
    assert_eq!(full_ids.len(), 15);

    for (offset, len) in [(0, 3), (3, 4), (10, 10), (14, 1), (15, 5)] {
        let window = searcher.search(&cmd.clone().with_window(offset, len)).unwrap();
        let end = (offset + len).min(full_ids.len());
        let start = offset.min(end);
        assert_eq!(ids_of(&searcher, window.doc_list.docs()), full_ids[start..end].to_vec());
        assert_eq!(window.doc_list.matches(), 15);
    }
}

#[test]
fn test_filter_order_does_not_split_cache_entries() {
    let harness = TestHarness::new();
    let core = harness.open();
    add_products(&core, 0..30);
    commit_and_wait(&core);

    let searcher = core.searcher().unwrap();
    let cheap = Filter::cached(Query::range(
        "price",
        searchcore_index::RangeBound::Unbounded,
        searchcore_index::RangeBound::Excluded(10u64.into()),
    ));
    let tools = Filter::cached(Query::term("category", "tools"));

    let a = searcher
        .search(
            &QueryCommand::new(Query::MatchAll)
                .with_filter(cheap.clone())
                .with_filter(tools.clone()),
        )
        .unwrap();
    let b = searcher
        .search(&QueryCommand::new(Query::MatchAll).with_filter(tools).with_filter(cheap))
        .unwrap();

    assert_eq!(a.doc_list.docs(), b.doc_list.docs());
    let stats = searcher.caches().result.as_ref().unwrap().stats();
    assert_eq!(stats.inserts, 1);
    assert_eq!(stats.hits, 1);
}

#[test]
fn test_partial_results_are_not_cached() {
    let harness = TestHarness::new();
    let core = harness.open();
    add_products(&core, 0..30);
    commit_and_wait(&core);

    let searcher = core.searcher().unwrap();
    let result_cache = searcher.caches().result.as_ref().unwrap();
    let cmd = QueryCommand::new(Query::term("title", "product"));

    let rushed = searcher
        .search(&cmd.clone().with_time_allowed(Duration::ZERO))
        .unwrap();
    assert!(rushed.partial);
    assert_eq!(result_cache.len(), 0);

    let complete = searcher.search(&cmd).unwrap();
    assert!(!complete.partial);
    assert_eq!(complete.doc_list.matches(), 30);
    assert_eq!(result_cache.len(), 1);
}

#[test]
fn test_ad_hoc_doc_set_bypasses_result_cache() {
    let harness = TestHarness::new();
    let core = harness.open();
    add_products(&core, 0..12);
    commit_and_wait(&core);

    let searcher = core.searcher().unwrap();
    let first_three = Arc::new(DocSet::from_docs(searcher.max_doc(), 0..3));
    let result = searcher
        .search(&QueryCommand::new(Query::MatchAll).with_filter_set(first_three))
        .unwrap();

    assert_eq!(result.doc_list.matches(), 3);
    assert_eq!(searcher.caches().result.as_ref().unwrap().len(), 0);
}

#[test]
fn test_realtime_only_searcher_never_caches() {
    let harness = TestHarness::new();
    let core = harness.open();
    add_products(&core, 0..6);
    core.commit(CommitOptions {
        open_searcher: false,
        ..CommitOptions::default()
    })
    .unwrap();

    let realtime = core.realtime_searcher().unwrap();
    assert!(realtime.is_realtime());
    assert!(!realtime.caching_enabled());
    let result = realtime
        .search(&QueryCommand::new(Query::term("category", "books")))
        .unwrap();
    assert_eq!(result.doc_list.matches(), 2);

    // The registered searcher still serves the previous commit
    assert_eq!(core.searcher().unwrap().num_docs(), 0);
}
