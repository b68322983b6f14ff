//! Searcher publication through a whole core.
//!
//! Covers the warming limit, the cold first searcher, atomic registration
//! under concurrent commits, and release of every resource on close.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use e2e_tests::{add_products, commit_and_wait, Gate, TestHarness};
use searchcore_index::DirectoryFactory;
use searchcore_search::{CommitOptions, SearchError};

fn commit_no_wait() -> CommitOptions {
    CommitOptions {
        wait_searcher: false,
        ..CommitOptions::default()
    }
}

#[test]
fn test_warming_limit_rejects_with_retryable_error() {
    let harness = TestHarness::with_config(|config| config.with_max_warming_searchers(1));
    let gate = Gate::new();
    let core = harness
        .builder()
        .with_new_searcher_listener(gate.listener.clone())
        .open()
        .unwrap();

    add_products(&core, 0..5);
    core.commit(commit_no_wait()).unwrap();
    gate.wait_entered();
    assert_eq!(core.controller().on_deck_count(), 1);

    add_products(&core, 5..10);
    let err = core.commit(commit_no_wait()).unwrap_err();
    assert!(matches!(err, SearchError::ServiceUnavailable(_)), "got {err:?}");
    assert!(err.is_retryable());
    assert!(err.to_string().contains("max_warming_searchers=1"));

    // The rejected commit is still durable; the next searcher sees it
    gate.open();
    let waiter = loop {
        match core.controller().reopen() {
            Ok(waiter) => break waiter,
            Err(e) if e.is_retryable() => thread::sleep(Duration::from_millis(10)),
            Err(e) => panic!("unexpected error: {e}"),
        }
    };
    gate.wait_entered();
    gate.open();
    waiter.wait_blocking().unwrap();

    assert_eq!(core.searcher().unwrap().num_docs(), 10);
    assert!(core.stats().searchers.rejections >= 1);
}

#[test]
fn test_cold_first_searcher_serves_before_listeners_finish() {
    let harness = TestHarness::with_config(|config| config.with_cold_searcher(true));
    add_products_offline(&harness, 12);

    let gate = Gate::new();
    let core = harness
        .builder()
        .with_first_searcher_listener(gate.listener.clone())
        .open()
        .unwrap();

    // Registered already, while the first-searcher listener is still held
    gate.wait_entered();
    let searcher = core.searcher().unwrap();
    assert_eq!(searcher.num_docs(), 12);
    assert!(searcher.registered_at().is_some());
    // Registration already took it off deck; only the listener is pending
    assert_eq!(core.controller().on_deck_count(), 0);

    gate.open();
    drop(searcher);
    core.close();
}

/// Write a committed index with `count` products, then close it.
fn add_products_offline(harness: &TestHarness, count: u32) {
    let core = harness.open();
    add_products(&core, 0..count);
    commit_and_wait(&core);
    core.close();
}

#[test]
fn test_concurrent_commits_publish_in_order() {
    let harness = TestHarness::with_config(|config| config.with_max_warming_searchers(2));
    let core = Arc::new(harness.open());
    let done = Arc::new(AtomicBool::new(false));

    let observer = {
        let core = Arc::clone(&core);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut last = 0;
            let mut observed = 0;
            while !done.load(Ordering::Acquire) {
                let searcher = core.searcher().unwrap();
                let generation = searcher.generation();
                assert!(generation >= last, "generation went back from {last} to {generation}");
                last = generation;
                observed += 1;
            }
            observed
        })
    };

    let writers: Vec<_> = (0..4u32)
        .map(|t| {
            let core = Arc::clone(&core);
            thread::spawn(move || {
                for round in 0..5u32 {
                    let start = t * 100 + round * 10;
                    add_products(&core, start..start + 10);
                    match core.commit(CommitOptions::default()) {
                        Ok(outcome) => {
                            if let Some(waiter) = outcome.waiter {
                                waiter.wait_blocking().unwrap();
                            }
                        }
                        Err(e) if e.is_retryable() => {
                            // Committed, but no room to warm; retry the reopen only
                            let waiter = loop {
                                match core.controller().reopen() {
                                    Ok(waiter) => break waiter,
                                    Err(e) if e.is_retryable() => thread::sleep(Duration::from_millis(5)),
                                    Err(e) => panic!("unexpected error: {e}"),
                                }
                            };
                            waiter.wait_blocking().unwrap();
                        }
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }
    done.store(true, Ordering::Release);
    assert!(observer.join().unwrap() > 0);

    let stats = core.stats();
    assert_eq!(stats.searchers.on_deck, 0);
    assert!(stats.searchers.on_deck_high_water <= 2);
    assert_eq!(core.searcher().unwrap().num_docs(), 200);
    // Only the registered searcher stays open once nothing holds older ones
    assert_eq!(core.controller().open_searcher_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_waiter_completes_on_registration() {
    let harness = TestHarness::new();
    let core = harness.open();
    let before = core.searcher().unwrap().id();

    add_products(&core, 0..3);
    let outcome = core.commit(CommitOptions::default()).unwrap();
    outcome.waiter.unwrap().wait().await.unwrap();

    let after = core.searcher().unwrap();
    assert_ne!(after.id(), before);
    assert_eq!(after.num_docs(), 3);
}

#[test]
fn test_close_releases_every_directory_reference() {
    let harness = TestHarness::new();
    let factory = Arc::new(DirectoryFactory::mmap());
    let core = harness
        .builder()
        .with_directory_factory(Arc::clone(&factory))
        .open()
        .unwrap();

    add_products(&core, 0..8);
    commit_and_wait(&core);
    let held = core.searcher().unwrap();
    assert!(factory.open_count(&harness.index_path) >= 3);

    core.close();
    // Still referenced, so closed by force
    assert!(held.is_closed());
    assert_eq!(held.num_docs(), 8);
    drop(held);
    assert_eq!(factory.open_count(&harness.index_path), 0);
    assert!(matches!(core.searcher(), Err(SearchError::ControllerClosed)));
}
