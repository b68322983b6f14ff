//! Commit point retention through a whole core.

use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;

use e2e_tests::{add_products, commit_and_wait, TestHarness};
use searchcore_types::DeletionPolicyConfig;

fn retention(max_commits: usize, max_optimized: usize) -> DeletionPolicyConfig {
    DeletionPolicyConfig {
        max_commits_to_keep: max_commits,
        max_optimized_commits_to_keep: max_optimized,
        max_commit_age_secs: None,
    }
}

fn generations(core: &searchcore_search::SearchCore) -> Vec<u64> {
    core.commits().iter().map(|c| c.generation).collect()
}

#[test]
fn test_keeps_newest_commits_by_count() {
    let harness = TestHarness::with_config(|config| config.with_deletion_policy(retention(2, 0)));
    let core = harness.open();

    let mut made = Vec::new();
    for round in 0..4u32 {
        add_products(&core, round * 10..round * 10 + 10);
        made.push(commit_and_wait(&core).generation);
    }

    assert_eq!(generations(&core), made[2..].to_vec());
    assert_eq!(core.latest_commit().unwrap().num_docs, 40);
}

#[test]
fn test_optimized_commit_survives_beyond_count() {
    let harness = TestHarness::with_config(|config| config.with_deletion_policy(retention(1, 1)));
    let core = harness.open();

    add_products(&core, 0..10);
    let single = commit_and_wait(&core);
    assert_eq!(single.segment_count, 1);

    add_products(&core, 10..20);
    commit_and_wait(&core);
    add_products(&core, 20..30);
    let newest = commit_and_wait(&core);
    assert!(newest.segment_count > 1);
    assert_eq!(generations(&core), vec![single.generation, newest.generation]);

    // The newest commit is single-segment now and uses up the allowance
    let optimized = core.optimize().unwrap();
    optimized.waiter.unwrap().wait_blocking().unwrap();
    assert_eq!(optimized.commit.segment_count, 1);
    assert_eq!(generations(&core), vec![optimized.commit.generation]);
    assert_eq!(core.searcher().unwrap().num_docs(), 30);
}

#[test]
fn test_reservation_protects_until_expiry() {
    let harness = TestHarness::with_config(|config| config.with_deletion_policy(retention(1, 0)));
    let core = harness.open();

    add_products(&core, 0..5);
    let reserved = commit_and_wait(&core).generation;
    core.reserve_commit(reserved, Duration::from_millis(300));

    add_products(&core, 5..10);
    let second = commit_and_wait(&core).generation;
    assert_eq!(generations(&core), vec![reserved, second]);
    assert!(core.deletion_policy().is_protected(reserved));

    thread::sleep(Duration::from_millis(400));
    assert!(!core.deletion_policy().is_protected(reserved));

    add_products(&core, 10..15);
    let third = commit_and_wait(&core).generation;
    assert_eq!(generations(&core), vec![third]);
}

#[test]
fn test_saved_commit_stays_readable_until_released() {
    let harness = TestHarness::with_config(|config| config.with_deletion_policy(retention(1, 0)));
    let core = harness.open();

    add_products(&core, 0..5);
    let saved = commit_and_wait(&core).generation;
    core.save_commit(saved);

    core.delete_by_id("p-0").unwrap();
    add_products(&core, 5..20);
    commit_and_wait(&core);
    add_products(&core, 20..25);
    let newest = commit_and_wait(&core).generation;
    assert_eq!(generations(&core), vec![saved, newest]);

    let snapshot = core
        .deletion_policy()
        .commit(saved)
        .and_then(|commit| commit.snapshot())
        .expect("saved commit has a snapshot");
    assert_eq!(snapshot.num_docs(), 5);
    assert_eq!(core.searcher().unwrap().num_docs(), 24);

    assert!(core.release_commit(saved));
    assert!(!core.release_commit(saved));
    // Still listed until the next commit applies retention
    assert_eq!(generations(&core).len(), 2);

    add_products(&core, 25..26);
    let last = commit_and_wait(&core).generation;
    assert_eq!(generations(&core), vec![last]);
    assert!(core.deletion_policy().commit(saved).is_none());
    // The snapshot taken earlier keeps its own view
    assert_eq!(snapshot.num_docs(), 5);
}
