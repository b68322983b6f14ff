//! Commit retention.
//!
//! `RetentionPolicy` decides which commit points to delete after each commit.
//! `ReservingDeletionPolicy` wraps any policy, owns the list of live commit
//! points and refuses deletions of commits that are pinned (saved) or
//! reserved for a while (e.g. during replication).
//!
//! Precedence when deciding a commit's fate:
//! 1. pinned or unexpired reservation: always kept
//! 2. older than the maximum age: deleted
//! 3. within the optimized-commit allowance: kept
//! 4. within the total commit count: kept
//! 5. otherwise deleted

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use searchcore_types::DeletionPolicyConfig;
use tracing::{debug, info, warn};

use crate::commit::{CommitInfo, CommitPoint};

/// What a deletion policy sees of a commit.
pub trait IndexCommit {
    fn generation(&self) -> u64;
    fn segment_count(&self) -> usize;
    fn timestamp(&self) -> DateTime<Utc>;
    fn is_deleted(&self) -> bool;
    /// Request deletion. The request may be refused.
    fn delete(&self);
}

/// Decides which commits to delete. Commits arrive oldest first.
pub trait IndexDeletionPolicy: Send + Sync {
    fn on_init(&self, commits: &[&dyn IndexCommit]);
    fn on_commit(&self, commits: &[&dyn IndexCommit]);
}

impl IndexCommit for CommitPoint {
    fn generation(&self) -> u64 {
        CommitPoint::generation(self)
    }

    fn segment_count(&self) -> usize {
        CommitPoint::segment_count(self)
    }

    fn timestamp(&self) -> DateTime<Utc> {
        CommitPoint::timestamp(self)
    }

    fn is_deleted(&self) -> bool {
        CommitPoint::is_deleted(self)
    }

    fn delete(&self) {
        CommitPoint::delete(self)
    }
}

/// Count, shape and age based retention.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    max_commits_to_keep: usize,
    max_optimized_commits_to_keep: usize,
    max_commit_age: Option<chrono::Duration>,
}

impl RetentionPolicy {
    pub fn new(config: &DeletionPolicyConfig) -> Self {
        Self {
            max_commits_to_keep: config.max_commits_to_keep,
            max_optimized_commits_to_keep: config.max_optimized_commits_to_keep,
            max_commit_age: config
                .max_commit_age_secs
                .and_then(|secs| chrono::Duration::try_seconds(i64::try_from(secs).ok()?)),
        }
    }

    fn apply(&self, commits: &[&dyn IndexCommit]) {
        // The newest commit is always kept.
        let Some((newest, older)) = commits.split_last() else {
            return;
        };

        let cutoff = self.max_commit_age.map(|age| Utc::now() - age);
        let mut total_kept = 1;
        let mut optimized_kept = usize::from(newest.segment_count() == 1);

        for commit in older.iter().rev() {
            if cutoff.is_some_and(|cutoff| commit.timestamp() < cutoff) {
                commit.delete();
                continue;
            }
            if optimized_kept < self.max_optimized_commits_to_keep && commit.segment_count() == 1 {
                optimized_kept += 1;
                total_kept += 1;
                continue;
            }
            if total_kept < self.max_commits_to_keep {
                total_kept += 1;
                continue;
            }
            commit.delete();
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(&DeletionPolicyConfig::default())
    }
}

impl IndexDeletionPolicy for RetentionPolicy {
    fn on_init(&self, commits: &[&dyn IndexCommit]) {
        self.apply(commits);
    }

    fn on_commit(&self, commits: &[&dyn IndexCommit]) {
        self.apply(commits);
    }
}

/// Retention wrapper honoring pins and timed reservations.
pub struct ReservingDeletionPolicy {
    inner: Box<dyn IndexDeletionPolicy>,
    commits: Mutex<Vec<CommitPoint>>,
    reserves: DashMap<u64, Instant>,
    saved: DashMap<u64, usize>,
}

/// A commit as presented to the wrapped policy.
struct GuardedCommit<'a> {
    commit: &'a CommitPoint,
    policy: &'a ReservingDeletionPolicy,
}

impl IndexCommit for GuardedCommit<'_> {
    fn generation(&self) -> u64 {
        self.commit.generation()
    }

    fn segment_count(&self) -> usize {
        self.commit.segment_count()
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.commit.timestamp()
    }

    fn is_deleted(&self) -> bool {
        self.commit.is_deleted()
    }

    fn delete(&self) {
        let generation = self.commit.generation();
        if self.policy.is_protected(generation) {
            debug!(generation, "Keeping protected commit point");
            return;
        }
        self.commit.delete();
    }
}

impl ReservingDeletionPolicy {
    pub fn new(inner: impl IndexDeletionPolicy + 'static) -> Self {
        Self {
            inner: Box::new(inner),
            commits: Mutex::new(Vec::new()),
            reserves: DashMap::new(),
            saved: DashMap::new(),
        }
    }

    /// Policy configured from settings.
    pub fn from_config(config: &DeletionPolicyConfig) -> Self {
        Self::new(RetentionPolicy::new(config))
    }

    /// Record the commit found when a writer opens.
    pub fn on_init(&self, current: CommitPoint) {
        self.record(current, true);
    }

    /// Record a new commit and apply retention.
    pub fn on_commit(&self, commit: CommitPoint) {
        self.record(commit, false);
    }

    fn record(&self, commit: CommitPoint, init: bool) {
        self.clean_reserves();

        let mut commits = match self.commits.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(existing) = commits
            .iter()
            .position(|c| c.generation() == commit.generation())
        {
            // Same generation seen again (a reopened writer): keep the fresh state.
            commits[existing] = commit;
        } else {
            commits.push(commit);
            commits.sort_by_key(CommitPoint::generation);
        }

        let guarded: Vec<GuardedCommit<'_>> = commits
            .iter()
            .map(|commit| GuardedCommit {
                commit,
                policy: self,
            })
            .collect();
        let views: Vec<&dyn IndexCommit> = guarded.iter().map(|g| g as &dyn IndexCommit).collect();

        if init {
            self.inner.on_init(&views);
        } else {
            self.inner.on_commit(&views);
        }
        drop(views);
        drop(guarded);

        let before = commits.len();
        commits.retain(|c| !c.is_deleted());
        let deleted = before - commits.len();
        if deleted > 0 {
            info!(deleted, retained = commits.len(), "Pruned commit points");
        }
    }

    /// Reserve a commit for at least `duration` from now.
    ///
    /// An existing longer reservation is never shortened.
    pub fn set_reserve_duration(&self, generation: u64, duration: Duration) {
        let expires = Instant::now() + duration;
        self.reserves
            .entry(generation)
            .and_modify(|current| {
                if expires > *current {
                    *current = expires;
                }
            })
            .or_insert(expires);
        debug!(generation, ?duration, "Reserved commit point");
    }

    /// Pin a commit until a matching release.
    pub fn save_commit_point(&self, generation: u64) {
        *self.saved.entry(generation).or_insert(0) += 1;
        debug!(generation, "Saved commit point");
    }

    /// Undo one `save_commit_point`. Returns false if the commit was not pinned.
    pub fn release_commit_point(&self, generation: u64) -> bool {
        let remove = match self.saved.get_mut(&generation) {
            Some(mut count) => {
                *count -= 1;
                *count == 0
            }
            None => {
                warn!(generation, "Release of a commit point that is not saved");
                return false;
            }
        };
        if remove {
            self.saved.remove_if(&generation, |_, count| *count == 0);
        }
        true
    }

    /// True while pinned or reserved.
    pub fn is_protected(&self, generation: u64) -> bool {
        if self.saved.contains_key(&generation) {
            return true;
        }
        self.reserves
            .get(&generation)
            .is_some_and(|expires| *expires > Instant::now())
    }

    fn clean_reserves(&self) {
        let now = Instant::now();
        self.reserves.retain(|_, expires| *expires > now);
    }

    /// Newest retained commit.
    pub fn latest_commit(&self) -> Option<CommitPoint> {
        self.lock_commits().last().cloned()
    }

    /// Retained commit with the given generation.
    pub fn commit(&self, generation: u64) -> Option<CommitPoint> {
        self.lock_commits()
            .iter()
            .find(|c| c.generation() == generation)
            .cloned()
    }

    /// All retained commits, oldest first.
    pub fn commits(&self) -> Vec<CommitInfo> {
        self.lock_commits().iter().map(CommitPoint::info).collect()
    }

    fn lock_commits(&self) -> std::sync::MutexGuard<'_, Vec<CommitPoint>> {
        match self.commits.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
