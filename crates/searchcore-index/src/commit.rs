//! Commit points.
//!
//! A commit point describes one durable state of the index. While a commit
//! point is retained it holds a Tantivy searcher over that state, which keeps
//! the state's segment files from being garbage collected. Deleting the
//! commit point drops that searcher.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

/// One durable index state, identified by its generation.
#[derive(Clone)]
pub struct CommitPoint {
    inner: Arc<CommitInner>,
}

struct CommitInner {
    generation: u64,
    segment_count: usize,
    num_docs: u64,
    timestamp: DateTime<Utc>,
    snapshot: Mutex<Option<tantivy::Searcher>>,
    deleted: AtomicBool,
}

/// Serializable summary of a commit point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitInfo {
    pub generation: u64,
    pub segment_count: usize,
    pub num_docs: u64,
    pub timestamp: DateTime<Utc>,
}

impl CommitPoint {
    /// A commit point pinned by a searcher over its state.
    pub fn from_snapshot(
        generation: u64,
        snapshot: tantivy::Searcher,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let segment_count = snapshot.segment_readers().len();
        let num_docs = snapshot.num_docs();
        Self {
            inner: Arc::new(CommitInner {
                generation,
                segment_count,
                num_docs,
                timestamp,
                snapshot: Mutex::new(Some(snapshot)),
                deleted: AtomicBool::new(false),
            }),
        }
    }

    /// A commit point with no backing state, e.g. restored bookkeeping.
    pub fn detached(generation: u64, segment_count: usize, timestamp: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(CommitInner {
                generation,
                segment_count,
                num_docs: 0,
                timestamp,
                snapshot: Mutex::new(None),
                deleted: AtomicBool::new(false),
            }),
        }
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    pub fn segment_count(&self) -> usize {
        self.inner.segment_count
    }

    pub fn num_docs(&self) -> u64 {
        self.inner.num_docs
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.inner.timestamp
    }

    /// A single-segment commit.
    pub fn is_optimized(&self) -> bool {
        self.inner.segment_count == 1
    }

    pub fn is_deleted(&self) -> bool {
        self.inner.deleted.load(Ordering::Acquire)
    }

    /// Mark deleted and let go of the state's files.
    pub fn delete(&self) {
        if self.inner.deleted.swap(true, Ordering::AcqRel) {
            return;
        }
        let snapshot = match self.inner.snapshot.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(snapshot);
        debug!(generation = self.inner.generation, "Deleted commit point");
    }

    /// Point-in-time searcher over this commit, while it is retained.
    pub fn snapshot(&self) -> Option<tantivy::Searcher> {
        match self.inner.snapshot.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn info(&self) -> CommitInfo {
        CommitInfo {
            generation: self.generation(),
            segment_count: self.segment_count(),
            num_docs: self.num_docs(),
            timestamp: self.timestamp(),
        }
    }
}

impl fmt::Debug for CommitPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitPoint")
            .field("generation", &self.generation())
            .field("segment_count", &self.segment_count())
            .field("timestamp", &self.timestamp())
            .field("deleted", &self.is_deleted())
            .finish()
    }
}
