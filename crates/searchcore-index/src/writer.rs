//! Index writer that records commit points.
//!
//! Wraps a Tantivy `IndexWriter`. Every commit produces a `CommitPoint`
//! that is handed to the deletion policy. Documents are not visible to
//! searchers until committed and a new searcher is opened.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tantivy::indexer::NoMergePolicy;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyError, Term};
use tracing::{debug, info};

use crate::commit::CommitPoint;
use crate::deletion_policy::ReservingDeletionPolicy;
use crate::error::IndexError;
use crate::query::Query;
use crate::schema::{IndexDocument, IndexSchema};

/// Writer statistics.
#[derive(Debug, Clone, Serialize)]
pub struct WriterStats {
    pub opened_at: DateTime<Utc>,
    pub last_commit: Option<DateTime<Utc>>,
    pub commits: u64,
    pub pending_ops: u64,
    pub closed: bool,
}

/// A writer over one index.
pub struct CoreIndexWriter {
    writer: Mutex<Option<IndexWriter>>,
    index: Index,
    reader: IndexReader,
    schema: Arc<IndexSchema>,
    policy: Arc<ReservingDeletionPolicy>,
    opened_at: DateTime<Utc>,
    last_commit: Mutex<Option<DateTime<Utc>>>,
    commits: AtomicU64,
    pending_ops: AtomicU64,
}

impl CoreIndexWriter {
    /// Open a writer and report the current commit to the policy.
    pub fn open(
        index: &Index,
        schema: Arc<IndexSchema>,
        memory_mb: usize,
        threads: usize,
        policy: Arc<ReservingDeletionPolicy>,
    ) -> Result<Self, IndexError> {
        let memory_budget = memory_mb * 1024 * 1024;
        let writer: IndexWriter = index
            .writer_with_num_threads(threads.max(1), memory_budget)
            .map_err(|e| match e {
                TantivyError::LockFailure(lock_error, _) => {
                    IndexError::IndexLocked(lock_error.to_string())
                }
                other => IndexError::Tantivy(other),
            })?;
        // Segments are only merged by an explicit optimize.
        writer.set_merge_policy(Box::new(NoMergePolicy));

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        let generation = index.load_metas()?.opstamp;
        policy.on_init(CommitPoint::from_snapshot(
            generation,
            reader.searcher(),
            Utc::now(),
        ));

        debug!(memory_mb, threads, generation, "Created index writer");

        Ok(Self {
            writer: Mutex::new(Some(writer)),
            index: index.clone(),
            reader,
            schema,
            policy,
            opened_at: Utc::now(),
            last_commit: Mutex::new(None),
            commits: AtomicU64::new(0),
            pending_ops: AtomicU64::new(0),
        })
    }

    pub fn schema(&self) -> &Arc<IndexSchema> {
        &self.schema
    }

    /// Add a document. Returns the operation stamp.
    pub fn add_document(&self, doc: &IndexDocument) -> Result<u64, IndexError> {
        let tantivy_doc = self.schema.to_tantivy_doc(doc)?;
        let guard = self.lock_writer()?;
        let writer = guard.as_ref().ok_or(IndexError::WriterClosed)?;
        let opstamp = writer.add_document(tantivy_doc)?;
        self.pending_ops.fetch_add(1, Ordering::Relaxed);
        Ok(opstamp)
    }

    /// Replace any document with the same unique key.
    pub fn update_document(&self, doc: &IndexDocument) -> Result<u64, IndexError> {
        let id = self.schema.document_id(doc)?;
        let tantivy_doc = self.schema.to_tantivy_doc(doc)?;
        let guard = self.lock_writer()?;
        let writer = guard.as_ref().ok_or(IndexError::WriterClosed)?;

        // Delete existing document with same ID (for update)
        writer.delete_term(Term::from_field_text(self.schema.unique_key(), id));
        let opstamp = writer.add_document(tantivy_doc)?;
        self.pending_ops.fetch_add(1, Ordering::Relaxed);
        debug!(id, "Updated document");
        Ok(opstamp)
    }

    pub fn delete_by_id(&self, id: &str) -> Result<u64, IndexError> {
        let guard = self.lock_writer()?;
        let writer = guard.as_ref().ok_or(IndexError::WriterClosed)?;
        let opstamp = writer.delete_term(Term::from_field_text(self.schema.unique_key(), id));
        self.pending_ops.fetch_add(1, Ordering::Relaxed);
        Ok(opstamp)
    }

    pub fn delete_by_query(&self, query: &Query) -> Result<u64, IndexError> {
        let tantivy_query = query.to_tantivy(&self.schema)?;
        let guard = self.lock_writer()?;
        let writer = guard.as_ref().ok_or(IndexError::WriterClosed)?;
        let opstamp = writer.delete_query(tantivy_query)?;
        self.pending_ops.fetch_add(1, Ordering::Relaxed);
        debug!(%query, "Deleted by query");
        Ok(opstamp)
    }

    /// Commit pending changes and record the new commit point.
    pub fn commit(&self) -> Result<CommitPoint, IndexError> {
        let opstamp = {
            let mut guard = self.lock_writer()?;
            let writer = guard.as_mut().ok_or(IndexError::WriterClosed)?;
            writer.commit()?
        };

        self.reader.reload()?;
        let now = Utc::now();
        let commit = CommitPoint::from_snapshot(opstamp, self.reader.searcher(), now);
        self.policy.on_commit(commit.clone());

        self.commits.fetch_add(1, Ordering::Relaxed);
        self.pending_ops.store(0, Ordering::Relaxed);
        *lock_or_recover(&self.last_commit) = Some(now);

        info!(
            opstamp,
            segments = commit.segment_count(),
            "Committed index changes"
        );
        Ok(commit)
    }

    /// Merge all segments into one and commit.
    pub fn optimize(&self) -> Result<CommitPoint, IndexError> {
        let segment_ids = self.index.searchable_segment_ids()?;
        if segment_ids.len() > 1 {
            let mut guard = self.lock_writer()?;
            let writer = guard.as_mut().ok_or(IndexError::WriterClosed)?;
            writer.merge(&segment_ids).wait()?;
            info!(merged = segment_ids.len(), "Merged segments");
        }
        self.commit()
    }

    /// Discard uncommitted changes. Returns the last committed opstamp.
    pub fn rollback(&self) -> Result<u64, IndexError> {
        let mut guard = self.lock_writer()?;
        let writer = guard.as_mut().ok_or(IndexError::WriterClosed)?;
        let opstamp = writer.rollback()?;
        self.pending_ops.store(0, Ordering::Relaxed);
        info!(opstamp, "Rolled back uncommitted changes");
        Ok(opstamp)
    }

    /// Close the writer, waiting for background merges. Idempotent.
    pub fn close(&self) -> Result<(), IndexError> {
        let writer = self.lock_writer()?.take();
        if let Some(writer) = writer {
            writer.wait_merging_threads()?;
            debug!("Closed index writer");
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        lock_or_recover(&self.writer).is_none()
    }

    pub fn stats(&self) -> WriterStats {
        WriterStats {
            opened_at: self.opened_at,
            last_commit: *lock_or_recover(&self.last_commit),
            commits: self.commits.load(Ordering::Relaxed),
            pending_ops: self.pending_ops.load(Ordering::Relaxed),
            closed: self.is_closed(),
        }
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, Option<IndexWriter>>, IndexError> {
        self.writer
            .lock()
            .map_err(|e| IndexError::IndexLocked(e.to_string()))
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
