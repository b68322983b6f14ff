//! Writer lifecycle management.
//!
//! Any number of callers may borrow the current writer at once through
//! counted handles. Replacing or rolling back the writer pauses new borrows,
//! waits until every outstanding borrow has been returned, swaps the writer
//! and then resumes borrowers.
//!
//! The manager itself is reference counted by its owners; the last
//! `decrease_ref` closes the writer, releases the directory and cancels any
//! pending recovery work.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::Serialize;
use searchcore_types::{RefCounted, RefGuard, WeakRefCounted};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::deletion_policy::ReservingDeletionPolicy;
use crate::directory::DirectoryFactory;
use crate::error::IndexError;
use crate::schema::IndexSchema;
use crate::writer::{CoreIndexWriter, WriterStats};

/// A borrowed writer; returned to the manager on drop.
pub type WriterRef = RefGuard<Arc<CoreIndexWriter>>;

/// Re-check interval while waiting on paused or busy writers.
const WAIT_INTERVAL: Duration = Duration::from_millis(100);

/// Waits at shutdown before closing a writer that is still borrowed.
const CLOSE_WAIT_ROUNDS: u32 = 50;

/// Manager statistics.
#[derive(Debug, Clone, Serialize)]
pub struct WriterManagerStats {
    pub refs: usize,
    pub paused: bool,
    pub writer_open: bool,
    pub outstanding_borrows: usize,
    pub borrow_epochs: u64,
    pub replacements: u64,
    pub closed: bool,
    pub writer: Option<WriterStats>,
}

struct WriterState {
    writer: Option<Arc<CoreIndexWriter>>,
    // Borrow handle for the current epoch; holds no count itself.
    handle: Option<(u64, WeakRefCounted<Arc<CoreIndexWriter>>)>,
    epoch: u64,
    paused: bool,
    // Old writer taken out, replacement not yet installed.
    replacing: bool,
    writer_free: bool,
    closed: bool,
    refs: usize,
    replacements: u64,
}

struct Shared {
    state: Mutex<WriterState>,
    changed: Condvar,
    factory: Arc<DirectoryFactory>,
    path: PathBuf,
    schema: Arc<IndexSchema>,
    memory_mb: usize,
    threads: usize,
    policy: Arc<ReservingDeletionPolicy>,
    recovery: CancellationToken,
    #[cfg(test)]
    before_reopen: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, WriterState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, WriterState>) -> MutexGuard<'a, WriterState> {
        match self.changed.wait_timeout(guard, WAIT_INTERVAL) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }

    #[cfg(test)]
    fn before_reopen(&self) {
        let hook = lock_hook(&self.before_reopen).take();
        if let Some(hook) = hook {
            hook();
        }
    }

    #[cfg(not(test))]
    fn before_reopen(&self) {}

    fn open_writer(&self) -> Result<Arc<CoreIndexWriter>, IndexError> {
        let index = self.factory.acquire(&self.path)?;
        let result = CoreIndexWriter::open(
            &index,
            Arc::clone(&self.schema),
            self.memory_mb,
            self.threads,
            Arc::clone(&self.policy),
        );
        self.factory.release(&self.path);
        result.map(Arc::new)
    }

    // Runs when the last borrow of an epoch is returned.
    fn borrows_released(&self, epoch: u64) {
        let mut state = self.lock_state();
        if matches!(state.handle, Some((current, _)) if current == epoch) {
            state.handle = None;
            state.writer_free = true;
        }
        drop(state);
        self.changed.notify_all();
    }
}

#[cfg(test)]
fn lock_hook(
    hook: &Mutex<Option<Box<dyn FnOnce() + Send>>>,
) -> MutexGuard<'_, Option<Box<dyn FnOnce() + Send>>> {
    match hook.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Hands out counted writer borrows and coordinates writer replacement.
pub struct WriterLifecycleManager {
    shared: Arc<Shared>,
}

impl WriterLifecycleManager {
    /// Create a manager with one reference held by the caller.
    ///
    /// The directory at `path` must already be open in `factory`; the
    /// manager keeps its own reference until the last `decrease_ref`.
    pub fn new(
        factory: Arc<DirectoryFactory>,
        path: &Path,
        schema: Arc<IndexSchema>,
        memory_mb: usize,
        threads: usize,
        policy: Arc<ReservingDeletionPolicy>,
    ) -> Result<Self, IndexError> {
        factory.acquire(path)?;
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(WriterState {
                    writer: None,
                    handle: None,
                    epoch: 0,
                    paused: false,
                    replacing: false,
                    writer_free: true,
                    closed: false,
                    refs: 1,
                    replacements: 0,
                }),
                changed: Condvar::new(),
                factory,
                path: path.to_path_buf(),
                schema,
                memory_mb,
                threads,
                policy,
                recovery: CancellationToken::new(),
                #[cfg(test)]
                before_reopen: Mutex::new(None),
            }),
        })
    }

    /// Borrow the writer, opening it if needed.
    ///
    /// Blocks while a replacement is in progress. With `peek`, returns the
    /// current borrow handle only if one is outstanding, without blocking
    /// or opening anything.
    pub fn get_writer_handle(&self, peek: bool) -> Result<Option<WriterRef>, IndexError> {
        let mut state = self.shared.lock_state();

        if peek {
            return Ok(state
                .handle
                .as_ref()
                .and_then(|(_, weak)| weak.upgrade())
                .map(RefGuard::new));
        }

        loop {
            if state.closed {
                return Err(IndexError::ManagerClosed);
            }
            if !state.paused {
                break;
            }
            state = self.shared.wait(state);
        }

        if let Some(handle) = state.handle.as_ref().and_then(|(_, weak)| weak.upgrade()) {
            return Ok(Some(RefGuard::new(handle)));
        }

        let writer = match &state.writer {
            Some(writer) => Arc::clone(writer),
            None => {
                let writer = self.shared.open_writer()?;
                info!(path = ?self.shared.path, "Opened index writer");
                state.writer = Some(Arc::clone(&writer));
                writer
            }
        };

        state.epoch += 1;
        let epoch = state.epoch;
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let handle = RefCounted::new(writer, move |_| {
            if let Some(shared) = shared.upgrade() {
                shared.borrows_released(epoch);
            }
            Ok(())
        });
        state.handle = Some((epoch, handle.downgrade()));
        state.writer_free = false;
        debug!(epoch, "Started writer borrow epoch");

        Ok(Some(RefGuard::new(handle)))
    }

    /// Close (or roll back) the current writer and open a fresh one.
    ///
    /// Waits for outstanding borrows. New borrowers block until done. The
    /// close and reopen run without the state lock, so peeks and stats
    /// stay responsive.
    pub fn replace_writer(&self, rollback: bool) -> Result<(), IndexError> {
        let mut state = self.shared.lock_state();
        if state.closed {
            return Err(IndexError::ManagerClosed);
        }

        state.paused = true;
        while !state.writer_free || state.replacing {
            if state.closed {
                drop(state);
                self.shared.changed.notify_all();
                return Err(IndexError::ManagerClosed);
            }
            state = self.shared.wait(state);
        }
        state.replacing = true;
        let old = state.writer.take();
        drop(state);

        if let Some(old) = old {
            if rollback {
                if let Err(e) = old.rollback() {
                    error!(error = %e, "Error rolling back old index writer");
                }
            }
            if let Err(e) = old.close() {
                error!(error = %e, "Error closing old index writer");
            }
        }
        self.shared.before_reopen();
        let result = self.shared.open_writer();

        let mut state = self.shared.lock_state();
        state.replacing = false;
        if !state.closed {
            state.paused = false;
        }
        let outcome = match result {
            Ok(writer) if state.closed => {
                drop(state);
                if let Err(e) = writer.close() {
                    error!(error = %e, "Error closing replacement index writer");
                }
                self.shared.changed.notify_all();
                return Err(IndexError::ManagerClosed);
            }
            Ok(writer) => {
                state.writer = Some(writer);
                state.replacements += 1;
                info!(rollback, "New index writer is ready to be used");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to open replacement index writer");
                Err(e)
            }
        };
        drop(state);
        self.shared.changed.notify_all();
        outcome
    }

    /// Discard uncommitted changes by replacing the writer.
    pub fn rollback(&self) -> Result<(), IndexError> {
        self.replace_writer(true)
    }

    /// Add an owner.
    pub fn increase_ref(&self) -> Result<(), IndexError> {
        let mut state = self.shared.lock_state();
        if state.closed || state.refs == 0 {
            return Err(IndexError::ManagerClosed);
        }
        state.refs += 1;
        Ok(())
    }

    /// Remove an owner; the last one shuts everything down.
    pub fn decrease_ref(&self) -> Result<(), IndexError> {
        let mut state = self.shared.lock_state();
        if state.refs == 0 {
            return Err(IndexError::ManagerClosed);
        }
        state.refs -= 1;
        if state.refs > 0 {
            return Ok(());
        }

        state.closed = true;
        state.paused = true;
        self.shared.changed.notify_all();

        let mut rounds = 0;
        while (!state.writer_free || state.replacing) && rounds < CLOSE_WAIT_ROUNDS {
            state = self.shared.wait(state);
            rounds += 1;
        }
        if !state.writer_free {
            warn!("Closing index writer with borrows still outstanding");
        }

        let writer = state.writer.take();
        drop(state);
        self.shared.changed.notify_all();

        if let Some(writer) = writer {
            if let Err(e) = writer.close() {
                error!(error = %e, "Error closing index writer");
            }
        }
        self.shared.recovery.cancel();
        self.shared.factory.release(&self.shared.path);
        info!(path = ?self.shared.path, "Writer manager closed");
        Ok(())
    }

    /// Token cancelled when the manager shuts down.
    pub fn recovery_token(&self) -> CancellationToken {
        self.shared.recovery.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock_state().closed
    }

    pub fn stats(&self) -> WriterManagerStats {
        let state = self.shared.lock_state();
        WriterManagerStats {
            refs: state.refs,
            paused: state.paused,
            writer_open: state.writer.is_some(),
            outstanding_borrows: state.handle.as_ref().map_or(0, |(_, weak)| weak.count()),
            borrow_epochs: state.epoch,
            replacements: state.replacements,
            closed: state.closed,
            writer: state.writer.as_ref().map(|w| w.stats()),
        }
    }
}
