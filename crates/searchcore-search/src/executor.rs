//! Single-worker, strictly ordered task queue.
//!
//! Warm, listener and register tasks for a new searcher are queued here in
//! that order. One dedicated thread drains a bounded channel, so a task never
//! starts before every task submitted ahead of it has finished.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, warn};

use crate::error::SearchError;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Default queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

pub struct SerialExecutor {
    name: String,
    sender: Mutex<Option<Sender<Task>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    done: Receiver<()>,
    pending: Arc<AtomicUsize>,
}

impl SerialExecutor {
    /// Spawn the worker thread.
    pub fn new(name: impl Into<String>, capacity: usize) -> Result<Self, SearchError> {
        let name = name.into();
        let (sender, receiver) = bounded::<Task>(capacity.max(1));
        let (done_tx, done) = bounded::<()>(1);
        let pending = Arc::new(AtomicUsize::new(0));

        let worker_pending = Arc::clone(&pending);
        let worker_name = name.clone();
        let worker = thread::Builder::new().name(name.clone()).spawn(move || {
            for task in receiver.iter() {
                if catch_unwind(AssertUnwindSafe(task)).is_err() {
                    error!(executor = %worker_name, "Task panicked; continuing with next task");
                }
                worker_pending.fetch_sub(1, Ordering::AcqRel);
            }
            debug!(executor = %worker_name, "Executor drained");
            let _ = done_tx.send(());
        })?;

        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            done,
            pending,
        })
    }

    /// Queue a task behind every task already submitted.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) -> Result<(), SearchError> {
        let sender = match self.sender.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
        .ok_or_else(|| SearchError::ExecutorClosed(self.name.clone()))?;

        self.pending.fetch_add(1, Ordering::AcqRel);
        if sender.send(Box::new(task)).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(SearchError::ExecutorClosed(self.name.clone()));
        }
        Ok(())
    }

    /// Tasks submitted but not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_shutdown(&self) -> bool {
        match self.sender.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }

    /// Stop accepting tasks and wait up to `grace` for queued ones to finish.
    ///
    /// Returns false if the queue did not drain in time; the worker is then
    /// left to finish on its own.
    pub fn shutdown(&self, grace: Duration) -> bool {
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);

        let worker = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(worker) = worker else {
            return true;
        };

        match self.done.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.join().is_err() {
                    warn!(executor = %self.name, "Executor thread exited abnormally");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    executor = %self.name,
                    pending = self.pending(),
                    grace_ms = grace.as_millis() as u64,
                    "Executor did not drain within grace period"
                );
                false
            }
        }
    }
}

impl Drop for SerialExecutor {
    fn drop(&mut self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_tasks_run_in_submission_order() {
        let executor = SerialExecutor::new("test-exec", 8).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..20 {
            let seen = Arc::clone(&seen);
            executor
                .submit(move || {
                    thread::sleep(Duration::from_millis((20 - i) % 3));
                    seen.lock().unwrap().push(i);
                })
                .unwrap();
        }

        assert!(executor.shutdown(Duration::from_secs(5)));
        assert_eq!(*seen.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_panicking_task_does_not_stop_worker() {
        let executor = SerialExecutor::new("test-exec", 4).unwrap();
        let (tx, rx) = mpsc::channel();

        executor.submit(|| panic!("boom")).unwrap();
        executor.submit(move || tx.send(42).unwrap()).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
        assert!(executor.shutdown(Duration::from_secs(5)));
        assert_eq!(executor.pending(), 0);
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let executor = SerialExecutor::new("test-exec", 4).unwrap();
        assert!(executor.shutdown(Duration::from_secs(1)));
        assert!(executor.is_shutdown());
        assert!(matches!(
            executor.submit(|| {}),
            Err(SearchError::ExecutorClosed(_))
        ));
        // Second shutdown is a no-op
        assert!(executor.shutdown(Duration::from_secs(1)));
    }

    #[test]
    fn test_shutdown_times_out_on_stuck_task() {
        let executor = SerialExecutor::new("test-exec", 4).unwrap();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        executor
            .submit(move || {
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
            })
            .unwrap();

        assert!(!executor.shutdown(Duration::from_millis(50)));
        release_tx.send(()).unwrap();
    }
}
