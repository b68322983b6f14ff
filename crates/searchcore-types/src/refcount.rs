//! Explicitly reference-counted handles.
//!
//! A `RefCounted<T>` wraps a shared resource (a writer, a searcher) together
//! with a release action. Every `RefCounted` value stands for one outstanding
//! reference: `increase` hands out another one, `decrease` gives one back, and
//! the release action runs exactly once when the count reaches zero.
//!
//! Unlike `Arc`, the count is observable and a released resource refuses
//! access, which lets owners hand out references that survive slot swaps
//! while still closing the resource deterministically.
//!
//! `RefGuard` ties one reference to a scope and gives it back on drop.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{trace, warn};

use crate::error::CoreError;

/// Error type a release action may return. It is logged, never propagated.
pub type ReleaseError = Box<dyn std::error::Error + Send + Sync>;

type ReleaseFn<T> = Box<dyn FnOnce(&T) -> Result<(), ReleaseError> + Send>;

struct Inner<T> {
    value: T,
    count: AtomicUsize,
    release: Mutex<Option<ReleaseFn<T>>>,
}

/// One counted reference to a shared resource.
pub struct RefCounted<T> {
    inner: Arc<Inner<T>>,
}

impl<T> RefCounted<T> {
    /// Wrap `value` with a count of one.
    pub fn new<F>(value: T, release: F) -> Self
    where
        F: FnOnce(&T) -> Result<(), ReleaseError> + Send + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                value,
                count: AtomicUsize::new(1),
                release: Mutex::new(Some(Box::new(release))),
            }),
        }
    }

    /// Borrow the resource. Fails once the count has reached zero.
    pub fn get(&self) -> Result<&T, CoreError> {
        if self.is_released() {
            return Err(CoreError::AlreadyReleased(
                "handle used after release".to_string(),
            ));
        }
        Ok(&self.inner.value)
    }

    /// Take another reference. Fails if the resource was already released.
    pub fn increase(&self) -> Result<Self, CoreError> {
        self.inner
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                if count == 0 {
                    None
                } else {
                    Some(count + 1)
                }
            })
            .map_err(|_| {
                CoreError::AlreadyReleased("cannot increase a released handle".to_string())
            })?;

        Ok(Self {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Give one reference back, running the release action at zero.
    ///
    /// Errors from the release action are logged and swallowed.
    pub fn decrease(&self) -> Result<(), CoreError> {
        let previous = self
            .inner
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .map_err(|_| {
                CoreError::RefCountUnderflow("decrease called on a released handle".to_string())
            })?;

        if previous == 1 {
            self.run_release();
        }
        Ok(())
    }

    /// Current number of outstanding references.
    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    pub fn is_released(&self) -> bool {
        self.count() == 0
    }

    /// A non-counting pointer that can later try to take a reference.
    pub fn downgrade(&self) -> WeakRefCounted<T> {
        WeakRefCounted {
            inner: Arc::clone(&self.inner),
        }
    }

    /// True if both handles point at the same resource.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn run_release(&self) {
        let release = match self.inner.release.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(release) = release {
            trace!("Running release action");
            if let Err(e) = release(&self.inner.value) {
                warn!(error = %e, "Release action failed");
            }
        }
    }
}

impl<T> fmt::Debug for RefCounted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefCounted")
            .field("count", &self.count())
            .finish()
    }
}

/// Pointer to a counted resource that does not hold a count itself.
pub struct WeakRefCounted<T> {
    inner: Arc<Inner<T>>,
}

impl<T> WeakRefCounted<T> {
    /// Take a reference if the resource has not been released yet.
    pub fn upgrade(&self) -> Option<RefCounted<T>> {
        RefCounted {
            inner: Arc::clone(&self.inner),
        }
        .increase()
        .ok()
    }

    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }
}

impl<T> Clone for WeakRefCounted<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for WeakRefCounted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRefCounted")
            .field("count", &self.count())
            .finish()
    }
}

/// Scope guard owning exactly one reference.
///
/// Dereferences to the resource and decreases the count when dropped.
pub struct RefGuard<T> {
    handle: Option<RefCounted<T>>,
}

impl<T> RefGuard<T> {
    pub fn new(handle: RefCounted<T>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// The underlying counted handle.
    pub fn handle(&self) -> &RefCounted<T> {
        self.counted()
    }

    /// Take another guarded reference to the same resource.
    pub fn try_clone(&self) -> Result<Self, CoreError> {
        Ok(Self::new(self.counted().increase()?))
    }

    /// Give up the guard without decreasing; the caller now owns the reference.
    pub fn into_inner(mut self) -> RefCounted<T> {
        match self.handle.take() {
            Some(handle) => handle,
            None => unreachable!("guard handle is only taken on consumption"),
        }
    }

    fn counted(&self) -> &RefCounted<T> {
        match &self.handle {
            Some(handle) => handle,
            None => unreachable!("guard handle is only taken on consumption"),
        }
    }
}

impl<T> Deref for RefGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.counted().inner.value
    }
}

impl<T> Drop for RefGuard<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.decrease() {
                warn!(error = %e, "Failed to release guarded reference");
            }
        }
    }
}

impl<T> fmt::Debug for RefGuard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.handle {
            Some(handle) => f.debug_tuple("RefGuard").field(handle).finish(),
            None => f.write_str("RefGuard(<taken>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::thread;

    fn counted(value: u32) -> (RefCounted<u32>, Arc<AtomicU32>) {
        let releases = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&releases);
        let handle = RefCounted::new(value, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (handle, releases)
    }

    #[test]
    fn test_new_handle_has_count_one() {
        let (handle, releases) = counted(7);
        assert_eq!(handle.count(), 1);
        assert_eq!(*handle.get().unwrap(), 7);
        assert_eq!(releases.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_release_runs_once_at_zero() {
        let (handle, releases) = counted(1);
        let second = handle.increase().unwrap();
        assert_eq!(handle.count(), 2);

        second.decrease().unwrap();
        assert_eq!(releases.load(Ordering::SeqCst), 0);

        handle.decrease().unwrap();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(handle.is_released());
    }

    #[test]
    fn test_released_handle_refuses_access() {
        let (handle, _) = counted(1);
        handle.decrease().unwrap();

        assert!(matches!(handle.get(), Err(CoreError::AlreadyReleased(_))));
        assert!(matches!(handle.increase(), Err(CoreError::AlreadyReleased(_))));
        assert!(matches!(
            handle.decrease(),
            Err(CoreError::RefCountUnderflow(_))
        ));
    }

    #[test]
    fn test_release_error_is_swallowed() {
        let handle = RefCounted::new(3u32, |_| Err("disk on fire".into()));
        assert!(handle.decrease().is_ok());
        assert!(handle.is_released());
    }

    #[test]
    fn test_weak_upgrade_fails_after_release() {
        let (handle, _) = counted(1);
        let weak = handle.downgrade();

        let upgraded = weak.upgrade().unwrap();
        assert_eq!(handle.count(), 2);
        upgraded.decrease().unwrap();

        handle.decrease().unwrap();
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_guard_decreases_on_drop() {
        let (handle, releases) = counted(5);
        {
            let guard = RefGuard::new(handle.increase().unwrap());
            assert_eq!(*guard, 5);
            assert_eq!(handle.count(), 2);
        }
        assert_eq!(handle.count(), 1);

        let guard = RefGuard::new(handle.increase().unwrap());
        let owned = guard.into_inner();
        assert_eq!(handle.count(), 2);
        owned.decrease().unwrap();
        handle.decrease().unwrap();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_increase_decrease_releases_once() {
        let (handle, releases) = counted(9);
        let handle = Arc::new(handle);

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let handle = Arc::clone(&handle);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let extra = handle.increase().unwrap();
                        extra.decrease().unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(handle.count(), 1);
        assert_eq!(releases.load(Ordering::SeqCst), 0);
        handle.decrease().unwrap();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}
