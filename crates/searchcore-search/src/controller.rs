//! Searcher lifecycle control.
//!
//! The controller owns the registered searcher (serves queries) and the
//! realtime searcher (newest reader, for near-real-time lookups), and runs
//! the publication protocol for new generations:
//!
//! 1. a caller asks for a new searcher and takes an on-deck slot, or is
//!    rejected when `max_warming_searchers` are already on deck
//! 2. a reader is opened under the fair reopen mutex
//! 3. warm, listener and register tasks are queued, in that order, on a
//!    single-worker executor
//! 4. registration swaps the registered slot, releases the old searcher and
//!    wakes callers waiting for a first searcher
//!
//! Lock order: reopen mutex, then state, then the open-searcher list.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use parking_lot::FairMutex;
use searchcore_index::{DirectoryFactory, IndexSchema, WriterLifecycleManager};
use searchcore_types::{CoreConfig, RefCounted, RefGuard, WeakRefCounted};
use serde::Serialize;
use tantivy::{Index, IndexReader, ReloadPolicy};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::cache::{SearcherCaches, UserRegenerator};
use crate::error::SearchError;
use crate::executor::{SerialExecutor, DEFAULT_QUEUE_CAPACITY};
use crate::listener::SearcherEventListener;
use crate::searcher::{Searcher, SearcherOptions, SearcherStats};

/// One counted reference to a searcher.
pub type SearcherHandle = RefCounted<Searcher>;

/// A searcher reference released on drop.
pub type SearcherRef = RefGuard<Searcher>;

/// Re-check interval for callers waiting on a first searcher.
const WAIT_INTERVAL: Duration = Duration::from_millis(100);

/// How `get_searcher_ref` should behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearcherRequest {
    /// Open a new searcher even if one is registered
    pub force_new: bool,
    /// Return a reference to the (possibly new) searcher
    pub return_searcher: bool,
    /// Return a waiter completing once the new searcher is registered
    pub wait: bool,
    /// The open follows a writer change; allows the near-real-time path
    pub update_handler_reopens: bool,
}

impl SearcherRequest {
    /// The registered searcher, opening the first one if needed.
    pub fn current() -> Self {
        Self {
            force_new: false,
            return_searcher: true,
            wait: false,
            update_handler_reopens: false,
        }
    }

    /// A new generation after a commit.
    pub fn reopen() -> Self {
        Self {
            force_new: true,
            return_searcher: false,
            wait: true,
            update_handler_reopens: true,
        }
    }

    pub fn returning(mut self, return_searcher: bool) -> Self {
        self.return_searcher = return_searcher;
        self
    }

    pub fn waiting(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }
}

impl Default for SearcherRequest {
    fn default() -> Self {
        Self::current()
    }
}

pub struct SearcherResponse {
    pub searcher: Option<SearcherRef>,
    pub waiter: Option<RegistrationWaiter>,
}

/// Completes when a requested searcher has been registered.
#[derive(Debug)]
pub struct RegistrationWaiter {
    rx: oneshot::Receiver<()>,
}

impl RegistrationWaiter {
    pub async fn wait(self) -> Result<(), SearchError> {
        self.rx.await.map_err(|_| SearchError::RegistrationAbandoned)
    }

    /// Block the current thread. Must not be called from async code.
    pub fn wait_blocking(self) -> Result<(), SearchError> {
        self.rx
            .blocking_recv()
            .map_err(|_| SearchError::RegistrationAbandoned)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStats {
    pub registered: Option<SearcherStats>,
    pub realtime_generation: Option<u64>,
    pub on_deck: usize,
    pub on_deck_high_water: usize,
    pub open_searchers: usize,
    pub searchers_opened: u64,
    pub registrations: u64,
    pub rejections: u64,
    pub pending_tasks: usize,
    pub closed: bool,
}

struct ControllerState {
    registered: Option<SearcherHandle>,
    realtime: Option<SearcherHandle>,
    on_deck: usize,
    closed: bool,
}

struct ReopenState {
    reader: Option<IndexReader>,
}

type Listeners = RwLock<Vec<Arc<dyn SearcherEventListener>>>;

struct ControllerInner {
    config: CoreConfig,
    schema: Arc<IndexSchema>,
    factory: Arc<DirectoryFactory>,
    path: PathBuf,
    index: Index,
    writers: Arc<WriterLifecycleManager>,
    state: Mutex<ControllerState>,
    changed: Condvar,
    open_lock: FairMutex<ReopenState>,
    open_searchers: Mutex<BTreeMap<u64, WeakRefCounted<Searcher>>>,
    executor: SerialExecutor,
    first_listeners: Listeners,
    new_listeners: Listeners,
    user_regenerators: HashMap<String, UserRegenerator>,
    next_id: AtomicU64,
    opened: AtomicU64,
    registrations: AtomicU64,
    rejections: AtomicU64,
    on_deck_high_water: AtomicUsize,
}

fn release(handle: SearcherHandle, what: &str) {
    if let Err(e) = handle.decrease() {
        warn!(error = %e, what, "Failed to release searcher reference");
    }
}

impl ControllerInner {
    fn lock_state(&self) -> MutexGuard<'_, ControllerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, ControllerState>) -> MutexGuard<'a, ControllerState> {
        match self.changed.wait_timeout(guard, WAIT_INTERVAL) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }

    fn lock_open_searchers(&self) -> MutexGuard<'_, BTreeMap<u64, WeakRefCounted<Searcher>>> {
        match self.open_searchers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn listeners(list: &Listeners) -> Vec<Arc<dyn SearcherEventListener>> {
        match list.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Give back an on-deck slot after a failed open and wake waiters.
    fn undeck(&self) {
        let mut state = self.lock_state();
        state.on_deck = state.on_deck.saturating_sub(1);
        drop(state);
        self.changed.notify_all();
    }

    /// Publish `new`, taking ownership of its reference.
    ///
    /// The slot swap and the release of the previous searcher happen under
    /// the state lock, so readers never observe a searcher mid-release.
    fn register_searcher(&self, new: SearcherHandle) {
        let mut state = self.lock_state();
        state.on_deck = state.on_deck.saturating_sub(1);

        if state.closed {
            drop(state);
            self.changed.notify_all();
            release(new, "registration after close");
            return;
        }

        let (name, generation) = match new.get() {
            Ok(searcher) => {
                searcher.register();
                (searcher.name().to_string(), searcher.generation())
            }
            Err(_) => (String::from("<released>"), 0),
        };

        if let Some(old) = state.registered.replace(new) {
            release(old, "previous registered searcher");
        }
        let on_deck = state.on_deck;
        drop(state);

        self.registrations.fetch_add(1, Ordering::Relaxed);
        self.changed.notify_all();
        info!(searcher = %name, generation, on_deck, "Registered new searcher");
    }

    fn forget_searcher(&self, id: u64) {
        self.lock_open_searchers().remove(&id);
    }
}

/// Opens, warms, registers and retires searchers for one index.
#[derive(Clone)]
pub struct SearcherController {
    inner: Arc<ControllerInner>,
}

impl SearcherController {
    /// The directory at `path` must already be open in `factory`.
    pub fn new(
        config: CoreConfig,
        schema: Arc<IndexSchema>,
        factory: Arc<DirectoryFactory>,
        path: &Path,
        writers: Arc<WriterLifecycleManager>,
        user_regenerators: HashMap<String, UserRegenerator>,
    ) -> Result<Self, SearchError> {
        let index = factory.acquire(path)?;
        let executor = match SerialExecutor::new("searcherExecutor", DEFAULT_QUEUE_CAPACITY) {
            Ok(executor) => executor,
            Err(e) => {
                factory.release(path);
                return Err(e);
            }
        };

        Ok(Self {
            inner: Arc::new(ControllerInner {
                config,
                schema,
                factory,
                path: path.to_path_buf(),
                index,
                writers,
                state: Mutex::new(ControllerState {
                    registered: None,
                    realtime: None,
                    on_deck: 0,
                    closed: false,
                }),
                changed: Condvar::new(),
                open_lock: FairMutex::new(ReopenState { reader: None }),
                open_searchers: Mutex::new(BTreeMap::new()),
                executor,
                first_listeners: RwLock::new(Vec::new()),
                new_listeners: RwLock::new(Vec::new()),
                user_regenerators,
                next_id: AtomicU64::new(0),
                opened: AtomicU64::new(0),
                registrations: AtomicU64::new(0),
                rejections: AtomicU64::new(0),
                on_deck_high_water: AtomicUsize::new(0),
            }),
        })
    }

    /// Run `listener` for the first searcher only.
    pub fn add_first_searcher_listener(&self, listener: Arc<dyn SearcherEventListener>) {
        match self.inner.first_listeners.write() {
            Ok(mut guard) => guard.push(listener),
            Err(poisoned) => poisoned.into_inner().push(listener),
        }
    }

    /// Run `listener` for every searcher that replaces a registered one.
    pub fn add_new_searcher_listener(&self, listener: Arc<dyn SearcherEventListener>) {
        match self.inner.new_listeners.write() {
            Ok(mut guard) => guard.push(listener),
            Err(poisoned) => poisoned.into_inner().push(listener),
        }
    }

    /// Open a searcher over the latest commit.
    ///
    /// Reuses and reloads the previous reader when near-real-time reopening
    /// is allowed, otherwise opens a fresh one. The result always becomes the
    /// realtime searcher. A `realtime` open over an unchanged generation
    /// returns the current realtime searcher instead of opening another.
    pub fn open_new_searcher_ref(
        &self,
        update_handler_reopens: bool,
        realtime: bool,
    ) -> Result<SearcherHandle, SearchError> {
        if self.inner.lock_state().closed {
            return Err(SearchError::ControllerClosed);
        }
        let mut reopen = self.inner.open_lock.lock();
        self.open_locked(&mut reopen, update_handler_reopens, realtime)
    }

    fn open_locked(
        &self,
        reopen: &mut ReopenState,
        update_handler_reopens: bool,
        realtime: bool,
    ) -> Result<SearcherHandle, SearchError> {
        let inner = &self.inner;
        let generation = inner.index.load_metas()?.opstamp;

        if realtime {
            let state = inner.lock_state();
            if let Some(current) = &state.realtime {
                let unchanged = current
                    .get()
                    .map(|s| s.generation() == generation)
                    .unwrap_or(false);
                if unchanged {
                    if let Ok(handle) = current.increase() {
                        return Ok(handle);
                    }
                }
            }
        }

        let nrt = inner.config.nrt_reopen
            && update_handler_reopens
            && reopen.reader.is_some()
            && inner.writers.stats().writer_open;
        let reader = match &reopen.reader {
            Some(reader) if nrt => {
                reader.reload()?;
                reader.clone()
            }
            _ => {
                let reader: IndexReader = inner
                    .index
                    .reader_builder()
                    .reload_policy(ReloadPolicy::Manual)
                    .try_into()?;
                reader
            }
        };
        reopen.reader = Some(reader.clone());

        let id = inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let caches = if realtime {
            SearcherCaches::disabled()
        } else {
            SearcherCaches::from_config(&inner.config, &inner.user_regenerators)
        };
        inner.factory.acquire(&inner.path)?;
        let options = SearcherOptions::new(id, generation)
            .realtime(realtime)
            .with_caches(caches)
            .with_window(
                inner.config.query_result_window_size,
                inner.config.query_result_max_docs_cached,
            )
            .with_lazy_fields(inner.config.enable_lazy_field_loading)
            .with_directory(Arc::clone(&inner.factory), inner.path.clone());
        let searcher = Searcher::open(reader.searcher(), Arc::clone(&inner.schema), options);

        let weak: Weak<ControllerInner> = Arc::downgrade(&self.inner);
        let handle = RefCounted::new(searcher, move |searcher: &Searcher| {
            if let Some(inner) = weak.upgrade() {
                inner.forget_searcher(searcher.id());
            }
            searcher.close();
            Ok(())
        });

        {
            let mut state = inner.lock_state();
            if state.closed {
                drop(state);
                release(handle, "searcher opened during close");
                return Err(SearchError::ControllerClosed);
            }
            let slot = handle.increase()?;
            if let Some(old) = state.realtime.replace(slot) {
                release(old, "previous realtime searcher");
            }
        }
        if !realtime {
            inner.lock_open_searchers().insert(id, handle.downgrade());
        }

        inner.opened.fetch_add(1, Ordering::Relaxed);
        info!(id, generation, realtime, nrt, "Opened new searcher");
        Ok(handle)
    }

    /// The publication protocol.
    ///
    /// Without `force_new` the registered searcher is returned, waiting for
    /// an in-flight first open if there is none yet. Otherwise a new
    /// searcher is opened and queued for warming and registration; more than
    /// `max_warming_searchers` concurrent opens fail with
    /// [`SearchError::ServiceUnavailable`].
    pub fn get_searcher_ref(&self, request: SearcherRequest) -> Result<SearcherResponse, SearchError> {
        let inner = &self.inner;
        let max = inner.config.max_warming_searchers;

        let mut state = inner.lock_state();
        loop {
            if state.closed {
                return Err(SearchError::ControllerClosed);
            }
            if request.force_new {
                break;
            }
            if let Some(registered) = &state.registered {
                let searcher = if request.return_searcher {
                    Some(RefGuard::new(registered.increase()?))
                } else {
                    None
                };
                return Ok(SearcherResponse {
                    searcher,
                    waiter: None,
                });
            }
            if state.on_deck == 0 {
                break;
            }
            state = inner.wait(state);
        }

        state.on_deck += 1;
        let on_deck = state.on_deck;
        if on_deck > max {
            state.on_deck -= 1;
            drop(state);
            inner.rejections.fetch_add(1, Ordering::Relaxed);
            warn!(on_deck = on_deck - 1, max, "Rejected searcher open: too many warming searchers");
            return Err(SearchError::ServiceUnavailable(format!(
                "Error opening new searcher. exceeded limit of max_warming_searchers={max}, try again later."
            )));
        }
        if on_deck > 1 {
            warn!(on_deck, "PERFORMANCE WARNING: Overlapping on-deck searchers");
        }
        inner.on_deck_high_water.fetch_max(on_deck, Ordering::Relaxed);
        drop(state);

        // Held through scheduling so registration follows open order.
        let mut reopen = inner.open_lock.lock();
        let handle = match self.open_locked(&mut reopen, request.update_handler_reopens, false) {
            Ok(handle) => handle,
            Err(e) => {
                drop(reopen);
                inner.undeck();
                error!(error = %e, "Error opening new searcher");
                return Err(e);
            }
        };

        let scheduled = self.schedule(RefGuard::new(handle), request);
        drop(reopen);
        match scheduled {
            Ok(response) => Ok(response),
            Err((e, registered)) => {
                if !registered {
                    inner.undeck();
                }
                error!(error = %e, "Error scheduling new searcher");
                Err(e)
            }
        }
    }

    /// Queue warm, listeners and registration for `new`.
    ///
    /// On error, the flag says whether `new` was already registered.
    fn schedule(
        &self,
        new: SearcherRef,
        request: SearcherRequest,
    ) -> Result<SearcherResponse, (SearchError, bool)> {
        let inner = &self.inner;

        let current: Option<SearcherRef> = {
            let state = inner.lock_state();
            state
                .registered
                .as_ref()
                .and_then(|handle| handle.increase().ok())
                .map(RefGuard::new)
        };

        let returned = if request.return_searcher {
            Some(new.try_clone().map_err(|e| (e.into(), false))?)
        } else {
            None
        };

        let mut already_registered = false;
        if current.is_none() && inner.config.use_cold_searcher {
            let cold = new.try_clone().map_err(|e| (e.into(), false))?;
            warn!(searcher = %new.name(), "Registering cold searcher: no searcher registered and use_cold_searcher is enabled");
            inner.register_searcher(cold.into_inner());
            already_registered = true;
        }

        if let Some(current) = &current {
            let warming = new.try_clone().map_err(|e| (e.into(), already_registered))?;
            let source = current.try_clone().map_err(|e| (e.into(), already_registered))?;
            inner
                .executor
                .submit(move || warming.warm(&source))
                .map_err(|e| (e, already_registered))?;
        }

        let listeners = if current.is_none() {
            ControllerInner::listeners(&inner.first_listeners)
        } else {
            ControllerInner::listeners(&inner.new_listeners)
        };
        if !listeners.is_empty() {
            let target = new.try_clone().map_err(|e| (e.into(), already_registered))?;
            let previous = match &current {
                Some(current) => Some(current.try_clone().map_err(|e| (e.into(), already_registered))?),
                None => None,
            };
            inner
                .executor
                .submit(move || {
                    for listener in &listeners {
                        if let Err(e) = listener.new_searcher(&target, previous.as_deref()) {
                            error!(listener = listener.name(), searcher = %target.name(), error = %e, "Searcher listener failed");
                        }
                    }
                })
                .map_err(|e| (e, already_registered))?;
        }

        let (tx, rx) = oneshot::channel();
        let registrar = Arc::clone(&self.inner);
        inner
            .executor
            .submit(move || {
                if already_registered {
                    drop(new);
                } else {
                    registrar.register_searcher(new.into_inner());
                }
                drop(current);
                let _ = tx.send(());
            })
            .map_err(|e| (e, already_registered))?;

        debug!(cold = already_registered, "Queued searcher registration");
        Ok(SearcherResponse {
            searcher: returned,
            waiter: request.wait.then_some(RegistrationWaiter { rx }),
        })
    }

    /// The registered searcher, opening the first one if needed.
    ///
    /// Unlike `get_searcher_ref`, this waits until a searcher has actually
    /// been registered rather than handing out an on-deck one.
    pub fn get_searcher(&self) -> Result<SearcherRef, SearchError> {
        drop(self.get_searcher_ref(SearcherRequest::current().returning(false))?);

        let inner = &self.inner;
        let mut state = inner.lock_state();
        loop {
            if state.closed {
                return Err(SearchError::ControllerClosed);
            }
            if let Some(registered) = &state.registered {
                return Ok(RefGuard::new(registered.increase()?));
            }
            if state.on_deck == 0 {
                return Err(SearchError::RegistrationAbandoned);
            }
            state = inner.wait(state);
        }
    }

    /// Open, warm and register a new searcher. Returns a waiter for the registration.
    pub fn reopen(&self) -> Result<RegistrationWaiter, SearchError> {
        self.get_searcher_ref(SearcherRequest::reopen())?
            .waiter
            .ok_or(SearchError::RegistrationAbandoned)
    }

    /// The newest searcher, opening one over the latest commit if none exists.
    pub fn get_realtime_searcher(&self) -> Result<SearcherRef, SearchError> {
        {
            let state = self.inner.lock_state();
            if state.closed {
                return Err(SearchError::ControllerClosed);
            }
            if let Some(handle) = state.realtime.as_ref().and_then(|h| h.increase().ok()) {
                return Ok(RefGuard::new(handle));
            }
        }
        Ok(RefGuard::new(self.open_new_searcher_ref(true, true)?))
    }

    /// The registered searcher, if any, without blocking or opening.
    pub fn registered_searcher(&self) -> Option<SearcherRef> {
        let state = self.inner.lock_state();
        state
            .registered
            .as_ref()
            .and_then(|h| h.increase().ok())
            .map(RefGuard::new)
    }

    pub fn on_deck_count(&self) -> usize {
        self.inner.lock_state().on_deck
    }

    /// Searchers opened for serving and not yet released.
    pub fn open_searcher_count(&self) -> usize {
        self.inner
            .lock_open_searchers()
            .values()
            .filter(|weak| weak.count() > 0)
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock_state().closed
    }

    pub fn stats(&self) -> ControllerStats {
        let inner = &self.inner;
        let (registered, realtime_generation, on_deck, closed) = {
            let state = inner.lock_state();
            (
                state.registered.as_ref().and_then(|h| h.get().ok()).map(|s| s.stats()),
                state.realtime.as_ref().and_then(|h| h.get().ok()).map(|s| s.generation()),
                state.on_deck,
                state.closed,
            )
        };

        ControllerStats {
            registered,
            realtime_generation,
            on_deck,
            on_deck_high_water: inner.on_deck_high_water.load(Ordering::Relaxed),
            open_searchers: self.open_searcher_count(),
            searchers_opened: inner.opened.load(Ordering::Relaxed),
            registrations: inner.registrations.load(Ordering::Relaxed),
            rejections: inner.rejections.load(Ordering::Relaxed),
            pending_tasks: inner.executor.pending(),
            closed,
        }
    }

    /// Stop the warm executor, then release the registered and realtime
    /// searchers. Searchers still referenced elsewhere are force-closed.
    pub fn close(&self) {
        let inner = &self.inner;
        {
            let mut state = inner.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        inner.changed.notify_all();

        let grace = Duration::from_secs(inner.config.shutdown_timeout_secs);
        if !inner.executor.shutdown(grace) {
            warn!(grace_secs = grace.as_secs(), "Searcher executor did not finish before close");
        }

        let (registered, realtime) = {
            let mut state = inner.lock_state();
            (state.registered.take(), state.realtime.take())
        };
        if let Some(handle) = registered {
            release(handle, "registered searcher at close");
        }
        if let Some(handle) = realtime {
            release(handle, "realtime searcher at close");
        }

        let leftovers: Vec<WeakRefCounted<Searcher>> =
            inner.lock_open_searchers().values().cloned().collect();
        for weak in leftovers {
            if let Some(handle) = weak.upgrade() {
                if let Ok(searcher) = handle.get() {
                    warn!(searcher = %searcher.name(), refs = handle.count() - 1, "Searcher still referenced at close; forcing close");
                    searcher.close();
                }
                release(handle, "leftover searcher at close");
            }
        }

        inner.factory.release(&inner.path);
        info!(path = ?inner.path, "Searcher controller closed");
    }
}
