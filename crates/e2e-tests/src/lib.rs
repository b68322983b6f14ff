//! End-to-end test infrastructure for searchcore.
//!
//! Provides a shared TestHarness and helpers for tests that drive a whole
//! search core: writer, retention policy, controller and caches together.

use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::seq::SliceRandom;

use searchcore_index::{CommitInfo, FieldKind, IndexDocument, IndexSchema};
use searchcore_search::{
    CommitOptions, SearchCore, SearchCoreBuilder, SearchError, Searcher, SearcherEventListener,
};
use searchcore_types::CoreConfig;

/// Categories assigned round-robin to test products.
pub const CATEGORIES: [&str; 3] = ["books", "music", "tools"];

/// Shared test harness for E2E tests.
///
/// Owns a temp directory holding the index and the config used to open it.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    /// Index directory inside the temp dir
    pub index_path: PathBuf,
    /// Settings passed to every core this harness opens
    pub config: CoreConfig,
}

impl TestHarness {
    /// Create a harness with default settings.
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Create a harness, adjusting the default settings first.
    pub fn with_config(adjust: impl FnOnce(CoreConfig) -> CoreConfig) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let index_path = temp_dir.path().join("index");
        let config = adjust(CoreConfig::for_index(index_path.display().to_string()));

        Self {
            _temp_dir: temp_dir,
            index_path,
            config,
        }
    }

    /// Builder for a core over this harness's index.
    pub fn builder(&self) -> SearchCoreBuilder {
        SearchCore::builder(self.config.clone(), test_schema())
    }

    /// Open a core with no listeners.
    pub fn open(&self) -> SearchCore {
        self.builder().open().expect("Failed to open search core")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// id, title (text), category (string), price (u64), year (i64).
pub fn test_schema() -> IndexSchema {
    IndexSchema::builder("id")
        .add_field("id", FieldKind::String)
        .add_field("title", FieldKind::Text)
        .add_field("category", FieldKind::String)
        .add_field("price", FieldKind::U64)
        .add_field("year", FieldKind::I64)
        .build()
        .expect("Failed to build test schema")
}

/// Product `i`: category cycles through `CATEGORIES`, price is `i`.
pub fn product(i: u32) -> IndexDocument {
    IndexDocument::new()
        .with("id", format!("p-{i}"))
        .with("title", format!("product number {i}"))
        .with("category", CATEGORIES[i as usize % CATEGORIES.len()])
        .with("price", u64::from(i))
        .with("year", 2000 + i64::from(i % 25))
}

/// Add products for each id in `ids`, in random order.
pub fn add_products(core: &SearchCore, ids: std::ops::Range<u32>) {
    let mut docs: Vec<IndexDocument> = ids.map(product).collect();
    docs.shuffle(&mut rand::rng());
    core.add_documents(&docs).expect("Failed to add documents");
}

/// Commit, open a new searcher and block until it is registered.
pub fn commit_and_wait(core: &SearchCore) -> CommitInfo {
    let outcome = core
        .commit(CommitOptions::default())
        .expect("Failed to commit");
    if let Some(waiter) = outcome.waiter {
        waiter.wait_blocking().expect("Searcher was not registered");
    }
    outcome.commit
}

/// Unique keys of the documents in a window, in rank order.
pub fn ids_of(searcher: &Searcher, docs: &[u32]) -> Vec<String> {
    docs.iter()
        .map(|&doc| {
            searcher
                .doc(doc)
                .expect("Failed to load document")
                .get_first("id")
                .map(ToString::to_string)
                .unwrap_or_default()
        })
        .collect()
}

/// A listener that blocks inside `new_searcher` until released.
///
/// Each call reports the new searcher's generation on the `entered` channel
/// and then waits for one message on the release channel.
pub struct GateListener {
    entered: Mutex<mpsc::Sender<u64>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl SearcherEventListener for GateListener {
    fn name(&self) -> &str {
        "GateListener"
    }

    fn new_searcher(&self, new: &Searcher, _current: Option<&Searcher>) -> Result<(), SearchError> {
        let _ = self
            .entered
            .lock()
            .expect("gate lock poisoned")
            .send(new.generation());
        let _ = self
            .release
            .lock()
            .expect("gate lock poisoned")
            .recv_timeout(Duration::from_secs(10));
        Ok(())
    }
}

/// Handles for driving a `GateListener` from a test.
pub struct Gate {
    pub listener: Arc<GateListener>,
    pub entered: mpsc::Receiver<u64>,
    pub release: mpsc::Sender<()>,
}

impl Gate {
    pub fn new() -> Self {
        let (entered_tx, entered) = mpsc::channel();
        let (release, release_rx) = mpsc::channel();
        Self {
            listener: Arc::new(GateListener {
                entered: Mutex::new(entered_tx),
                release: Mutex::new(release_rx),
            }),
            entered,
            release,
        }
    }

    /// Wait until a searcher is held at the gate; returns its generation.
    pub fn wait_entered(&self) -> u64 {
        self.entered
            .recv_timeout(Duration::from_secs(10))
            .expect("No searcher reached the gate")
    }

    pub fn open(&self) {
        let _ = self.release.send(());
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}
