//! One index with its writer and searchers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use searchcore_index::{
    CommitInfo, DirectoryFactory, IndexDocument, IndexError, IndexSchema, Query,
    ReservingDeletionPolicy, WriterLifecycleManager, WriterManagerStats, WriterRef,
};
use searchcore_types::CoreConfig;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::cache::UserRegenerator;
use crate::command::{QueryCommand, QueryResult};
use crate::controller::{
    ControllerStats, RegistrationWaiter, SearcherController, SearcherRef, SearcherRequest,
};
use crate::error::SearchError;
use crate::listener::{QueryWarmingListener, SearcherEventListener};

/// What to do after a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOptions {
    /// Open and register a new searcher over the commit
    pub open_searcher: bool,
    /// Return a waiter for the new searcher's registration
    pub wait_searcher: bool,
    /// Merge all segments into one before committing
    pub optimize: bool,
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self {
            open_searcher: true,
            wait_searcher: true,
            optimize: false,
        }
    }
}

#[derive(Debug)]
pub struct CommitOutcome {
    pub commit: CommitInfo,
    /// Present when a searcher was opened and `wait_searcher` was set
    pub waiter: Option<RegistrationWaiter>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoreStats {
    pub path: PathBuf,
    pub first_open: bool,
    pub searchers: ControllerStats,
    pub writer: WriterManagerStats,
    pub commits: Vec<CommitInfo>,
}

/// Configures and opens a [`SearchCore`].
pub struct SearchCoreBuilder {
    config: CoreConfig,
    schema: IndexSchema,
    factory: Option<Arc<DirectoryFactory>>,
    first_listeners: Vec<Arc<dyn SearcherEventListener>>,
    new_listeners: Vec<Arc<dyn SearcherEventListener>>,
    user_regenerators: HashMap<String, UserRegenerator>,
}

impl SearchCoreBuilder {
    /// Share a directory factory with other cores. Defaults to a private
    /// on-disk factory.
    pub fn with_directory_factory(mut self, factory: Arc<DirectoryFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn with_first_searcher_listener(mut self, listener: Arc<dyn SearcherEventListener>) -> Self {
        self.first_listeners.push(listener);
        self
    }

    pub fn with_new_searcher_listener(mut self, listener: Arc<dyn SearcherEventListener>) -> Self {
        self.new_listeners.push(listener);
        self
    }

    /// Run `commands` against every searcher before it is registered.
    pub fn with_warming_queries(self, commands: Vec<QueryCommand>) -> Self {
        let listener: Arc<dyn SearcherEventListener> = Arc::new(QueryWarmingListener::new(commands));
        self.with_first_searcher_listener(Arc::clone(&listener))
            .with_new_searcher_listener(listener)
    }

    /// Autowarm the user cache `name` with `regenerator`.
    pub fn with_user_regenerator(mut self, name: impl Into<String>, regenerator: UserRegenerator) -> Self {
        self.user_regenerators.insert(name.into(), regenerator);
        self
    }

    /// Open the index, its writer and the first searcher.
    pub fn open(self) -> Result<SearchCore, SearchError> {
        let config = self.config;
        config.validate()?;

        let path = config.expanded_index_path();
        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(DirectoryFactory::mmap()));

        if factory.is_locked(&path) {
            if config.unlock_on_startup {
                factory.remove_stale_lock(&path)?;
            } else {
                warn!(path = ?path, "Index is locked; set unlock_on_startup to remove a stale lock");
            }
        }

        let opened = factory.get(&path, &self.schema)?;
        let schema = Arc::new(self.schema);
        let policy = Arc::new(ReservingDeletionPolicy::from_config(&config.deletion_policy));

        let writers = match WriterLifecycleManager::new(
            Arc::clone(&factory),
            &path,
            Arc::clone(&schema),
            config.writer_memory_mb,
            config.writer_threads,
            Arc::clone(&policy),
        ) {
            Ok(writers) => Arc::new(writers),
            Err(e) => {
                factory.release(&path);
                return Err(e.into());
            }
        };

        let controller = match SearcherController::new(
            config.clone(),
            Arc::clone(&schema),
            Arc::clone(&factory),
            &path,
            Arc::clone(&writers),
            self.user_regenerators,
        ) {
            Ok(controller) => controller,
            Err(e) => {
                if let Err(close_err) = writers.decrease_ref() {
                    error!(error = %close_err, "Error closing writer manager");
                }
                factory.release(&path);
                return Err(e);
            }
        };
        for listener in self.first_listeners {
            controller.add_first_searcher_listener(listener);
        }
        for listener in self.new_listeners {
            controller.add_new_searcher_listener(listener);
        }

        let core = SearchCore {
            config,
            path,
            schema,
            factory,
            policy,
            writers,
            controller,
            first_open: opened.first_open,
            closed: AtomicBool::new(false),
        };

        // Opening the writer runs the deletion policy over existing commits.
        drop(core.writer()?);
        core.controller.get_searcher()?;

        info!(path = ?core.path, first_open = core.first_open, "Opened search core");
        Ok(core)
    }
}

/// A searchable, writable index.
pub struct SearchCore {
    config: CoreConfig,
    path: PathBuf,
    schema: Arc<IndexSchema>,
    factory: Arc<DirectoryFactory>,
    policy: Arc<ReservingDeletionPolicy>,
    writers: Arc<WriterLifecycleManager>,
    controller: SearcherController,
    first_open: bool,
    closed: AtomicBool,
}

impl SearchCore {
    pub fn builder(config: CoreConfig, schema: IndexSchema) -> SearchCoreBuilder {
        SearchCoreBuilder {
            config,
            schema,
            factory: None,
            first_listeners: Vec::new(),
            new_listeners: Vec::new(),
            user_regenerators: HashMap::new(),
        }
    }

    /// Open with defaults for everything but config and schema.
    pub fn open(config: CoreConfig, schema: IndexSchema) -> Result<Self, SearchError> {
        Self::builder(config, schema).open()
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &Arc<IndexSchema> {
        &self.schema
    }

    pub fn controller(&self) -> &SearcherController {
        &self.controller
    }

    pub fn writers(&self) -> &Arc<WriterLifecycleManager> {
        &self.writers
    }

    pub fn deletion_policy(&self) -> &Arc<ReservingDeletionPolicy> {
        &self.policy
    }

    /// True if no earlier core opened this path through the same factory.
    pub fn is_first_open(&self) -> bool {
        self.first_open
    }

    fn writer(&self) -> Result<WriterRef, SearchError> {
        self.writers
            .get_writer_handle(false)?
            .ok_or(SearchError::Index(IndexError::WriterClosed))
    }

    // -- updates --

    /// Add a document, replacing any document with the same unique key.
    pub fn add_document(&self, doc: &IndexDocument) -> Result<u64, SearchError> {
        Ok(self.writer()?.update_document(doc)?)
    }

    /// Add several documents under one writer borrow.
    pub fn add_documents(&self, docs: &[IndexDocument]) -> Result<usize, SearchError> {
        let writer = self.writer()?;
        for doc in docs {
            writer.update_document(doc)?;
        }
        Ok(docs.len())
    }

    pub fn delete_by_id(&self, id: &str) -> Result<u64, SearchError> {
        Ok(self.writer()?.delete_by_id(id)?)
    }

    pub fn delete_by_query(&self, query: &Query) -> Result<u64, SearchError> {
        Ok(self.writer()?.delete_by_query(query)?)
    }

    /// Commit pending updates and publish them.
    ///
    /// With `open_searcher` a new searcher is warmed and registered in the
    /// background; otherwise only the realtime searcher is refreshed.
    pub fn commit(&self, options: CommitOptions) -> Result<CommitOutcome, SearchError> {
        let commit = {
            let writer = self.writer()?;
            if options.optimize {
                writer.optimize()?
            } else {
                writer.commit()?
            }
        };

        let waiter = if options.open_searcher {
            let request = SearcherRequest::reopen().waiting(options.wait_searcher);
            self.controller.get_searcher_ref(request)?.waiter
        } else {
            let realtime = self.controller.open_new_searcher_ref(true, true)?;
            if let Err(e) = realtime.decrease() {
                warn!(error = %e, "Failed to release realtime searcher");
            }
            None
        };

        info!(
            generation = commit.generation(),
            segments = commit.segment_count(),
            open_searcher = options.open_searcher,
            optimize = options.optimize,
            "Commit complete"
        );
        Ok(CommitOutcome {
            commit: commit.info(),
            waiter,
        })
    }

    /// Merge all segments and commit.
    pub fn optimize(&self) -> Result<CommitOutcome, SearchError> {
        self.commit(CommitOptions {
            optimize: true,
            ..CommitOptions::default()
        })
    }

    /// Discard uncommitted updates.
    pub fn rollback(&self) -> Result<(), SearchError> {
        self.writers.rollback()?;
        Ok(())
    }

    // -- searching --

    /// The registered searcher.
    pub fn searcher(&self) -> Result<SearcherRef, SearchError> {
        self.controller.get_searcher()
    }

    /// The newest searcher; never caches.
    pub fn realtime_searcher(&self) -> Result<SearcherRef, SearchError> {
        self.controller.get_realtime_searcher()
    }

    pub fn search(&self, cmd: &QueryCommand) -> Result<QueryResult, SearchError> {
        self.searcher()?.search(cmd)
    }

    // -- commit points --

    /// Protect `generation` from deletion for at least `duration`.
    pub fn reserve_commit(&self, generation: u64, duration: Duration) {
        self.policy.set_reserve_duration(generation, duration);
    }

    /// Pin `generation` until a matching `release_commit`.
    pub fn save_commit(&self, generation: u64) {
        self.policy.save_commit_point(generation);
    }

    /// Returns false if `generation` was not pinned.
    pub fn release_commit(&self, generation: u64) -> bool {
        self.policy.release_commit_point(generation)
    }

    /// Retained commit points, oldest first.
    pub fn commits(&self) -> Vec<CommitInfo> {
        self.policy.commits()
    }

    pub fn latest_commit(&self) -> Option<CommitInfo> {
        self.policy.latest_commit().map(|c| c.info())
    }

    pub fn stats(&self) -> CoreStats {
        CoreStats {
            path: self.path.clone(),
            first_open: self.first_open,
            searchers: self.controller.stats(),
            writer: self.writers.stats(),
            commits: self.commits(),
        }
    }

    /// Close searchers, then the writer, then the directory. Later calls do nothing.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.controller.close();
        if let Err(e) = self.writers.decrease_ref() {
            error!(error = %e, "Error closing writer manager");
        }
        self.factory.release(&self.path);
        info!(path = ?self.path, "Closed search core");
    }
}

impl Drop for SearchCore {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use searchcore_index::FieldKind;
    use searchcore_types::DeletionPolicyConfig;
    use tempfile::TempDir;

    use crate::filter::Filter;

    fn schema() -> IndexSchema {
        IndexSchema::builder("id")
            .add_field("id", FieldKind::String)
            .add_field("body", FieldKind::Text)
            .add_field("category", FieldKind::String)
            .build()
            .unwrap()
    }

    fn setup_core(temp_dir: &TempDir) -> SearchCore {
        let config = CoreConfig::for_index(temp_dir.path().join("index").display().to_string());
        SearchCore::open(config, schema()).unwrap()
    }

    fn doc(id: u32, category: &str) -> IndexDocument {
        IndexDocument::new()
            .with("id", format!("doc-{id}"))
            .with("body", "searchable text")
            .with("category", category)
    }

    fn commit_and_wait(core: &SearchCore) -> CommitInfo {
        let outcome = core.commit(CommitOptions::default()).unwrap();
        outcome.waiter.unwrap().wait_blocking().unwrap();
        outcome.commit
    }

    #[test]
    fn test_open_empty_index() {
        let temp_dir = TempDir::new().unwrap();
        let core = setup_core(&temp_dir);
        assert!(core.is_first_open());
        assert_eq!(core.searcher().unwrap().num_docs(), 0);
        assert!(core.stats().writer.writer_open);
    }

    #[test]
    fn test_commit_publishes_new_searcher() {
        let temp_dir = TempDir::new().unwrap();
        let core = setup_core(&temp_dir);
        core.add_documents(&[doc(1, "a"), doc(2, "b"), doc(3, "a")]).unwrap();
        commit_and_wait(&core);

        let searcher = core.searcher().unwrap();
        assert_eq!(searcher.num_docs(), 3);
        let result = searcher
            .search(&QueryCommand::new(Query::MatchAll).with_filter(Filter::cached(Query::term("category", "a"))))
            .unwrap();
        assert_eq!(result.doc_list.matches(), 2);
    }

    #[test]
    fn test_add_replaces_by_unique_key_and_delete() {
        let temp_dir = TempDir::new().unwrap();
        let core = setup_core(&temp_dir);
        core.add_document(&doc(1, "a")).unwrap();
        core.add_document(&doc(1, "b")).unwrap();
        core.add_document(&doc(2, "b")).unwrap();
        commit_and_wait(&core);
        assert_eq!(core.searcher().unwrap().num_docs(), 2);

        core.delete_by_id("doc-2").unwrap();
        commit_and_wait(&core);
        let searcher = core.searcher().unwrap();
        assert_eq!(searcher.num_docs(), 1);
        assert_eq!(
            searcher.num_docs_matching(&Query::term("category", "b"), None).unwrap(),
            1
        );
    }

    #[test]
    fn test_commit_without_searcher_refreshes_realtime_only() {
        let temp_dir = TempDir::new().unwrap();
        let core = setup_core(&temp_dir);
        core.add_document(&doc(1, "a")).unwrap();
        let outcome = core
            .commit(CommitOptions {
                open_searcher: false,
                ..CommitOptions::default()
            })
            .unwrap();
        assert!(outcome.waiter.is_none());

        assert_eq!(core.searcher().unwrap().num_docs(), 0);
        assert_eq!(core.realtime_searcher().unwrap().num_docs(), 1);
    }

    #[test]
    fn test_rollback_discards_pending() {
        let temp_dir = TempDir::new().unwrap();
        let core = setup_core(&temp_dir);
        core.add_document(&doc(1, "a")).unwrap();
        core.rollback().unwrap();
        commit_and_wait(&core);
        assert_eq!(core.searcher().unwrap().num_docs(), 0);
        assert_eq!(core.stats().writer.replacements, 1);
    }

    #[test]
    fn test_pinned_commit_survives_retention() {
        let temp_dir = TempDir::new().unwrap();
        let config = CoreConfig::for_index(temp_dir.path().join("index").display().to_string())
            .with_deletion_policy(DeletionPolicyConfig {
                max_commits_to_keep: 1,
                ..DeletionPolicyConfig::default()
            });
        let core = SearchCore::open(config, schema()).unwrap();

        core.add_document(&doc(1, "a")).unwrap();
        let pinned = commit_and_wait(&core);
        core.save_commit(pinned.generation);

        for i in 2..5 {
            core.add_document(&doc(i, "a")).unwrap();
            commit_and_wait(&core);
        }

        let generations: Vec<u64> = core.commits().iter().map(|c| c.generation).collect();
        assert!(generations.contains(&pinned.generation));
        assert_eq!(generations.len(), 2);

        assert!(core.release_commit(pinned.generation));
        core.add_document(&doc(9, "a")).unwrap();
        commit_and_wait(&core);
        assert_eq!(core.commits().len(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let core = setup_core(&temp_dir);
        core.close();
        core.close();
        assert!(matches!(core.searcher(), Err(SearchError::ControllerClosed)));
        assert!(core.stats().writer.closed);
    }
}
