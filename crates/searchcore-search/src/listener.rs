//! Callbacks run on a new searcher before it is registered.

use tracing::{debug, warn};

use crate::command::QueryCommand;
use crate::error::SearchError;
use crate::searcher::Searcher;

/// Observes searcher generations.
///
/// Listeners run on the warm executor after cache autowarming and before
/// registration. A failing listener is logged and does not block
/// registration.
pub trait SearcherEventListener: Send + Sync {
    fn name(&self) -> &str {
        "listener"
    }

    /// `current` is the registered searcher being replaced, if any.
    fn new_searcher(&self, new: &Searcher, current: Option<&Searcher>) -> Result<(), SearchError>;
}

/// Runs a fixed list of searches against each new searcher so its caches
/// hold the common queries before it serves traffic.
#[derive(Debug, Clone, Default)]
pub struct QueryWarmingListener {
    commands: Vec<QueryCommand>,
    load_docs: bool,
}

impl QueryWarmingListener {
    pub fn new(commands: Vec<QueryCommand>) -> Self {
        Self {
            commands,
            load_docs: true,
        }
    }

    /// Also fetch the stored documents of each result window.
    pub fn with_load_docs(mut self, load_docs: bool) -> Self {
        self.load_docs = load_docs;
        self
    }

    pub fn commands(&self) -> &[QueryCommand] {
        &self.commands
    }
}

impl SearcherEventListener for QueryWarmingListener {
    fn name(&self) -> &str {
        "QueryWarmingListener"
    }

    fn new_searcher(&self, new: &Searcher, _current: Option<&Searcher>) -> Result<(), SearchError> {
        let mut failures = 0usize;
        for cmd in &self.commands {
            let result = new.search(cmd).and_then(|result| {
                if self.load_docs {
                    for &doc in result.doc_list.docs() {
                        new.doc(doc)?;
                    }
                }
                Ok(())
            });
            if let Err(e) = result {
                failures += 1;
                warn!(searcher = %new.name(), query = %cmd.query, error = %e, "Warming query failed");
            }
        }
        debug!(
            searcher = %new.name(),
            queries = self.commands.len(),
            failures,
            "Ran warming queries"
        );
        Ok(())
    }
}
