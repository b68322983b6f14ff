//! Search error types.

use searchcore_index::IndexError;
use searchcore_types::CoreError;
use thiserror::Error;

/// Errors that can occur during search operations.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Too many searchers are opening at once; retry later
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Tantivy index error
    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The searcher was closed
    #[error("Searcher is closed: {0}")]
    SearcherClosed(String),

    /// The searcher controller was closed
    #[error("Searcher controller is closed")]
    ControllerClosed,

    /// The warm queue no longer accepts tasks
    #[error("Executor is shut down: {0}")]
    ExecutorClosed(String),

    /// Document not found
    #[error("Document not found: {0}")]
    DocumentNotFound(u32),

    /// Sorting or faceting on a field without columnar values
    #[error("Field is not a fast numeric field: {0}")]
    NotFastField(String),

    /// The registration task was dropped before completing
    #[error("Searcher registration was abandoned")]
    RegistrationAbandoned,
}

impl SearchError {
    /// True when the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SearchError::ServiceUnavailable(_))
    }
}
