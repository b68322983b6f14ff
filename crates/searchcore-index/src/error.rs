//! Index error types.

use searchcore_types::CoreError;
use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Tantivy index error
    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Index not found
    #[error("Index not found at path: {0}")]
    IndexNotFound(String),

    /// Index is locked (another writer has it open)
    #[error("Index is locked: {0}")]
    IndexLocked(String),

    /// Schema mismatch
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Query cannot be expressed against this schema
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Document cannot be converted for this schema
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// The writer was closed and cannot accept updates
    #[error("Index writer is closed")]
    WriterClosed,

    /// The writer manager was shut down
    #[error("Writer manager is closed")]
    ManagerClosed,

    #[error(transparent)]
    Core(#[from] CoreError),
}
