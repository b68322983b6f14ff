//! Error types shared across the searchcore crates.

use thiserror::Error;

/// Errors raised by the shared types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration could not be loaded or failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// A handle was used after its reference count reached zero
    #[error("Resource already released: {0}")]
    AlreadyReleased(String),

    /// More decrements than increments were issued against a handle
    #[error("Reference count underflow: {0}")]
    RefCountUnderflow(String),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
