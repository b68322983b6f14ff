//! # searchcore-types
//!
//! Shared building blocks for the searchcore workspace.
//!
//! This crate holds the pieces every other crate depends on:
//! - `RefCounted`: an explicitly counted handle that runs a release action exactly once
//! - `CoreConfig`: layered configuration for a search core
//! - `CoreError`: errors raised by the shared types
//!
//! ## Usage
//!
//! ```rust
//! use searchcore_types::RefCounted;
//!
//! let handle = RefCounted::new(42u32, |_| Ok(()));
//! assert_eq!(*handle.get().unwrap(), 42);
//! handle.decrease().unwrap();
//! assert!(handle.is_released());
//! ```

pub mod config;
pub mod error;
pub mod refcount;

pub use config::{
    AutowarmCount, CacheConfig, CoreConfig, DeletionPolicyConfig, DEFAULT_WINDOW_SIZE,
};
pub use error::CoreError;
pub use refcount::{RefCounted, RefGuard, ReleaseError, WeakRefCounted};
