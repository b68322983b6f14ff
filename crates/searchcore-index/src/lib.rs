//! # searchcore-index
//!
//! Storage-side half of a search core, built on Tantivy.
//!
//! Provides:
//! - `DirectoryFactory`: shared, reference-counted access to index directories
//! - `IndexSchema` and `IndexDocument`: typed schema and document model
//! - `Query`: a hashable query description usable as a cache key
//! - `ReservingDeletionPolicy`: commit retention with pins and timed reservations
//! - `CoreIndexWriter`: a writer that records commit points
//! - `WriterLifecycleManager`: counted writer borrows with pause and replace
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use searchcore_index::{DirectoryFactory, IndexSchema, FieldKind};
//!
//! let schema = IndexSchema::builder("id")
//!     .add_field("id", FieldKind::String)
//!     .add_field("title", FieldKind::Text)
//!     .build()
//!     .unwrap();
//! let factory = Arc::new(DirectoryFactory::mmap());
//! let opened = factory.get("/tmp/index".as_ref(), &schema).unwrap();
//! ```

pub mod commit;
pub mod deletion_policy;
pub mod directory;
pub mod error;
pub mod query;
pub mod schema;
pub mod writer;
pub mod writer_state;

pub use commit::{CommitInfo, CommitPoint};
pub use deletion_policy::{
    IndexCommit, IndexDeletionPolicy, ReservingDeletionPolicy, RetentionPolicy,
};
pub use directory::{DirectoryFactory, DirectoryKind, OpenedIndex, WRITER_LOCK_FILE};
pub use error::IndexError;
pub use query::{Query, RangeBound};
pub use schema::{FieldKind, FieldSpec, FieldValue, IndexDocument, IndexSchema, SchemaSpec};
pub use writer::{CoreIndexWriter, WriterStats};
pub use writer_state::{WriterLifecycleManager, WriterManagerStats, WriterRef};
