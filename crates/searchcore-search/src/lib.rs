//! # searchcore-search
//!
//! Search-side half of a search core.
//!
//! Provides:
//! - `Searcher`: a point-in-time view of the index with its own caches
//! - `SearcherCaches`: filter, result, document and field-value caches with autowarming
//! - `SearcherController`: opens, warms, registers and retires searchers
//! - `SearchCore`: one index with its writer, retention policy and searchers
//!
//! ## Usage
//!
//! ```rust,no_run
//! use searchcore_index::{FieldKind, IndexDocument, IndexSchema, Query};
//! use searchcore_search::{CommitOptions, QueryCommand, SearchCore};
//! use searchcore_types::CoreConfig;
//!
//! let schema = IndexSchema::builder("id")
//!     .add_field("id", FieldKind::String)
//!     .add_field("body", FieldKind::Text)
//!     .build()
//!     .unwrap();
//! let core = SearchCore::open(CoreConfig::for_index("/tmp/index"), schema).unwrap();
//!
//! core.add_document(&IndexDocument::new().with("id", "1").with("body", "hello")).unwrap();
//! let outcome = core.commit(CommitOptions::default()).unwrap();
//! if let Some(waiter) = outcome.waiter {
//!     waiter.wait_blocking().unwrap();
//! }
//!
//! let result = core.search(&QueryCommand::new(Query::term("body", "hello"))).unwrap();
//! println!("{} matches", result.doc_list.matches());
//! ```

pub mod cache;
pub mod collector;
pub mod command;
pub mod controller;
pub mod doclist;
pub mod docset;
pub mod error;
pub mod executor;
pub mod field_values;
pub mod filter;
pub mod listener;
pub mod search_core;
pub mod searcher;
pub mod sort;
pub mod view;

pub use cache::{CacheState, CacheStats, SearchCache, SearcherCaches, UserRegenerator, UserValue};
pub use command::{QueryCommand, QueryFlags, QueryResult, QueryResultKey};
pub use controller::{
    ControllerStats, RegistrationWaiter, SearcherController, SearcherHandle, SearcherRef,
    SearcherRequest, SearcherResponse,
};
pub use doclist::DocList;
pub use docset::DocSet;
pub use error::SearchError;
pub use executor::SerialExecutor;
pub use field_values::UninvertedField;
pub use filter::Filter;
pub use listener::{QueryWarmingListener, SearcherEventListener};
pub use search_core::{CommitOptions, CommitOutcome, CoreStats, SearchCore, SearchCoreBuilder};
pub use searcher::{Searcher, SearcherOptions, SearcherStats};
pub use sort::{SortKey, SortSpec};
