//! CLI argument parsing for the searchcore binary.
//!
//! Global flags override the layered configuration.

use clap::{Args, Parser, Subcommand};

/// searchcore
///
/// Index JSON documents and search them with cached, warmed searchers.
#[derive(Parser, Debug)]
#[command(name = "searchcore")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/searchcore/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override index directory
    #[arg(long, global = true)]
    pub index_path: Option<String>,

    /// Schema declaration as JSON (default: id, title, body, category, price, year)
    #[arg(long, global = true)]
    pub schema: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index documents from a JSON-lines file and commit
    Index {
        /// File with one JSON object per line
        file: String,

        /// Documents per writer borrow
        #[arg(long, default_value = "500")]
        batch_size: usize,

        #[command(flatten)]
        commit: CommitArgs,
    },

    /// Delete documents and commit
    Delete {
        /// Unique key of a document to delete (repeatable)
        #[arg(long = "id")]
        ids: Vec<String>,

        /// Delete everything matching this query
        #[arg(short, long)]
        query: Option<String>,
    },

    /// Run a query
    Search(SearchArgs),

    /// Merge the index into a single segment
    Optimize,

    /// Show searcher, cache and writer statistics
    Stats,

    /// List retained commit points
    Commits,

    /// Pin the latest commit and report its point-in-time contents
    Snapshot,

    /// Read commands from stdin against one open core
    Shell,
}

#[derive(Args, Debug, Clone, Default)]
pub struct CommitArgs {
    /// Commit without opening a new searcher
    #[arg(long)]
    pub no_open_searcher: bool,

    /// Return before the new searcher is registered
    #[arg(long)]
    pub no_wait: bool,

    /// Merge into one segment while committing
    #[arg(long)]
    pub optimize: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    /// Query: `field:value` clauses, `*:*`, `-field:value`, `field:[lo TO hi]`, or JSON
    pub query: String,

    /// Cached filter query (repeatable)
    #[arg(short = 'f', long = "filter")]
    pub filters: Vec<String>,

    /// Uncached filter checked per hit (repeatable)
    #[arg(long = "post-filter")]
    pub post_filters: Vec<String>,

    /// Sort keys: `score`, `index`, or `field:asc|desc`, comma separated
    #[arg(short, long)]
    pub sort: Option<String>,

    #[arg(long, default_value = "0")]
    pub offset: usize,

    #[arg(short, long, default_value = "10")]
    pub rows: usize,

    /// Stop collecting after this many milliseconds
    #[arg(long)]
    pub time_allowed_ms: Option<u64>,

    /// Include scores
    #[arg(long)]
    pub scores: bool,

    /// Count values of this fast field over all matches
    #[arg(long)]
    pub facet: Option<String>,

    /// Only load these stored fields, comma separated
    #[arg(long)]
    pub fields: Option<String>,

    /// Bypass the result cache
    #[arg(long)]
    pub no_cache: bool,

    /// Search the realtime searcher instead of the registered one
    #[arg(long)]
    pub realtime: bool,
}

/// One line of `searchcore shell` input.
#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_help_flag = true)]
pub struct ShellLine {
    #[command(subcommand)]
    pub command: ShellCommands,
}

#[derive(Subcommand, Debug)]
pub enum ShellCommands {
    /// Add one JSON document
    Add { json: String },
    Delete {
        id: String,
    },
    Search(SearchArgs),
    Commit(CommitArgs),
    Rollback,
    /// Pin a commit generation
    Pin { generation: u64 },
    Release { generation: u64 },
    /// Keep a commit generation for a number of seconds
    Reserve { generation: u64, secs: u64 },
    Commits,
    Stats,
    #[command(alias = "exit")]
    Quit,
}
