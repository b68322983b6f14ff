//! searchcore binary library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations
//! - `parse`: Query and sort syntax

pub mod cli;
pub mod commands;
pub mod parse;

pub use cli::{Cli, CommitArgs, Commands, SearchArgs, ShellCommands, ShellLine};
pub use commands::{
    default_schema, delete, index_file, init_logging, load_config, load_schema, open_core,
    optimize, run_shell, search, snapshot,
};
