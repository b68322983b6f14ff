//! searchcore
//!
//! Drive a search core from the command line.
//!
//! # Usage
//!
//! ```bash
//! searchcore index docs.jsonl [--no-open-searcher] [--optimize]
//! searchcore search 'title:rust -category:merch' --filter 'year:[2020 TO *]' --sort price:desc
//! searchcore stats
//! searchcore shell < commands.txt
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/searchcore/config.toml)
//! 3. Environment variables (SEARCHCORE_*)
//! 4. CLI flags

use std::path::Path;

use anyhow::Result;
use clap::Parser;
use serde::Serialize;

use searchcore_daemon::{
    delete, index_file, init_logging, load_config, load_schema, open_core, optimize, run_shell,
    search, snapshot, Cli, Commands,
};

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(
        cli.config.as_deref(),
        cli.index_path.as_deref(),
        cli.log_level.as_deref(),
    )?;
    init_logging(&config.log_level)?;
    let schema = load_schema(cli.schema.as_deref())?;
    let core = open_core(config, schema)?;

    let outcome = match cli.command {
        Commands::Index {
            file,
            batch_size,
            commit,
        } => print_json(&index_file(&core, Path::new(&file), batch_size, &commit).await?),
        Commands::Delete { ids, query } => print_json(&delete(&core, &ids, query.as_deref()).await?),
        Commands::Search(args) => print_json(&search(&core, &args)?),
        Commands::Optimize => print_json(&optimize(&core).await?),
        Commands::Stats => print_json(&core.stats()),
        Commands::Commits => print_json(&core.commits()),
        Commands::Snapshot => print_json(&snapshot(&core)?),
        Commands::Shell => run_shell(&core).await,
    };

    core.close();
    outcome
}
