//! Command implementations for the searchcore binary.
//!
//! Handlers return serializable values; `main` prints them as JSON.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};

use searchcore_index::{CommitInfo, FieldKind, FieldSpec, FieldValue, IndexDocument, IndexSchema, SchemaSpec};
use searchcore_search::filter::POST_FILTER_COST;
use searchcore_search::{CommitOptions, Filter, QueryCommand, SearchCore};
use searchcore_types::CoreConfig;

use crate::cli::{CommitArgs, SearchArgs, ShellCommands, ShellLine};
use crate::parse::{parse_query, parse_sort, split_line};

/// Load layered configuration and apply CLI overrides.
pub fn load_config(
    config_path: Option<&str>,
    index_path: Option<&str>,
    log_level: Option<&str>,
) -> Result<CoreConfig> {
    let mut config = CoreConfig::load(config_path).context("Failed to load configuration")?;
    if let Some(path) = index_path {
        config.index_path = path.to_string();
    }
    if let Some(level) = log_level {
        config.log_level = level.to_string();
    }
    Ok(config)
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `level`.
pub fn init_logging(level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Schema used when none is given.
pub fn default_schema() -> Result<IndexSchema> {
    let schema = IndexSchema::builder("id")
        .add_field("id", FieldKind::String)
        .add_field("title", FieldKind::Text)
        .add_field("body", FieldKind::Text)
        .add_field("category", FieldKind::String)
        .add_field_spec(FieldSpec::new("price", FieldKind::U64))
        .add_field_spec(FieldSpec::new("year", FieldKind::I64))
        .build()?;
    Ok(schema)
}

/// Read a JSON `SchemaSpec`, or fall back to the default schema.
pub fn load_schema(path: Option<&str>) -> Result<IndexSchema> {
    let Some(path) = path else {
        return default_schema();
    };
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read schema {path}"))?;
    let spec: SchemaSpec = serde_json::from_str(&raw).with_context(|| format!("Invalid schema {path}"))?;
    Ok(IndexSchema::from_spec(&spec)?)
}

pub fn open_core(config: CoreConfig, schema: IndexSchema) -> Result<SearchCore> {
    info!(index_path = %config.index_path, "Opening search core");
    SearchCore::open(config, schema).context("Failed to open search core")
}

async fn commit(core: &SearchCore, args: &CommitArgs) -> Result<CommitInfo> {
    let outcome = core.commit(CommitOptions {
        open_searcher: !args.no_open_searcher,
        wait_searcher: !args.no_wait,
        optimize: args.optimize,
    })?;
    if let Some(waiter) = outcome.waiter {
        waiter.wait().await?;
    }
    Ok(outcome.commit)
}

#[derive(Debug, Serialize)]
pub struct IndexReport {
    pub indexed: usize,
    pub skipped: usize,
    pub commit: CommitInfo,
}

/// Add every document in a JSON-lines file, then commit once.
pub async fn index_file(core: &SearchCore, path: &Path, batch_size: usize, args: &CommitArgs) -> Result<IndexReport> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut batch = Vec::with_capacity(batch_size.max(1));
    let mut indexed = 0;
    let mut skipped = 0;

    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<IndexDocument>(&line) {
            Ok(doc) => batch.push(doc),
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "Skipping malformed document");
                skipped += 1;
                continue;
            }
        }
        if batch.len() >= batch_size.max(1) {
            indexed += core.add_documents(&batch)?;
            batch.clear();
        }
    }
    if !batch.is_empty() {
        indexed += core.add_documents(&batch)?;
    }

    let commit = commit(core, args).await?;
    info!(indexed, skipped, generation = commit.generation, "Indexed file");
    Ok(IndexReport {
        indexed,
        skipped,
        commit,
    })
}

/// Delete by ids and/or query, then commit.
pub async fn delete(core: &SearchCore, ids: &[String], query: Option<&str>) -> Result<CommitInfo> {
    if ids.is_empty() && query.is_none() {
        bail!("Nothing to delete: give --id or --query");
    }
    for id in ids {
        core.delete_by_id(id)?;
    }
    if let Some(query) = query {
        core.delete_by_query(&parse_query(query, core.schema())?)?;
    }
    commit(core, &CommitArgs::default()).await
}

#[derive(Debug, Serialize)]
pub struct SearchHit {
    pub doc: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    pub fields: IndexDocument,
}

#[derive(Debug, Serialize)]
pub struct FacetCount {
    pub value: FieldValue,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct SearchReport {
    pub searcher: String,
    pub generation: u64,
    pub matches: usize,
    pub offset: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_score: Option<f32>,
    pub partial: bool,
    pub docs: Vec<SearchHit>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub facets: BTreeMap<String, Vec<FacetCount>>,
}

pub fn search(core: &SearchCore, args: &SearchArgs) -> Result<SearchReport> {
    let schema = core.schema();
    let mut cmd = QueryCommand::new(parse_query(&args.query, schema)?).with_window(args.offset, args.rows);
    for filter in &args.filters {
        cmd = cmd.with_filter(Filter::cached(parse_query(filter, schema)?));
    }
    for filter in &args.post_filters {
        cmd = cmd.with_filter(Filter::uncached(parse_query(filter, schema)?, POST_FILTER_COST));
    }
    if let Some(sort) = &args.sort {
        cmd = cmd.with_sort(parse_sort(sort)?);
    }
    if let Some(ms) = args.time_allowed_ms {
        cmd = cmd.with_time_allowed(Duration::from_millis(ms));
    }
    if args.scores {
        cmd = cmd.with_scores();
    }
    if args.facet.is_some() {
        cmd = cmd.with_doc_set();
    }
    if args.no_cache {
        cmd = cmd.no_cache();
    }

    let searcher = if args.realtime {
        core.realtime_searcher()?
    } else {
        core.searcher()?
    };
    let result = searcher.search(&cmd)?;

    let only: Option<HashSet<String>> = args.fields.as_ref().map(|fields| {
        fields
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(String::from)
            .collect()
    });
    let mut docs = Vec::with_capacity(result.doc_list.len());
    for (doc, score) in result.doc_list.iter() {
        let stored = match &only {
            Some(fields) => searcher.doc_fields(doc, fields)?,
            None => searcher.doc(doc)?,
        };
        docs.push(SearchHit {
            doc,
            score,
            fields: (*stored).clone(),
        });
    }

    let mut facets = BTreeMap::new();
    if let (Some(field), Some(set)) = (&args.facet, &result.doc_set) {
        let counts = searcher
            .facet_counts(field, set)?
            .into_iter()
            .map(|(value, count)| FacetCount { value, count })
            .collect();
        facets.insert(field.clone(), counts);
    }

    Ok(SearchReport {
        searcher: searcher.name().to_string(),
        generation: searcher.generation(),
        matches: result.doc_list.matches(),
        offset: result.doc_list.offset(),
        max_score: result.doc_list.max_score(),
        partial: result.partial,
        docs,
        facets,
    })
}

pub async fn optimize(core: &SearchCore) -> Result<CommitInfo> {
    commit(
        core,
        &CommitArgs {
            optimize: true,
            ..CommitArgs::default()
        },
    )
    .await
}

#[derive(Debug, Serialize)]
pub struct SnapshotReport {
    pub commit: CommitInfo,
    pub snapshot_docs: u64,
    pub snapshot_segments: usize,
}

/// Pin the newest commit, read its point-in-time state, then unpin it.
pub fn snapshot(core: &SearchCore) -> Result<SnapshotReport> {
    let Some(latest) = core.deletion_policy().latest_commit() else {
        bail!("No commit points are retained");
    };
    let generation = latest.generation();
    core.save_commit(generation);

    let report = match latest.snapshot() {
        Some(reader) => Ok(SnapshotReport {
            commit: latest.info(),
            snapshot_docs: reader.num_docs(),
            snapshot_segments: reader.segment_readers().len(),
        }),
        None => Err(anyhow::anyhow!("Commit {generation} has no readable snapshot")),
    };

    core.release_commit(generation);
    report
}

enum ShellOutcome {
    Output(String),
    Quit,
}

async fn execute_shell(core: &SearchCore, command: ShellCommands) -> Result<ShellOutcome> {
    let output = match command {
        ShellCommands::Add { json } => {
            let doc: IndexDocument = serde_json::from_str(&json).context("Invalid document")?;
            let opstamp = core.add_document(&doc)?;
            format!("added (opstamp {opstamp})")
        }
        ShellCommands::Delete { id } => {
            let opstamp = core.delete_by_id(&id)?;
            format!("deleted (opstamp {opstamp})")
        }
        ShellCommands::Search(args) => serde_json::to_string_pretty(&search(core, &args)?)?,
        ShellCommands::Commit(args) => serde_json::to_string_pretty(&commit(core, &args).await?)?,
        ShellCommands::Rollback => {
            core.rollback()?;
            "rolled back".to_string()
        }
        ShellCommands::Pin { generation } => {
            core.save_commit(generation);
            format!("pinned {generation}")
        }
        ShellCommands::Release { generation } => {
            if core.release_commit(generation) {
                format!("released {generation}")
            } else {
                format!("{generation} was not pinned")
            }
        }
        ShellCommands::Reserve { generation, secs } => {
            core.reserve_commit(generation, Duration::from_secs(secs));
            format!("reserved {generation} for {secs}s")
        }
        ShellCommands::Commits => serde_json::to_string_pretty(&core.commits())?,
        ShellCommands::Stats => serde_json::to_string_pretty(&core.stats())?,
        ShellCommands::Quit => return Ok(ShellOutcome::Quit),
    };
    Ok(ShellOutcome::Output(output))
}

/// Execute commands read line by line from stdin until EOF or `quit`.
pub async fn run_shell(core: &SearchCore) -> Result<()> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    // Cancelled once the writer manager has shut down
    let shutdown = core.writers().recovery_token();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = shutdown.cancelled() => {
                warn!("Index writer shut down, leaving shell");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        let words = match split_line(&line) {
            Ok(words) if words.is_empty() => continue,
            Ok(words) => words,
            Err(e) => {
                eprintln!("error: {e:#}");
                continue;
            }
        };
        let parsed = match ShellLine::try_parse_from(words) {
            Ok(parsed) => parsed,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };
        match execute_shell(core, parsed.command).await {
            Ok(ShellOutcome::Output(out)) => println!("{out}"),
            Ok(ShellOutcome::Quit) => break,
            Err(e) => eprintln!("error: {e:#}"),
        }
    }
    Ok(())
}
