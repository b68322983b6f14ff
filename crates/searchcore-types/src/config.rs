//! Configuration loading for a search core.
//!
//! Layered precedence, lowest first:
//! - built-in defaults
//! - config file at `~/.config/searchcore/config.toml`
//! - a config file named on the command line
//! - environment variables (`SEARCHCORE_*`, nested keys joined with `__`)
//!
//! CLI flags are applied by the caller after loading.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Default query result window size.
pub const DEFAULT_WINDOW_SIZE: usize = 20;

/// How many entries of an old cache are regenerated into its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawAutowarm", into = "RawAutowarm")]
pub enum AutowarmCount {
    /// A fixed number of most recently used entries
    Entries(usize),
    /// A percentage of the old cache's size
    Percent(u8),
}

impl AutowarmCount {
    /// Number of entries to regenerate from a cache holding `old_len` entries.
    pub fn resolve(&self, old_len: usize) -> usize {
        match *self {
            AutowarmCount::Entries(n) => n.min(old_len),
            AutowarmCount::Percent(pct) => old_len * usize::from(pct) / 100,
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, AutowarmCount::Entries(0) | AutowarmCount::Percent(0))
    }
}

impl Default for AutowarmCount {
    fn default() -> Self {
        AutowarmCount::Entries(0)
    }
}

impl fmt::Display for AutowarmCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutowarmCount::Entries(n) => write!(f, "{n}"),
            AutowarmCount::Percent(p) => write!(f, "{p}%"),
        }
    }
}

impl FromStr for AutowarmCount {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(pct) = trimmed.strip_suffix('%') {
            let pct: u8 = pct.trim().parse().map_err(|_| {
                CoreError::InvalidInput(format!("invalid autowarm percentage: {s}"))
            })?;
            if pct > 100 {
                return Err(CoreError::InvalidInput(format!(
                    "autowarm percentage must be 0-100, got {pct}"
                )));
            }
            return Ok(AutowarmCount::Percent(pct));
        }
        trimmed
            .parse()
            .map(AutowarmCount::Entries)
            .map_err(|_| CoreError::InvalidInput(format!("invalid autowarm count: {s}")))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawAutowarm {
    Count(usize),
    Text(String),
}

impl TryFrom<RawAutowarm> for AutowarmCount {
    type Error = CoreError;

    fn try_from(raw: RawAutowarm) -> Result<Self, Self::Error> {
        match raw {
            RawAutowarm::Count(n) => Ok(AutowarmCount::Entries(n)),
            RawAutowarm::Text(s) => s.parse(),
        }
    }
}

impl From<AutowarmCount> for RawAutowarm {
    fn from(count: AutowarmCount) -> Self {
        match count {
            AutowarmCount::Entries(n) => RawAutowarm::Count(n),
            AutowarmCount::Percent(_) => RawAutowarm::Text(count.to_string()),
        }
    }
}

/// Settings for one cache in a searcher's cache tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of entries
    #[serde(default = "default_cache_size")]
    pub size: usize,

    /// Entries regenerated from the previous searcher's cache
    #[serde(default)]
    pub autowarm_count: AutowarmCount,
}

fn default_true() -> bool {
    true
}

fn default_cache_size() -> usize {
    512
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            size: default_cache_size(),
            autowarm_count: AutowarmCount::default(),
        }
    }
}

impl CacheConfig {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_autowarm(mut self, autowarm_count: AutowarmCount) -> Self {
        self.autowarm_count = autowarm_count;
        self
    }
}

/// Which commit points survive each commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionPolicyConfig {
    /// Newest commits kept regardless of shape
    #[serde(default = "default_max_commits_to_keep")]
    pub max_commits_to_keep: usize,

    /// Single-segment commits kept beyond `max_commits_to_keep`
    #[serde(default)]
    pub max_optimized_commits_to_keep: usize,

    /// Commits older than this are deleted even when within the counts
    #[serde(default)]
    pub max_commit_age_secs: Option<u64>,
}

fn default_max_commits_to_keep() -> usize {
    1
}

impl Default for DeletionPolicyConfig {
    fn default() -> Self {
        Self {
            max_commits_to_keep: default_max_commits_to_keep(),
            max_optimized_commits_to_keep: 0,
            max_commit_age_secs: None,
        }
    }
}

/// Main search core settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Index directory
    #[serde(default = "default_index_path")]
    pub index_path: String,

    /// Indexing memory budget for the writer, in megabytes
    #[serde(default = "default_writer_memory_mb")]
    pub writer_memory_mb: usize,

    /// Indexing threads per writer
    #[serde(default = "default_writer_threads")]
    pub writer_threads: usize,

    /// Upper bound on searchers opening or warming at once
    #[serde(default = "default_max_warming_searchers")]
    pub max_warming_searchers: usize,

    /// Register the first searcher before its listeners run
    #[serde(default)]
    pub use_cold_searcher: bool,

    /// Result lists are cached in multiples of this many documents
    #[serde(default = "default_window_size")]
    pub query_result_window_size: usize,

    /// Result lists longer than this are never cached
    #[serde(default = "default_max_docs_cached")]
    pub query_result_max_docs_cached: usize,

    /// Materialize only requested fields for uncached documents
    #[serde(default = "default_true")]
    pub enable_lazy_field_loading: bool,

    /// Reopen searchers from the live writer's reader instead of a fresh one
    #[serde(default = "default_true")]
    pub nrt_reopen: bool,

    /// Remove a leftover writer lock when opening
    #[serde(default)]
    pub unlock_on_startup: bool,

    /// Grace period for the warm queue to drain on close
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_filter_cache")]
    pub filter_cache: CacheConfig,

    #[serde(default = "default_query_result_cache")]
    pub query_result_cache: CacheConfig,

    #[serde(default)]
    pub document_cache: CacheConfig,

    #[serde(default = "default_field_value_cache")]
    pub field_value_cache: CacheConfig,

    /// Named caches for embedding code
    #[serde(default)]
    pub user_caches: BTreeMap<String, CacheConfig>,

    #[serde(default)]
    pub deletion_policy: DeletionPolicyConfig,
}

fn default_index_path() -> String {
    ProjectDirs::from("", "", "searchcore")
        .map(|p| p.data_local_dir().join("index"))
        .unwrap_or_else(|| PathBuf::from("./index"))
        .to_string_lossy()
        .to_string()
}

fn default_writer_memory_mb() -> usize {
    50
}

fn default_writer_threads() -> usize {
    1
}

fn default_max_warming_searchers() -> usize {
    2
}

fn default_window_size() -> usize {
    DEFAULT_WINDOW_SIZE
}

fn default_max_docs_cached() -> usize {
    200
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_filter_cache() -> CacheConfig {
    CacheConfig::new(512).with_autowarm(AutowarmCount::Entries(128))
}

fn default_query_result_cache() -> CacheConfig {
    CacheConfig::new(512).with_autowarm(AutowarmCount::Entries(64))
}

fn default_field_value_cache() -> CacheConfig {
    CacheConfig::new(64).with_autowarm(AutowarmCount::Percent(100))
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            index_path: default_index_path(),
            writer_memory_mb: default_writer_memory_mb(),
            writer_threads: default_writer_threads(),
            max_warming_searchers: default_max_warming_searchers(),
            use_cold_searcher: false,
            query_result_window_size: default_window_size(),
            query_result_max_docs_cached: default_max_docs_cached(),
            enable_lazy_field_loading: true,
            nrt_reopen: true,
            unlock_on_startup: false,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            log_level: default_log_level(),
            filter_cache: default_filter_cache(),
            query_result_cache: default_query_result_cache(),
            document_cache: CacheConfig::default(),
            field_value_cache: default_field_value_cache(),
            user_caches: BTreeMap::new(),
            deletion_policy: DeletionPolicyConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/searchcore/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (SEARCHCORE_*)
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, CoreError> {
        let config_dir = ProjectDirs::from("", "", "searchcore")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("index_path", default_index_path())
            .map_err(|e| CoreError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| CoreError::Config(e.to_string()))?
            .set_default(
                "max_warming_searchers",
                default_max_warming_searchers() as i64,
            )
            .map_err(|e| CoreError::Config(e.to_string()))?
            .set_default("query_result_window_size", default_window_size() as i64)
            .map_err(|e| CoreError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // SEARCHCORE_MAX_WARMING_SEARCHERS, SEARCHCORE_FILTER_CACHE__SIZE, ...
        builder = builder.add_source(
            Environment::with_prefix("SEARCHCORE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        let settings: CoreConfig = config
            .try_deserialize()
            .map_err(|e| CoreError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Settings for an index at `path`, everything else defaulted.
    pub fn for_index(path: impl Into<String>) -> Self {
        Self {
            index_path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_max_warming_searchers(mut self, max: usize) -> Self {
        self.max_warming_searchers = max;
        self
    }

    pub fn with_cold_searcher(mut self, use_cold_searcher: bool) -> Self {
        self.use_cold_searcher = use_cold_searcher;
        self
    }

    pub fn with_deletion_policy(mut self, policy: DeletionPolicyConfig) -> Self {
        self.deletion_policy = policy;
        self
    }

    pub fn with_user_cache(mut self, name: impl Into<String>, cache: CacheConfig) -> Self {
        self.user_caches.insert(name.into(), cache);
        self
    }

    /// Expand ~ in index_path to the home directory
    pub fn expanded_index_path(&self) -> PathBuf {
        if let Some(rest) = self.index_path.strip_prefix("~/") {
            if let Some(home) = std::env::var_os("HOME") {
                return PathBuf::from(home).join(rest);
            }
        }
        PathBuf::from(&self.index_path)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_warming_searchers == 0 {
            return Err(CoreError::Config(
                "max_warming_searchers must be > 0".to_string(),
            ));
        }
        if self.query_result_window_size == 0 {
            return Err(CoreError::Config(
                "query_result_window_size must be > 0".to_string(),
            ));
        }
        if self.writer_memory_mb == 0 {
            return Err(CoreError::Config("writer_memory_mb must be > 0".to_string()));
        }
        if self.writer_threads == 0 {
            return Err(CoreError::Config("writer_threads must be > 0".to_string()));
        }
        let named = [
            ("filter_cache", &self.filter_cache),
            ("query_result_cache", &self.query_result_cache),
            ("document_cache", &self.document_cache),
            ("field_value_cache", &self.field_value_cache),
        ];
        for (name, cache) in named
            .into_iter()
            .chain(self.user_caches.iter().map(|(n, c)| (n.as_str(), c)))
        {
            if cache.enabled && cache.size == 0 {
                return Err(CoreError::Config(format!(
                    "{name}: size must be > 0 when enabled"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = CoreConfig::default();
        assert_eq!(config.max_warming_searchers, 2);
        assert_eq!(config.query_result_window_size, 20);
        assert_eq!(config.query_result_max_docs_cached, 200);
        assert!(!config.use_cold_searcher);
        assert!(config.enable_lazy_field_loading);
        assert_eq!(config.deletion_policy.max_commits_to_keep, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_with_defaults() {
        let config = CoreConfig::load(None).unwrap();
        assert!(config.max_warming_searchers > 0);
    }

    #[test]
    fn test_autowarm_parse() {
        assert_eq!("16".parse::<AutowarmCount>().unwrap(), AutowarmCount::Entries(16));
        assert_eq!("50%".parse::<AutowarmCount>().unwrap(), AutowarmCount::Percent(50));
        assert!("150%".parse::<AutowarmCount>().is_err());
        assert!("lots".parse::<AutowarmCount>().is_err());
    }

    #[test]
    fn test_autowarm_resolve() {
        assert_eq!(AutowarmCount::Entries(10).resolve(4), 4);
        assert_eq!(AutowarmCount::Entries(10).resolve(40), 10);
        assert_eq!(AutowarmCount::Percent(50).resolve(40), 20);
        assert_eq!(AutowarmCount::Percent(100).resolve(7), 7);
        assert!(AutowarmCount::Percent(0).is_disabled());
    }

    #[test]
    fn test_cache_config_from_json() {
        let json = r#"{"size": 64, "autowarm_count": "25%"}"#;
        let cache: CacheConfig = serde_json::from_str(json).unwrap();
        assert!(cache.enabled);
        assert_eq!(cache.size, 64);
        assert_eq!(cache.autowarm_count, AutowarmCount::Percent(25));

        let json = r#"{"autowarm_count": 8}"#;
        let cache: CacheConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cache.autowarm_count, AutowarmCount::Entries(8));
    }

    #[test]
    fn test_validate_rejects_zero_bounds() {
        let config = CoreConfig::default().with_max_warming_searchers(0);
        assert!(config.validate().is_err());

        let mut config = CoreConfig::default();
        config.filter_cache.size = 0;
        assert!(config.validate().is_err());

        config.filter_cache.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_user_cache_builder() {
        let config = CoreConfig::for_index("/tmp/idx")
            .with_user_cache("perSegFacets", CacheConfig::new(16));
        assert_eq!(config.index_path, "/tmp/idx");
        assert_eq!(config.user_caches["perSegFacets"].size, 16);
    }
}
