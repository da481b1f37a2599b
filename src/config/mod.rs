//! Configuration management.
//!
//! A typed, immutable [`MemoryConfig`] is loaded once from
//! `kuzu-memory/config.yaml` and passed through constructors; nothing reads
//! ambient configuration after startup.

mod paths;

pub use paths::ProjectPaths;

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::{Path, PathBuf};

/// Expands environment variable references in a string.
///
/// Supports `${VAR_NAME}` syntax. If the variable is not set, the original
/// reference is preserved (e.g., `${MISSING_VAR}` stays as-is).
///
/// Uses `Cow<str>` to avoid allocation when no expansion is needed.
fn expand_env_vars(input: &str) -> Cow<'_, str> {
    // Fast path: no ${} pattern at all
    if !input.contains("${") {
        return Cow::Borrowed(input);
    }

    let mut result = input.to_string();
    let mut start = 0;

    while let Some(var_start) = result[start..].find("${") {
        let var_start = start + var_start;
        if let Some(var_end) = result[var_start..].find('}') {
            let var_end = var_start + var_end;
            let var_name = &result[var_start + 2..var_end];
            if let Ok(value) = std::env::var(var_name) {
                result.replace_range(var_start..=var_end, &value);
                start = var_start + value.len();
            } else {
                start = var_end + 1;
            }
        } else {
            break;
        }
    }

    Cow::Owned(result)
}

/// Main configuration for kuzu-memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Storage engine settings.
    pub storage: StorageConfig,
    /// Recall engine settings.
    pub recall: RecallConfig,
    /// Latency and concurrency budgets.
    pub performance: PerformanceConfig,
    /// Ingest pipeline settings.
    pub learning: LearningConfig,
    /// Git history import settings.
    pub git_sync: GitSyncConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl MemoryConfig {
    /// Loads configuration from a YAML file, applying `${VAR}` expansion.
    ///
    /// A missing file yields the defaults; a malformed file is an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file exists but cannot be read or
    /// parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?;
        Self::from_yaml(&raw)
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on malformed YAML.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let expanded = expand_env_vars(raw);
        serde_yaml_ng::from_str(&expanded).map_err(|e| Error::Config(format!("parse config: {e}")))
    }

    /// Serialises the configuration back to YAML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if serialisation fails.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml_ng::to_string(self).map_err(|e| Error::Config(format!("render config: {e}")))
    }

    /// Writes the configuration to a YAML file.
    ///
    /// Used by `init` (defaults) and by incremental git sync to persist the
    /// commit cursor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on render or write failure.
    pub fn save(&self, path: &Path) -> Result<()> {
        let yaml = self.to_yaml()?;
        std::fs::write(path, yaml)
            .map_err(|e| Error::Config(format!("write {}: {e}", path.display())))
    }
}

/// Storage engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database directory, relative to the project memory directory.
    pub database_path: PathBuf,
    /// Warn threshold for the database size.
    pub max_size_mb: u64,
    /// Enables the periodic TTL sweep.
    pub auto_compact: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./memorydb"),
            max_size_mb: 512,
            auto_compact: true,
        }
    }
}

/// Recall engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallConfig {
    /// Default number of memories to return.
    pub max_memories: usize,
    /// Fallback order for auto strategy selection.
    pub strategies: Vec<crate::models::RecallStrategy>,
    /// Capacity of each result cache.
    pub cache_entries: usize,
    /// Time-to-live for cached results, in seconds.
    pub cache_ttl_secs: u64,
}

impl Default for RecallConfig {
    fn default() -> Self {
        use crate::models::RecallStrategy;
        Self {
            max_memories: 5,
            strategies: vec![
                RecallStrategy::Keyword,
                RecallStrategy::Entity,
                RecallStrategy::Temporal,
            ],
            cache_entries: 512,
            cache_ttl_secs: 60,
        }
    }
}

/// Latency and concurrency budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Soft deadline for recall, in milliseconds.
    pub max_recall_time_ms: u64,
    /// Soft deadline for enhanced prompt generation, in milliseconds.
    pub max_generation_time_ms: u64,
    /// Pooled connections derived from the shared database handle.
    pub connection_pool_size: usize,
    /// Base delay for write retry backoff, in milliseconds.
    pub write_retry_base_ms: u64,
    /// Write attempts before giving up with a busy timeout.
    pub write_retry_max_attempts: u32,
    /// Bound of the learn queue.
    pub queue_capacity: usize,
    /// Learn queue worker count.
    pub queue_workers: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_recall_time_ms: 100,
            max_generation_time_ms: 200,
            connection_pool_size: 8,
            write_retry_base_ms: 100,
            write_retry_max_attempts: 10,
            queue_capacity: 1024,
            queue_workers: 2,
        }
    }
}

/// Ingest pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Minimum content length accepted by `learn` (git sync uses the
    /// separate `git_sync.min_message_length`).
    pub min_content_length: usize,
    /// Extra secrets deny-list patterns, as regexes.
    pub excluded_patterns: Vec<String>,
    /// Keyword Jaccard threshold for near-duplicate detection.
    pub near_duplicate_threshold: f64,
    /// Derive `user_id` from git config `user.email` when unset.
    pub auto_tag_git_user: bool,
    /// Fixed `user_id` overriding all other sources.
    pub user_id_override: Option<String>,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            min_content_length: 50,
            excluded_patterns: Vec::new(),
            near_duplicate_threshold: 0.85,
            auto_tag_git_user: true,
            user_id_override: None,
        }
    }
}

/// Git history import settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitSyncConfig {
    /// Master switch for the importer.
    pub enabled: bool,
    /// Branch names to include (empty means all).
    pub branch_include_patterns: Vec<String>,
    /// Branch names to exclude.
    pub branch_exclude_patterns: Vec<String>,
    /// Commit-message prefixes considered significant.
    pub significant_prefixes: Vec<String>,
    /// Commit-message substrings that cause a skip.
    pub skip_patterns: Vec<String>,
    /// Minimum commit message length.
    pub min_message_length: usize,
    /// Also import merge commits.
    pub include_merge_commits: bool,
    /// Instant of the last completed sync.
    pub last_sync_timestamp: Option<chrono::DateTime<chrono::Utc>>,
    /// Cursor for incremental sync.
    pub last_commit_sha: Option<String>,
}

impl Default for GitSyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            branch_include_patterns: Vec::new(),
            branch_exclude_patterns: Vec::new(),
            significant_prefixes: vec![
                "feat:".to_string(),
                "fix:".to_string(),
                "refactor:".to_string(),
                "perf:".to_string(),
                "BREAKING CHANGE".to_string(),
            ],
            skip_patterns: vec![
                "wip".to_string(),
                "tmp".to_string(),
                "chore:".to_string(),
                "style:".to_string(),
                "docs:".to_string(),
            ],
            min_message_length: 5,
            include_merge_commits: false,
            last_sync_timestamp: None,
            last_commit_sha: None,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log format (`"json"` or `"pretty"`).
    pub format: Option<String>,
    /// Log level (e.g. `"info"`).
    pub level: Option<String>,
    /// Full filter override (e.g. `"kuzu_memory=debug"`).
    pub filter: Option<String>,
    /// Log file name under `kuzu-memory/logs/` (stderr if not set).
    pub file: Option<String>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let config = MemoryConfig::default();
        assert_eq!(config.recall.max_memories, 5);
        assert_eq!(config.performance.max_recall_time_ms, 100);
        assert_eq!(config.performance.connection_pool_size, 8);
        assert_eq!(config.performance.write_retry_base_ms, 100);
        assert_eq!(config.performance.write_retry_max_attempts, 10);
        assert_eq!(config.learning.min_content_length, 50);
        assert_eq!(config.git_sync.min_message_length, 5);
        assert!(config.git_sync.significant_prefixes.contains(&"feat:".to_string()));
    }

    #[test]
    fn test_partial_yaml_overlays_defaults() {
        let config = MemoryConfig::from_yaml(
            "recall:\n  max_memories: 3\nperformance:\n  connection_pool_size: 2\n",
        )
        .expect("partial yaml parses");
        assert_eq!(config.recall.max_memories, 3);
        assert_eq!(config.performance.connection_pool_size, 2);
        // Untouched sections keep defaults
        assert_eq!(config.performance.max_recall_time_ms, 100);
        assert_eq!(config.learning.min_content_length, 50);
    }

    #[test]
    fn test_yaml_roundtrip_preserves_sync_cursor() {
        let config = MemoryConfig {
            git_sync: GitSyncConfig {
                last_commit_sha: Some("abc123".to_string()),
                ..GitSyncConfig::default()
            },
            ..MemoryConfig::default()
        };
        let yaml = config.to_yaml().expect("config renders");
        let back = MemoryConfig::from_yaml(&yaml).expect("rendered config parses");
        assert_eq!(back.git_sync.last_commit_sha.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_env_expansion() {
        // PATH is set in any test environment; compare against the live value.
        let path = std::env::var("PATH").unwrap_or_default();
        let expanded = expand_env_vars("bin: ${PATH}/x");
        assert_eq!(expanded, format!("bin: {path}/x"));
        let untouched = expand_env_vars("no vars here");
        assert!(matches!(untouched, Cow::Borrowed(_)));
        let missing = expand_env_vars("${KUZU_MEMORY_DEFINITELY_UNSET}");
        assert_eq!(missing, "${KUZU_MEMORY_DEFINITELY_UNSET}");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let loaded = MemoryConfig::load(Path::new("/nonexistent/config.yaml"));
        assert!(loaded.is_ok());
    }
}
