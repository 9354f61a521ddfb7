//! Configuration management for repograph.
//!
//! Configuration is loaded from multiple sources with the following priority:
//! 1. Environment variables (highest priority)
//! 2. Project-local `repograph.toml` file
//! 3. User config `~/.config/repograph/config.toml`
//! 4. Built-in defaults (lowest priority)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

mod defaults;

pub use defaults::*;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Graph construction configuration.
    pub builder: BuilderConfig,

    /// Traversal budget configuration.
    pub traversal: TraversalSettings,

    /// Impact analysis configuration.
    pub impact: ImpactSettings,

    /// Retrieval configuration.
    pub retrieval: RetrievalSettings,

    /// Storage configuration.
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from default locations.
    ///
    /// Searches for config in order:
    /// 1. `./repograph.toml` (project local)
    /// 2. `~/.config/repograph/config.toml` (user config)
    /// 3. Falls back to defaults
    pub fn load() -> Result<Self, ConfigError> {
        if Path::new("repograph.toml").exists() {
            return Self::from_file("repograph.toml");
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("repograph").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(n) = env_parse("REPOGRAPH_MAX_NODES") {
            self.traversal.max_nodes = n;
        }
        if let Ok(ms) = env_parse("REPOGRAPH_TIMEOUT_MS") {
            self.traversal.timeout_ms = ms;
        }
        if let Ok(depth) = env_parse("REPOGRAPH_IMPACT_DEPTH") {
            self.impact.max_depth = depth;
        }
        if let Ok(threshold) = env_parse("REPOGRAPH_TRANSITIVE_THRESHOLD") {
            self.impact.transitive_threshold = threshold;
        }
        if let Ok(k) = env_parse("REPOGRAPH_TOP_K") {
            self.retrieval.top_k = k;
        }
        if let Ok(dir) = std::env::var("REPOGRAPH_DATA_DIR") {
            self.storage.data_dir = dir;
        }
    }

    /// Reject settings that would make every query degenerate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.traversal.max_nodes == 0 {
            return Err(ConfigError::Invalid(
                "traversal.max_nodes must be greater than zero".to_string(),
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Invalid(
                "retrieval.top_k must be greater than zero".to_string(),
            ));
        }
        if self.retrieval.embedding_dimension == 0 {
            return Err(ConfigError::Invalid(
                "retrieval.embedding_dimension must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Create a default config file content as a string.
    pub fn default_config_string() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<T, ()> {
    std::env::var(key)
        .map_err(|_| ())
        .and_then(|v| v.parse().map_err(|_| ()))
}

/// Graph construction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// File names that mark an entry point.
    pub entry_point_names: Vec<String>,

    /// Import alias prefixes rewritten before resolution (`"@app" = "src"`).
    pub aliases: BTreeMap<String, String>,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            entry_point_names: DEFAULT_ENTRY_POINT_NAMES.iter().map(|s| s.to_string()).collect(),
            aliases: BTreeMap::new(),
        }
    }
}

/// Traversal budget configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalSettings {
    /// Maximum nodes a single walk may visit.
    pub max_nodes: usize,

    /// Per-walk time budget in milliseconds (0 disables the deadline).
    pub timeout_ms: u64,
}

impl Default for TraversalSettings {
    fn default() -> Self {
        Self {
            max_nodes: DEFAULT_MAX_NODES,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl TraversalSettings {
    /// The configured time budget, if any.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

/// Impact analysis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpactSettings {
    /// Depth limit of the reverse walks.
    pub max_depth: usize,

    /// Transitive reference count above which impact is `high`.
    pub transitive_threshold: usize,

    /// Maximum number of affected ids listed.
    pub affected_cap: usize,
}

impl Default for ImpactSettings {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_IMPACT_DEPTH,
            transitive_threshold: DEFAULT_TRANSITIVE_THRESHOLD,
            affected_cap: DEFAULT_AFFECTED_CAP,
        }
    }
}

/// Retrieval configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Number of seeds.
    pub top_k: usize,

    /// Breadth-first context radius.
    pub bfs_depth: usize,

    /// Depth-first chain extension.
    pub dfs_depth: usize,

    /// Node budget of the expansion.
    pub max_nodes: usize,

    /// Dimension of the built-in hashing embedder.
    pub embedding_dimension: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            bfs_depth: DEFAULT_BFS_DEPTH,
            dfs_depth: DEFAULT_DFS_DEPTH,
            max_nodes: DEFAULT_RETRIEVAL_MAX_NODES,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory for repograph data (default: ".repograph").
    pub data_dir: String,

    /// Snapshot file name.
    pub snapshot_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: DEFAULT_DATA_DIR.to_string(),
            snapshot_file: DEFAULT_SNAPSHOT_FILE.to_string(),
        }
    }
}

impl StorageConfig {
    /// Full path of the graph snapshot.
    pub fn snapshot_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(&self.snapshot_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.impact.max_depth, DEFAULT_IMPACT_DEPTH);
        assert_eq!(config.retrieval.top_k, DEFAULT_TOP_K);
        assert_eq!(config.storage.data_dir, DEFAULT_DATA_DIR);
        assert!(config.builder.entry_point_names.iter().any(|n| n == "main.rs"));
    }

    #[test]
    fn test_config_to_toml() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[builder]"));
        assert!(toml_str.contains("[impact]"));
        assert!(toml_str.contains("[storage]"));
    }

    #[test]
    fn test_timeout_zero_disables_deadline() {
        let settings = TraversalSettings {
            timeout_ms: 0,
            ..Default::default()
        };
        assert!(settings.timeout().is_none());
        assert_eq!(
            TraversalSettings::default().timeout(),
            Some(Duration::from_millis(DEFAULT_TIMEOUT_MS))
        );
    }

    #[test]
    fn test_validate_rejects_zero_top_k() {
        let mut config = Config::default();
        config.retrieval.top_k = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
