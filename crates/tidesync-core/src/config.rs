//! Configuration module for TideSync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::plan::TriggerSource;

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for TideSync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Reconciliation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Root of the local tree being synchronized.
    pub local_root: PathBuf,
    /// Root of the directory-backed remote store.
    pub remote_root: PathBuf,
    /// Key prefix every remote object lives under (empty = bucket root).
    pub remote_prefix: String,
    /// Maximum in-flight operations; `1` selects the sequential executor.
    pub concurrency: usize,
    /// Files larger than this many bytes are not transferred; `<= 0` disables the limit.
    pub skip_size_larger_than: i64,
    /// Abort when more than this percentage of keys would be touched; `100` disables.
    pub protect_modify_percentage: u8,
    /// Whether the hidden configuration folder is synchronized.
    pub sync_config_dir: bool,
    /// Name of the hidden configuration folder at the root of the local tree.
    pub config_dir: String,
    /// Whether items whose name starts with `_` are synchronized.
    pub sync_underscore_items: bool,
    /// Glob patterns of keys to leave alone.
    pub ignore_paths: Vec<String>,
    /// When set, only these keys (and their parent folders) are synchronized.
    pub only_keys: Option<Vec<String>>,
    /// Move deleted local files to the system trash instead of unlinking them.
    pub use_trash: bool,
    /// Trigger recorded on plans started without an explicit source.
    pub default_trigger: TriggerSource,
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database holding mappings, history events and plans.
    pub database: PathBuf,
    /// Name of the remote object carrying the deletion tombstones.
    pub metadata_file: String,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/tidesync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("tidesync")
            .join("config.yaml")
    }

    /// Serialize the configuration back to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

// ---------------------------------------------------------------------------
// Config::default()
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
        Self {
            local_root: home.join("TideSync"),
            remote_root: home.join("TideSyncRemote"),
            remote_prefix: String::new(),
            concurrency: 5,
            skip_size_larger_than: -1,
            protect_modify_percentage: 50,
            sync_config_dir: false,
            config_dir: ".tidesync-config".to_string(),
            sync_underscore_items: false,
            ignore_paths: Vec::new(),
            only_keys: None,
            use_trash: true,
            default_trigger: TriggerSource::Manual,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("tidesync");
        Self {
            database: data_dir.join("history.db"),
            metadata_file: "_tidesync_metadata.json".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.concurrency"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        if self.sync.concurrency == 0 || self.sync.concurrency > 64 {
            errors.push(ValidationError {
                field: "sync.concurrency".into(),
                message: "must be in range 1..=64".into(),
            });
        }
        if self.sync.protect_modify_percentage == 0 || self.sync.protect_modify_percentage > 100 {
            errors.push(ValidationError {
                field: "sync.protect_modify_percentage".into(),
                message: "must be in range 1..=100".into(),
            });
        }
        if !self.sync.config_dir.starts_with('.') || self.sync.config_dir.contains('/') {
            errors.push(ValidationError {
                field: "sync.config_dir".into(),
                message: format!(
                    "must be a single hidden folder name, got '{}'",
                    self.sync.config_dir
                ),
            });
        }
        if self.sync.remote_prefix.starts_with('/') {
            errors.push(ValidationError {
                field: "sync.remote_prefix".into(),
                message: "must be relative (no leading '/')".into(),
            });
        }
        if !self.sync.remote_prefix.is_empty() && !self.sync.remote_prefix.ends_with('/') {
            errors.push(ValidationError {
                field: "sync.remote_prefix".into(),
                message: "must end with '/' when set".into(),
            });
        }
        for pattern in &self.sync.ignore_paths {
            if let Err(e) = glob::Pattern::new(pattern) {
                errors.push(ValidationError {
                    field: "sync.ignore_paths".into(),
                    message: format!("invalid pattern '{pattern}': {e}"),
                });
            }
        }
        if self.sync.local_root == self.sync.remote_root {
            errors.push(ValidationError {
                field: "sync.remote_root".into(),
                message: "must differ from sync.local_root".into(),
            });
        }

        // --- storage ---
        if self.storage.metadata_file.is_empty() || self.storage.metadata_file.contains('/') {
            errors.push(ValidationError {
                field: "storage.metadata_file".into(),
                message: "must be a plain object name".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use tidesync_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .local_root(PathBuf::from("/home/user/Notes"))
///     .concurrency(8)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn local_root(mut self, root: PathBuf) -> Self {
        self.config.sync.local_root = root;
        self
    }

    pub fn remote_root(mut self, root: PathBuf) -> Self {
        self.config.sync.remote_root = root;
        self
    }

    pub fn remote_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.sync.remote_prefix = prefix.into();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.sync.concurrency = n;
        self
    }

    pub fn skip_size_larger_than(mut self, bytes: i64) -> Self {
        self.config.sync.skip_size_larger_than = bytes;
        self
    }

    pub fn protect_modify_percentage(mut self, percent: u8) -> Self {
        self.config.sync.protect_modify_percentage = percent;
        self
    }

    pub fn sync_config_dir(mut self, enabled: bool) -> Self {
        self.config.sync.sync_config_dir = enabled;
        self
    }

    pub fn sync_underscore_items(mut self, enabled: bool) -> Self {
        self.config.sync.sync_underscore_items = enabled;
        self
    }

    pub fn ignore_path(mut self, pattern: impl Into<String>) -> Self {
        self.config.sync.ignore_paths.push(pattern.into());
        self
    }

    pub fn only_keys(mut self, keys: Vec<String>) -> Self {
        self.config.sync.only_keys = Some(keys);
        self
    }

    pub fn use_trash(mut self, enabled: bool) -> Self {
        self.config.sync.use_trash = enabled;
        self
    }

    // --- storage ---

    pub fn database(mut self, path: PathBuf) -> Self {
        self.config.storage.database = path;
        self
    }

    pub fn metadata_file(mut self, name: impl Into<String>) -> Self {
        self.config.storage.metadata_file = name.into();
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
