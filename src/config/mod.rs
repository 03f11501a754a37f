//! Configuration management.
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then `ITEMTRACE_*` environment variables.
//!
//! ```toml
//! data_dir = "/var/lib/itemtrace"
//! node_name = "lobby-1"
//!
//! [detection]
//! min_duplicates = 1
//! ignored_actions = ["LOGIN_SCAN"]
//!
//! [retention]
//! capacity = 50000
//! retention_days = 7
//!
//! [sync]
//! enabled = true
//! redis_url = "redis://cache:6379"
//! ```

mod env;

pub use env::{env_flag, env_list, env_parse};

use crate::gc::RetentionConfig;
use crate::observability::{LogFormat, LoggingConfig};
use crate::services::DetectionConfig;
use crate::storage::PersistenceConfig;
use crate::sync::SyncConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable overriding the configuration file path.
pub const CONFIG_PATH_ENV: &str = "ITEMTRACE_CONFIG_PATH";

/// File name of the binary snapshot inside the data directory.
pub const SNAPSHOT_FILE_NAME: &str = "items.dat";

/// Default number of history entries kept per item.
pub const DEFAULT_MAX_HISTORY: usize = 100;

/// Main configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding the snapshot file.
    pub data_dir: PathBuf,
    /// Name of this node, used as the alert origin.
    pub node_name: String,
    /// Duplicate detection and alert settings.
    pub detection: DetectionConfig,
    /// Snapshot persistence settings.
    pub persistence: PersistenceConfig,
    /// Retention sweep settings.
    pub retention: RetentionConfig,
    /// Maximum history entries kept per item.
    pub max_history: usize,
    /// Cross-node synchronizer settings.
    pub sync: SyncConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Data directory.
    pub data_dir: Option<String>,
    /// Node name.
    pub node_name: Option<String>,
    /// Detection section.
    pub detection: Option<ConfigFileDetection>,
    /// Persistence section.
    pub persistence: Option<ConfigFilePersistence>,
    /// Retention section.
    pub retention: Option<ConfigFileRetention>,
    /// History section.
    pub history: Option<ConfigFileHistory>,
    /// Sync section.
    pub sync: Option<ConfigFileSync>,
    /// Logging section.
    pub logging: Option<ConfigFileLogging>,
}

/// Detection section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileDetection {
    /// Whether duplicate alerts are broadcast.
    pub enabled: Option<bool>,
    /// Minimum duplicates before an alert is raised.
    pub min_duplicates: Option<usize>,
    /// Cap on duplicates returned per scan.
    pub max_results: Option<usize>,
    /// Actions that never raise alerts.
    pub ignored_actions: Option<Vec<String>>,
}

/// Persistence section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFilePersistence {
    /// Debounce window in milliseconds.
    pub debounce_ms: Option<u64>,
    /// Grace period for the final write in milliseconds.
    pub shutdown_grace_ms: Option<u64>,
}

/// Retention section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileRetention {
    /// Record count above which the sweep evicts.
    pub capacity: Option<usize>,
    /// Age in days after which records may be evicted.
    pub retention_days: Option<u32>,
    /// Seconds between sweeps.
    pub sweep_interval_secs: Option<u64>,
}

/// History section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileHistory {
    /// Entries kept per item.
    pub max_entries: Option<usize>,
}

/// Sync section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileSync {
    /// Whether cross-node sync is enabled.
    pub enabled: Option<bool>,
    /// Redis connection URL.
    pub redis_url: Option<String>,
    /// TTL of fingerprint entries in seconds.
    pub item_ttl_secs: Option<u64>,
    /// TTL of history lists in seconds.
    pub history_ttl_secs: Option<u64>,
    /// Entries kept per remote history list.
    pub max_history: Option<usize>,
}

/// Logging section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileLogging {
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// `EnvFilter` directive string.
    pub filter: Option<String>,
    /// Log file path.
    pub file: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            node_name: default_node_name(),
            detection: DetectionConfig::default(),
            persistence: PersistenceConfig::default(),
            retention: RetentionConfig::default(),
            max_history: DEFAULT_MAX_HISTORY,
            sync: SyncConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> crate::Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| crate::Error::OperationFailed {
                operation: "read_config_file".to_string(),
                cause: format!("{}: {e}", path.display()),
            })?;

        Self::from_toml_str(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration TOML.
    pub fn from_toml_str(contents: &str) -> crate::Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| crate::Error::OperationFailed {
                operation: "parse_config_file".to_string(),
                cause: e.to_string(),
            })?;

        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from the default location.
    ///
    /// Checks `<platform config dir>/itemtrace/config.toml`. Returns the
    /// default configuration if no readable file is found.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let platform_config = base_dirs.config_dir().join("itemtrace").join("config.toml");
        if platform_config.exists() {
            match Self::load_from_file(&platform_config) {
                Ok(config) => return config,
                Err(e) => tracing::warn!(error = %e, "Ignoring unreadable config file"),
            }
        }

        Self::default()
    }

    /// Resolves configuration the way the binary does.
    ///
    /// An explicit path wins, then `ITEMTRACE_CONFIG_PATH`, then the default
    /// location. Environment overrides are applied last.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly named file cannot be loaded.
    pub fn resolve(path: Option<&Path>) -> crate::Result<Self> {
        let config = if let Some(path) = path {
            Self::load_from_file(path)?
        } else if let Some(env_path) =
            std::env::var(CONFIG_PATH_ENV).ok().filter(|p| !p.trim().is_empty())
        {
            Self::load_from_file(Path::new(&env_path))?
        } else {
            Self::load_default()
        };

        Ok(config.with_env_overrides())
    }

    /// Converts a `ConfigFile` to `EngineConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(data_dir) = file.data_dir {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Some(node_name) = file.node_name.filter(|n| !n.trim().is_empty()) {
            config.node_name = node_name;
        }
        if let Some(detection) = file.detection {
            if let Some(v) = detection.enabled {
                config.detection.alerts_enabled = v;
            }
            if let Some(v) = detection.min_duplicates {
                config.detection.min_duplicates = v;
            }
            if let Some(v) = detection.max_results {
                config.detection.max_results = v;
            }
            if let Some(v) = detection.ignored_actions {
                config.detection.ignored_actions = v.into_iter().collect();
            }
        }
        if let Some(persistence) = file.persistence {
            if let Some(v) = persistence.debounce_ms {
                config.persistence.debounce = std::time::Duration::from_millis(v);
            }
            if let Some(v) = persistence.shutdown_grace_ms {
                config.persistence.shutdown_grace = std::time::Duration::from_millis(v);
            }
        }
        if let Some(retention) = file.retention {
            if let Some(v) = retention.capacity {
                config.retention.capacity = v;
            }
            if let Some(v) = retention.retention_days {
                config.retention.retention_days = v;
            }
            if let Some(v) = retention.sweep_interval_secs {
                config.retention.sweep_interval = std::time::Duration::from_secs(v);
            }
        }
        if let Some(v) = file.history.and_then(|h| h.max_entries) {
            config.max_history = v;
        }
        if let Some(sync) = file.sync {
            if let Some(v) = sync.enabled {
                config.sync.enabled = v;
            }
            if let Some(v) = sync.redis_url {
                config.sync.redis_url = v;
            }
            if let Some(v) = sync.item_ttl_secs {
                config.sync.item_ttl_secs = v;
            }
            if let Some(v) = sync.history_ttl_secs {
                config.sync.history_ttl_secs = v;
            }
            if let Some(v) = sync.max_history {
                config.sync.max_history = v;
            }
        }
        if let Some(logging) = file.logging {
            if let Some(format) = logging.format {
                config.logging.format = LogFormat::parse(&format);
            }
            if let Some(filter) = logging.filter {
                config.logging.filter = filter;
            }
            config.logging.file = logging.file.map(PathBuf::from);
        }

        config
    }

    /// Applies `ITEMTRACE_*` environment overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(dir) = std::env::var("ITEMTRACE_DATA_DIR")
            .ok()
            .filter(|d| !d.trim().is_empty())
        {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(name) = std::env::var("ITEMTRACE_NODE_NAME")
            .ok()
            .filter(|n| !n.trim().is_empty())
        {
            self.node_name = name;
        }
        if let Some(v) = env_parse("ITEMTRACE_MAX_HISTORY") {
            self.max_history = v;
        }

        self.detection = self.detection.with_env_overrides();
        self.persistence = self.persistence.with_env_overrides();
        self.retention = self.retention.with_env_overrides();
        self.sync = self.sync.with_env_overrides();
        self.logging = self.logging.with_env_overrides();
        self
    }

    /// Returns the snapshot file path.
    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(SNAPSHOT_FILE_NAME)
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Sets the node name.
    #[must_use]
    pub fn with_node_name(mut self, name: impl Into<String>) -> Self {
        self.node_name = name.into();
        self
    }

    /// Sets the detection settings.
    #[must_use]
    pub fn with_detection(mut self, detection: DetectionConfig) -> Self {
        self.detection = detection;
        self
    }

    /// Sets the persistence settings.
    #[must_use]
    pub const fn with_persistence(mut self, persistence: PersistenceConfig) -> Self {
        self.persistence = persistence;
        self
    }

    /// Sets the retention settings.
    #[must_use]
    pub const fn with_retention(mut self, retention: RetentionConfig) -> Self {
        self.retention = retention;
        self
    }
}

/// Returns the platform data directory for itemtrace, or `.itemtrace`.
fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "itemtrace")
        .map_or_else(|| PathBuf::from(".itemtrace"), |dirs| dirs.data_dir().to_path_buf())
}

/// Generates a node name unique enough to tell fleet members apart.
fn default_node_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("node-{}", &id[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.detection.min_duplicates, 1);
        assert_eq!(config.detection.max_results, 100);
        assert!(config.detection.ignored_actions.contains("LOGIN_SCAN"));
        assert_eq!(config.persistence.debounce, Duration::from_secs(5));
        assert_eq!(config.retention.capacity, 50_000);
        assert_eq!(config.retention.retention_days, 7);
        assert!(!config.sync.enabled);
        assert!(config.node_name.starts_with("node-"));
        assert!(config.snapshot_path().ends_with(SNAPSHOT_FILE_NAME));
    }

    #[test]
    fn test_from_toml_overrides_sections() {
        let config = EngineConfig::from_toml_str(
            r#"
            data_dir = "/tmp/itemtrace-test"
            node_name = "survival-2"

            [detection]
            min_duplicates = 3
            ignored_actions = ["LOGIN_SCAN", "INVENTORY_SCAN"]

            [persistence]
            debounce_ms = 250

            [retention]
            capacity = 10
            sweep_interval_secs = 60

            [history]
            max_entries = 5

            [sync]
            enabled = true
            redis_url = "redis://cache:6380"

            [logging]
            format = "json"
            "#,
        )
        .expect("valid config");

        assert_eq!(config.data_dir, PathBuf::from("/tmp/itemtrace-test"));
        assert_eq!(config.node_name, "survival-2");
        assert_eq!(config.detection.min_duplicates, 3);
        assert!(config.detection.ignored_actions.contains("INVENTORY_SCAN"));
        assert_eq!(config.persistence.debounce, Duration::from_millis(250));
        assert_eq!(config.retention.capacity, 10);
        assert_eq!(config.retention.retention_days, 7);
        assert_eq!(config.retention.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.max_history, 5);
        assert!(config.sync.enabled);
        assert_eq!(config.sync.redis_url, "redis://cache:6380");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let result = EngineConfig::from_toml_str("[detection\nmin_duplicates = ");
        assert!(matches!(
            result,
            Err(crate::Error::OperationFailed { ref operation, .. }) if operation == "parse_config_file"
        ));
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let result = EngineConfig::load_from_file(Path::new("/definitely/not/here.toml"));
        assert!(result.is_err());
    }
}
