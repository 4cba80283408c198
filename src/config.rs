//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::storage::{StorageConfig, SynchronousMode};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Path value selecting an in-memory database
pub const IN_MEMORY: &str = ":memory:";

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// Database file, or `:memory:`
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_page_size")]
    pub page_size: usize,

    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,

    #[serde(default)]
    pub synchronous: SynchronousMode,
}

fn default_db_path() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("spandb").join("spandb.db").to_string_lossy().to_string())
        .unwrap_or_else(|| "./spandb.db".to_string())
}

fn default_page_size() -> usize {
    1000
}

fn default_busy_timeout() -> u64 {
    5000 // 5 seconds
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            page_size: default_page_size(),
            busy_timeout_ms: default_busy_timeout(),
            synchronous: SynchronousMode::default(),
        }
    }
}

impl StorageSettings {
    /// Engine configuration for these settings
    pub fn engine_config(&self) -> StorageConfig {
        let config = if self.db_path == IN_MEMORY {
            StorageConfig::in_memory()
        } else {
            StorageConfig::new(&self.db_path)
        };
        config
            .page_size(self.page_size)
            .busy_timeout_ms(self.busy_timeout_ms)
            .synchronous(self.synchronous)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("spandb").join("config.toml")),
            Some(PathBuf::from("/etc/spandb/config.toml")),
            Some(PathBuf::from("./spandb.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::debug!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(db_path) = std::env::var("SPANDB_DB_PATH") {
            self.storage.db_path = db_path;
        }
        if let Ok(page_size) = std::env::var("SPANDB_PAGE_SIZE") {
            match page_size.parse() {
                Ok(n) => self.storage.page_size = n,
                Err(_) => tracing::warn!("Ignoring invalid SPANDB_PAGE_SIZE {:?}", page_size),
            }
        }

        if let Ok(level) = std::env::var("SPANDB_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("SPANDB_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Spandb Configuration
#
# Environment variables override these settings:
# - SPANDB_DB_PATH
# - SPANDB_PAGE_SIZE
# - SPANDB_LOG_LEVEL
# - SPANDB_LOG_FORMAT

[storage]
# SQLite database file, or ":memory:"
db_path = "~/.local/share/spandb/spandb.db"

# Rows fetched per page while streaming reads
page_size = 1000

# How long to wait for a locked database (ms)
busy_timeout_ms = 5000

# Commit durability: off, normal or full
synchronous = "normal"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
