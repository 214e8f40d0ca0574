//! Engine configuration via `tidewal.toml`
//!
//! On first open a default `tidewal.toml` is written into the environment
//! directory. To change settings, edit the file and reopen the engine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tidewal_durability::{LogConfig, LogConfigError};

/// Config file name placed in the environment directory.
pub const CONFIG_FILE_NAME: &str = "tidewal.toml";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read or written
    #[error("config file '{path}': {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The config file is not valid TOML for `EngineConfig`
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        /// File involved
        path: PathBuf,
        /// Parser error
        source: toml::de::Error,
    },

    /// Serializing the config failed
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The rollback node cache must hold at least one node
    #[error("rollback_node_cache_size must be greater than zero")]
    ZeroRollbackCache,

    /// `log_dir` must be set
    #[error("log_dir must not be empty")]
    EmptyLogDir,

    /// The derived log configuration is invalid
    #[error(transparent)]
    Log(#[from] LogConfigError),
}

/// Engine configuration loaded from `tidewal.toml`.
///
/// # Example
///
/// ```toml
/// log_dir = "log"
/// rollback_node_cache_size = 16
/// max_segment_size = 104857600
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Log directory. A relative path is taken relative to the environment.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Idle rollback nodes kept for reuse.
    #[serde(default = "default_rollback_node_cache_size")]
    pub rollback_node_cache_size: usize,
    /// Segment size that triggers rotation, in bytes.
    #[serde(default = "default_max_segment_size")]
    pub max_segment_size: u64,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("log")
}

fn default_rollback_node_cache_size() -> usize {
    16
}

fn default_max_segment_size() -> u64 {
    LogConfig::default().max_segment_size
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            rollback_node_cache_size: default_rollback_node_cache_size(),
            max_segment_size: default_max_segment_size(),
        }
    }
}

impl EngineConfig {
    /// Small segments, for tests that want rotation.
    pub fn for_testing() -> Self {
        Self {
            max_segment_size: LogConfig::for_testing().max_segment_size,
            rollback_node_cache_size: 4,
            ..Self::default()
        }
    }

    /// Check every field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rollback_node_cache_size == 0 {
            return Err(ConfigError::ZeroRollbackCache);
        }
        if self.log_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyLogDir);
        }
        self.log_config().validate()?;
        Ok(())
    }

    /// Log configuration for this engine. Version constants are the build's.
    pub fn log_config(&self) -> LogConfig {
        LogConfig::new().with_max_segment_size(self.max_segment_size)
    }

    /// Log directory resolved against `env_dir`.
    pub fn resolved_log_dir(&self, env_dir: &Path) -> PathBuf {
        if self.log_dir.is_absolute() {
            self.log_dir.clone()
        } else {
            env_dir.join(&self.log_dir)
        }
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# tidewal engine configuration
#
# Log directory, relative to this file's directory unless absolute.
log_dir = "log"

# Idle rollback nodes kept for reuse by later transactions (must be > 0).
rollback_node_cache_size = 16

# Start a new log segment once the active one reaches this size (bytes).
max_segment_size = 104857600
"#
    }

    /// Read and parse config from a file path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: EngineConfig =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<(), ConfigError> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
