//! Log configuration.
//!
//! This module provides configuration for the logger and the startup
//! upgrade check.

use tidewal_core::{LOG_VERSION_CURRENT, LOG_VERSION_MIN_DIRTY_RECOVERY, LOG_VERSION_MIN_SUPPORTED};

/// Log configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Format version new segments are written in (default: 29).
    pub current_version: u32,

    /// Oldest on-disk version that can be upgraded (default: 21).
    pub min_supported_version: u32,

    /// Oldest on-disk version that normal crash recovery can replay after a
    /// dirty shutdown (default: 25).
    pub min_dirty_recovery_version: u32,

    /// Maximum segment size in bytes (default: 100MB).
    ///
    /// When the active segment exceeds this size, the logger starts a new one.
    pub max_segment_size: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            current_version: LOG_VERSION_CURRENT,
            min_supported_version: LOG_VERSION_MIN_SUPPORTED,
            min_dirty_recovery_version: LOG_VERSION_MIN_DIRTY_RECOVERY,
            max_segment_size: 100 * 1024 * 1024, // 100MB
        }
    }
}

impl LogConfig {
    /// Create a new log configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set max segment size (builder pattern).
    pub fn with_max_segment_size(mut self, size: u64) -> Self {
        self.max_segment_size = size;
        self
    }

    /// Set the version new segments are written in (builder pattern).
    pub fn with_current_version(mut self, version: u32) -> Self {
        self.current_version = version;
        self
    }

    /// Set the supported upgrade window (builder pattern).
    pub fn with_version_window(mut self, min_supported: u32, min_dirty_recovery: u32) -> Self {
        self.min_supported_version = min_supported;
        self.min_dirty_recovery_version = min_dirty_recovery;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), LogConfigError> {
        if self.max_segment_size < 1024 {
            return Err(LogConfigError::SegmentSizeTooSmall);
        }
        if !(self.min_supported_version <= self.min_dirty_recovery_version
            && self.min_dirty_recovery_version <= self.current_version)
        {
            return Err(LogConfigError::VersionWindow {
                min_supported: self.min_supported_version,
                min_dirty_recovery: self.min_dirty_recovery_version,
                current: self.current_version,
            });
        }
        Ok(())
    }

    /// Create a configuration optimized for testing (small segments).
    pub fn for_testing() -> Self {
        LogConfig {
            max_segment_size: 4 * 1024, // 4KB for fast rotation in tests
            ..Self::default()
        }
    }
}

/// Log configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogConfigError {
    /// Segment size is too small (minimum 1KB).
    #[error("Segment size must be at least 1KB")]
    SegmentSizeTooSmall,

    /// Versions are not ordered min_supported <= min_dirty_recovery <= current.
    #[error("Invalid version window: min_supported={min_supported}, min_dirty_recovery={min_dirty_recovery}, current={current}")]
    VersionWindow {
        /// Oldest upgradable version
        min_supported: u32,
        /// Oldest dirty-recoverable version
        min_dirty_recovery: u32,
        /// Version written by this build
        current: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.current_version, 29);
        assert_eq!(config.min_supported_version, 21);
        assert_eq!(config.min_dirty_recovery_version, 25);
        assert_eq!(config.max_segment_size, 100 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = LogConfig::new()
            .with_max_segment_size(8 * 1024)
            .with_current_version(30)
            .with_version_window(22, 27);

        assert_eq!(config.max_segment_size, 8 * 1024);
        assert_eq!(config.current_version, 30);
        assert_eq!(config.min_supported_version, 22);
        assert_eq!(config.min_dirty_recovery_version, 27);
    }

    #[test]
    fn test_validation_segment_too_small() {
        let config = LogConfig::new().with_max_segment_size(512);
        assert_eq!(config.validate(), Err(LogConfigError::SegmentSizeTooSmall));
    }

    #[test]
    fn test_validation_version_window() {
        let config = LogConfig::new().with_version_window(26, 25);
        assert!(matches!(
            config.validate(),
            Err(LogConfigError::VersionWindow { .. })
        ));

        let config = LogConfig::new().with_version_window(21, 30);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_testing_config() {
        let config = LogConfig::for_testing();
        assert!(config.validate().is_ok());
        assert!(config.max_segment_size < LogConfig::default().max_segment_size);
    }
}
