//! Startup log-format upgrade.
//!
//! Runs once, before any transaction or checkpoint thread starts, and makes
//! sure the log directory is in a state this build can work with.
//!
//! # Workflow
//!
//! ```text
//! Start
//!  ├─ no segments ...................... NoLogsFound ─> Done
//!  ├─ version > current ................ TooNew   (error)
//!  ├─ version < min supported .......... TooOld   (error)
//!  ├─ version == current ............... CurrentVersion ─> Done
//!  └─ otherwise ........................ OlderSupported ─> VerifyShutdown
//!        ├─ clean ─> CleanShutdown ─> OpenUpgradeLogger ─> UpgradeCheckpoint
//!        │            ─> CloseUpgradeLogger ─> VerifyUpgraded ─> Done
//!        └─ dirty ─> DirtyShutdown
//!              ├─ version >= min dirty recovery ─> DeferToRecovery ─> Done
//!              └─ otherwise ..................... UpgradeFailure (error)
//! ```
//!
//! Every failure is detected before the log is touched, except one after
//! the upgrade logger opened. Those remove the current-version segments the
//! upgrade added, so the next startup sees the old log and tries again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tidewal_core::Lsn;
use tracing::{error, info, warn};

use crate::checkpoint::{CheckpointDriver, CheckpointError, CheckpointReason};
use crate::config::LogConfig;
use crate::cursor::{FileLogSource, LogSource};
use crate::format::{
    list_segments, version_of_logs_on_disk, LogError, SegmentFile, ShutdownRecord,
};
use crate::logger::{Logger, LoggerStart};

/// A state the upgrade workflow passed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpgradeStep {
    /// Workflow entered
    Start,
    /// Log directory holds no segments
    NoLogsFound,
    /// Log is already in the current format
    CurrentVersion,
    /// Log was written by a newer build
    TooNew,
    /// Log is older than anything this build can upgrade
    TooOld,
    /// Log is older than current but upgradable
    OlderSupported,
    /// Reading the last entry of the newest segment
    VerifyShutdown,
    /// Newest segment ends in a shutdown record
    CleanShutdown,
    /// Newest segment does not end in a shutdown record
    DirtyShutdown,
    /// Leaving the dirty log to crash recovery
    DeferToRecovery,
    /// Temporary logger opened past the old shutdown record
    OpenUpgradeLogger,
    /// Checkpoint forcing the current format
    UpgradeCheckpoint,
    /// Temporary logger closed with a fresh shutdown record
    CloseUpgradeLogger,
    /// Checking the result
    VerifyUpgraded,
    /// Workflow finished without error
    Done,
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeOutcome {
    /// True when the log was rewritten in the current format
    pub did_upgrade: bool,
    /// LSN of the old shutdown record, when an upgrade happened
    pub pre_upgrade_lsn: Option<Lsn>,
    /// States visited, in order
    pub trail: Vec<UpgradeStep>,
}

/// Upgrade errors. All of them are fatal to engine startup.
#[derive(Debug, thiserror::Error)]
pub enum UpgradeError {
    /// Log was written by a newer build.
    #[error("log version {found} is newer than supported version {supported}")]
    VersionTooNew {
        /// Version on disk
        found: u32,
        /// Version this build writes
        supported: u32,
    },

    /// Log is too old to upgrade.
    #[error("log version {found} is older than minimum supported version {minimum}")]
    VersionTooOld {
        /// Version on disk
        found: u32,
        /// Oldest upgradable version
        minimum: u32,
    },

    /// The log cannot be brought to the current format.
    #[error("cannot upgrade log version {version}: {reason}")]
    UpgradeFailure {
        /// Version on disk
        version: u32,
        /// What went wrong
        reason: String,
    },

    /// Scanning or reading segments failed.
    #[error("upgrade I/O error: {0}")]
    Io(#[from] LogError),

    /// The upgrade checkpoint failed.
    #[error("upgrade checkpoint failed: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// One-shot startup workflow that verifies and upgrades the log.
pub struct LogUpgrader {
    config: LogConfig,
    source: Arc<dyn LogSource>,
    checkpointer: Arc<dyn CheckpointDriver>,
    trail: Vec<UpgradeStep>,
}

impl LogUpgrader {
    /// Upgrader reading segment files and checkpointing with `checkpointer`.
    pub fn new(config: LogConfig, checkpointer: Arc<dyn CheckpointDriver>) -> Self {
        LogUpgrader {
            config,
            source: Arc::new(FileLogSource),
            checkpointer,
            trail: Vec::new(),
        }
    }

    /// Read entries through `source` instead of the segment files directly.
    pub fn with_source(mut self, source: Arc<dyn LogSource>) -> Self {
        self.source = source;
        self
    }

    /// States visited by the most recent `run`, including a failed one.
    pub fn trail(&self) -> &[UpgradeStep] {
        &self.trail
    }

    /// Inspect the log in `log_dir` and upgrade it if needed.
    ///
    /// A relative `log_dir` is taken relative to `env_dir`.
    pub fn run(&mut self, env_dir: &Path, log_dir: &Path) -> Result<UpgradeOutcome, UpgradeError> {
        self.trail.clear();
        self.step(UpgradeStep::Start);

        let log_dir = resolve_log_dir(env_dir, log_dir);
        let result = self.run_steps(&log_dir);

        match &result {
            Ok(outcome) => info!(
                target: "tidewal::upgrade",
                log_dir = %log_dir.display(),
                did_upgrade = outcome.did_upgrade,
                steps = ?self.trail,
                "Log upgrade check finished"
            ),
            Err(e) => error!(
                target: "tidewal::upgrade",
                log_dir = %log_dir.display(),
                error = %e,
                steps = ?self.trail,
                "Log upgrade check failed"
            ),
        }
        result
    }

    fn run_steps(&mut self, log_dir: &Path) -> Result<UpgradeOutcome, UpgradeError> {
        let current = self.config.current_version;

        let version = match version_of_logs_on_disk(log_dir)? {
            Some(version) => version,
            None => {
                self.step(UpgradeStep::NoLogsFound);
                return Ok(self.finish(false, None));
            }
        };

        if version > current {
            self.step(UpgradeStep::TooNew);
            return Err(UpgradeError::VersionTooNew {
                found: version,
                supported: current,
            });
        }
        if version < self.config.min_supported_version {
            self.step(UpgradeStep::TooOld);
            return Err(UpgradeError::VersionTooOld {
                found: version,
                minimum: self.config.min_supported_version,
            });
        }
        if version == current {
            self.step(UpgradeStep::CurrentVersion);
            return Ok(self.finish(false, None));
        }

        self.step(UpgradeStep::OlderSupported);
        info!(
            target: "tidewal::upgrade",
            found = version,
            current,
            "Log is in an older format"
        );

        match self.verify_clean_shutdown_of_old_log(log_dir)? {
            Some(shutdown) => {
                self.step(UpgradeStep::CleanShutdown);
                self.upgrade_clean_log(log_dir, version, shutdown)
            }
            None => {
                self.step(UpgradeStep::DirtyShutdown);
                if version >= self.config.min_dirty_recovery_version {
                    self.step(UpgradeStep::DeferToRecovery);
                    warn!(
                        target: "tidewal::upgrade",
                        found = version,
                        "Log was not shut down cleanly, leaving it to recovery"
                    );
                    Ok(self.finish(false, None))
                } else {
                    Err(UpgradeError::UpgradeFailure {
                        version,
                        reason: format!(
                            "dirty shutdown, recovery needs version {} or newer",
                            self.config.min_dirty_recovery_version
                        ),
                    })
                }
            }
        }
    }

    /// Shutdown record ending the newest segment, if there is one.
    fn verify_clean_shutdown_of_old_log(
        &mut self,
        log_dir: &Path,
    ) -> Result<Option<ShutdownRecord>, UpgradeError> {
        self.step(UpgradeStep::VerifyShutdown);

        let newest = match list_segments(log_dir)?.pop() {
            Some(newest) => newest,
            None => return Ok(None),
        };
        let mut cursor = self.source.open_segment(&newest.path)?;
        Ok(cursor.last()?.and_then(|entry| entry.as_shutdown()))
    }

    fn upgrade_clean_log(
        &mut self,
        log_dir: &Path,
        version: u32,
        shutdown: ShutdownRecord,
    ) -> Result<UpgradeOutcome, UpgradeError> {
        let before = list_segments(log_dir)?;
        if let Err(e) = self.write_upgraded_log(log_dir, version, shutdown) {
            if let Err(cleanup) = discard_upgrade_segments(log_dir, &before) {
                error!(
                    target: "tidewal::upgrade",
                    error = %cleanup,
                    "Could not remove segments left by the failed upgrade"
                );
            }
            return Err(e);
        }

        info!(
            target: "tidewal::upgrade",
            from = version,
            to = self.config.current_version,
            pre_upgrade_lsn = shutdown.lsn.as_u64(),
            "Log upgraded"
        );
        Ok(self.finish(true, Some(shutdown.lsn)))
    }

    fn write_upgraded_log(
        &mut self,
        log_dir: &Path,
        version: u32,
        shutdown: ShutdownRecord,
    ) -> Result<(), UpgradeError> {
        self.step(UpgradeStep::OpenUpgradeLogger);
        let logger = Logger::open(
            log_dir,
            self.config.clone(),
            LoggerStart::after(shutdown.lsn, shutdown.last_xid),
        )?;

        self.step(UpgradeStep::UpgradeCheckpoint);
        self.checkpointer
            .run_checkpoint(&logger, CheckpointReason::Upgrade)?;

        self.step(UpgradeStep::CloseUpgradeLogger);
        logger.close()?;

        self.step(UpgradeStep::VerifyUpgraded);
        self.verify_upgraded_log(log_dir, version, shutdown.lsn)
    }

    /// The log must now be current, end in a shutdown record, and have
    /// moved past the old one.
    fn verify_upgraded_log(
        &self,
        log_dir: &Path,
        version: u32,
        pre_upgrade_lsn: Lsn,
    ) -> Result<(), UpgradeError> {
        let failure = |reason: String| UpgradeError::UpgradeFailure { version, reason };

        let on_disk = version_of_logs_on_disk(log_dir)?;
        if on_disk != Some(self.config.current_version) {
            return Err(failure(format!(
                "log reports version {:?} after upgrade",
                on_disk
            )));
        }

        let mut cursor = self.source.open_log(log_dir)?;
        match cursor.last()?.and_then(|entry| entry.as_shutdown()) {
            Some(shutdown) if shutdown.lsn > pre_upgrade_lsn => Ok(()),
            Some(shutdown) => Err(failure(format!(
                "shutdown record at {} does not follow {}",
                shutdown.lsn, pre_upgrade_lsn
            ))),
            None => Err(failure("upgraded log has no shutdown record".to_string())),
        }
    }

    fn step(&mut self, step: UpgradeStep) {
        tracing::debug!(target: "tidewal::upgrade", ?step, "Upgrade step");
        self.trail.push(step);
    }

    fn finish(&mut self, did_upgrade: bool, pre_upgrade_lsn: Option<Lsn>) -> UpgradeOutcome {
        self.step(UpgradeStep::Done);
        UpgradeOutcome {
            did_upgrade,
            pre_upgrade_lsn,
            trail: self.trail.clone(),
        }
    }
}

/// Undo a failed upgrade: delete the segments newer than `before`.
///
/// Left in place they would make the next startup read the log as current
/// and skip the upgrade. If the checkpoint already trimmed any of `before`,
/// the new segments hold the only copy of that history and are kept.
fn discard_upgrade_segments(log_dir: &Path, before: &[SegmentFile]) -> Result<(), LogError> {
    let now = list_segments(log_dir)?;
    if !before.iter().all(|segment| now.contains(segment)) {
        warn!(
            target: "tidewal::upgrade",
            "Old segments were trimmed before the upgrade failed, keeping new segments"
        );
        return Ok(());
    }

    let newest_before = before.last().map(|segment| segment.name.index);
    for segment in now
        .iter()
        .filter(|segment| Some(segment.name.index) > newest_before)
    {
        match std::fs::remove_file(&segment.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(LogError::Io(e)),
        }
        warn!(
            target: "tidewal::upgrade",
            segment = segment.name.index,
            version = segment.name.version,
            "Removed segment left by failed upgrade"
        );
    }
    Ok(())
}

fn resolve_log_dir(env_dir: &Path, log_dir: &Path) -> PathBuf {
    if log_dir.is_absolute() {
        log_dir.to_path_buf()
    } else {
        env_dir.join(log_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{CheckpointInfo, LogCheckpointer};
    use crate::format::{LogEntry, LogEntryBody, SegmentWriter};
    use tempfile::tempdir;
    use tidewal_core::TxnId;

    struct FailingCheckpointer;

    impl CheckpointDriver for FailingCheckpointer {
        fn run_checkpoint(
            &self,
            _logger: &Logger,
            _reason: CheckpointReason,
        ) -> Result<CheckpointInfo, CheckpointError> {
            Err(CheckpointError::Aborted("injected".into()))
        }
    }

    fn write_clean_segment(dir: &Path, version: u32, last_lsn: u64) {
        let mut writer = SegmentWriter::create(dir, 0, version).unwrap();
        for lsn in 1..last_lsn {
            writer
                .append(&LogEntry::new(Lsn::new(lsn), LogEntryBody::Comment(String::new())))
                .unwrap();
        }
        writer
            .append(&LogEntry::new(
                Lsn::new(last_lsn),
                LogEntryBody::Shutdown {
                    last_xid: TxnId::new(7),
                },
            ))
            .unwrap();
        writer.sync().unwrap();
    }

    fn upgrader() -> LogUpgrader {
        LogUpgrader::new(LogConfig::default(), Arc::new(LogCheckpointer::new()))
    }

    #[test]
    fn test_relative_log_dir_resolves_under_env() {
        let env = tempdir().unwrap();
        std::fs::create_dir(env.path().join("log")).unwrap();
        write_clean_segment(&env.path().join("log"), 29, 3);

        let outcome = upgrader().run(env.path(), Path::new("log")).unwrap();
        assert_eq!(
            outcome.trail,
            vec![
                UpgradeStep::Start,
                UpgradeStep::CurrentVersion,
                UpgradeStep::Done
            ]
        );
    }

    #[test]
    fn test_missing_log_dir_counts_as_no_logs() {
        let env = tempdir().unwrap();
        let outcome = upgrader().run(env.path(), Path::new("absent")).unwrap();
        assert!(!outcome.did_upgrade);
        assert_eq!(outcome.trail[1], UpgradeStep::NoLogsFound);
    }

    #[test]
    fn test_failed_checkpoint_keeps_trail() {
        let env = tempdir().unwrap();
        write_clean_segment(env.path(), 27, 5);
        let before = list_segments(env.path()).unwrap();

        let mut upgrader =
            LogUpgrader::new(LogConfig::default(), Arc::new(FailingCheckpointer));
        let err = upgrader.run(env.path(), env.path()).unwrap_err();
        assert!(matches!(err, UpgradeError::Checkpoint(_)));
        assert_eq!(upgrader.trail().last(), Some(&UpgradeStep::UpgradeCheckpoint));
        assert!(!upgrader.trail().contains(&UpgradeStep::Done));

        // The temporary logger's segment is gone and the old log is intact
        assert_eq!(list_segments(env.path()).unwrap(), before);
        assert_eq!(version_of_logs_on_disk(env.path()).unwrap(), Some(27));
    }

    #[test]
    fn test_failed_upgrade_is_retried_on_next_run() {
        let env = tempdir().unwrap();
        write_clean_segment(env.path(), 23, 4);

        let mut failing =
            LogUpgrader::new(LogConfig::default(), Arc::new(FailingCheckpointer));
        assert!(failing.run(env.path(), env.path()).is_err());

        let outcome = upgrader().run(env.path(), env.path()).unwrap();
        assert!(outcome.did_upgrade);
        assert_eq!(outcome.pre_upgrade_lsn, Some(Lsn::new(4)));
        assert!(outcome.trail.contains(&UpgradeStep::UpgradeCheckpoint));
        assert_eq!(
            version_of_logs_on_disk(env.path()).unwrap(),
            Some(LogConfig::default().current_version)
        );
    }

    #[test]
    fn test_trail_resets_between_runs() {
        let env = tempdir().unwrap();
        let mut upgrader = upgrader();
        upgrader.run(env.path(), env.path()).unwrap();
        upgrader.run(env.path(), env.path()).unwrap();
        assert_eq!(upgrader.trail().len(), 3);
    }
}
