//! Checkpoints
//!
//! A checkpoint brackets a durable recovery point with `BeginCheckpoint` and
//! `EndCheckpoint` entries, fsyncs the log, and then trims segments that no
//! longer hold anything recovery could need.
//!
//! # Algorithm
//!
//! 1. Append `BeginCheckpoint` carrying the last handed-out root xid
//! 2. Append `EndCheckpoint` pointing back at the begin LSN
//! 3. fsync the active segment
//! 4. Trim segments whose entries all precede both the begin LSN and the
//!    first entry of the oldest live root transaction
//!
//! # Safety
//!
//! - Never removes the active segment
//! - A crash between any two steps leaves a log that recovery can still
//!   replay; running the checkpoint again is harmless

use std::time::Instant;

use parking_lot::Mutex;
use tidewal_core::Lsn;
use tracing::{debug, info};

use crate::format::{LogEntryBody, LogError};
use crate::logger::Logger;

/// Why a checkpoint was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckpointReason {
    /// Periodic background checkpoint
    Scheduled,
    /// Explicitly requested by a client
    Client,
    /// Taken while the engine opens
    Startup,
    /// Forces the log into the current format during an upgrade
    Upgrade,
    /// Taken while the engine closes
    Shutdown,
}

impl CheckpointReason {
    /// Lowercase name used in log output.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointReason::Scheduled => "scheduled",
            CheckpointReason::Client => "client",
            CheckpointReason::Startup => "startup",
            CheckpointReason::Upgrade => "upgrade",
            CheckpointReason::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for CheckpointReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a completed checkpoint did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointInfo {
    /// Why it ran
    pub reason: CheckpointReason,
    /// LSN of the `BeginCheckpoint` entry
    pub begin_lsn: Lsn,
    /// LSN of the `EndCheckpoint` entry
    pub end_lsn: Lsn,
    /// Segments deleted by the trim step
    pub segments_trimmed: usize,
    /// Wall-clock time spent
    pub duration_ms: u64,
}

/// Checkpoint errors.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Writing, syncing, or trimming the log failed
    #[error("checkpoint log error: {0}")]
    Log(#[from] LogError),

    /// Another checkpoint is running on this driver
    ///
    /// Checkpoints are serialized so that trims never race each other.
    #[error("Checkpoint already in progress")]
    AlreadyInProgress,

    /// The driver gave up before completing
    #[error("checkpoint aborted: {0}")]
    Aborted(String),
}

/// Runs checkpoints against a logger.
pub trait CheckpointDriver: Send + Sync {
    /// Take one checkpoint.
    fn run_checkpoint(
        &self,
        logger: &Logger,
        reason: CheckpointReason,
    ) -> Result<CheckpointInfo, CheckpointError>;
}

/// Checkpoint driver that works purely on the log.
#[derive(Debug, Default)]
pub struct LogCheckpointer {
    running: Mutex<()>,
}

impl LogCheckpointer {
    /// Create a checkpointer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointDriver for LogCheckpointer {
    fn run_checkpoint(
        &self,
        logger: &Logger,
        reason: CheckpointReason,
    ) -> Result<CheckpointInfo, CheckpointError> {
        let _running = self
            .running
            .try_lock()
            .ok_or(CheckpointError::AlreadyInProgress)?;

        let start_time = Instant::now();
        debug!(target: "tidewal::checkpoint", %reason, "Checkpoint started");

        let begin_lsn = logger.append(LogEntryBody::BeginCheckpoint {
            last_xid: logger.last_xid(),
        })?;
        let end_lsn = logger.append(LogEntryBody::EndCheckpoint { begin_lsn })?;
        logger.sync()?;

        let trim_lsn = match logger.oldest_live_lsn() {
            Some(live) => live.min(begin_lsn),
            None => begin_lsn,
        };
        let segments_trimmed = logger.trim_before(trim_lsn)?;

        let info = CheckpointInfo {
            reason,
            begin_lsn,
            end_lsn,
            segments_trimmed,
            duration_ms: start_time.elapsed().as_millis() as u64,
        };

        info!(
            target: "tidewal::checkpoint",
            %reason,
            begin_lsn = begin_lsn.as_u64(),
            end_lsn = end_lsn.as_u64(),
            trimmed = segments_trimmed,
            duration_ms = info.duration_ms,
            "Checkpoint complete"
        );
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogConfig;
    use crate::cursor::{FileLogCursor, LogCursor};
    use crate::logger::LoggerStart;
    use tempfile::tempdir;
    use tidewal_core::TxnIdPair;

    fn fill(logger: &Logger, count: usize) {
        let filler = "c".repeat(512);
        for _ in 0..count {
            logger.append(LogEntryBody::Comment(filler.clone())).unwrap();
        }
    }

    #[test]
    fn test_checkpoint_brackets_entries() {
        let dir = tempdir().unwrap();
        let logger = Logger::open(dir.path(), LogConfig::default(), LoggerStart::default()).unwrap();
        logger.append(LogEntryBody::Comment("before".into())).unwrap();

        let info = LogCheckpointer::new()
            .run_checkpoint(&logger, CheckpointReason::Client)
            .unwrap();
        assert_eq!(info.reason, CheckpointReason::Client);
        assert_eq!(info.begin_lsn, Lsn::new(2));
        assert_eq!(info.end_lsn, Lsn::new(3));

        let mut cursor = FileLogCursor::open(dir.path()).unwrap();
        let last = cursor.last().unwrap().unwrap();
        assert_eq!(
            last.body,
            LogEntryBody::EndCheckpoint {
                begin_lsn: Lsn::new(2)
            }
        );
    }

    #[test]
    fn test_checkpoint_trims_old_segments() {
        let dir = tempdir().unwrap();
        let logger =
            Logger::open(dir.path(), LogConfig::for_testing(), LoggerStart::default()).unwrap();
        fill(&logger, 40);
        assert!(logger.num_segments() > 2);

        let info = LogCheckpointer::new()
            .run_checkpoint(&logger, CheckpointReason::Scheduled)
            .unwrap();
        assert!(info.segments_trimmed > 0);
        logger.with_registry(|registry| {
            assert!(registry.oldest().unwrap().max_lsn >= info.begin_lsn);
        });
    }

    #[test]
    fn test_live_transaction_holds_back_trim() {
        let dir = tempdir().unwrap();
        let logger =
            Logger::open(dir.path(), LogConfig::for_testing(), LoggerStart::default()).unwrap();
        let xid = TxnIdPair::root(logger.next_xid());
        let begin = logger.append(LogEntryBody::BeginTxn { xid }).unwrap();
        fill(&logger, 40);

        let checkpointer = LogCheckpointer::new();
        let info = checkpointer
            .run_checkpoint(&logger, CheckpointReason::Scheduled)
            .unwrap();
        assert_eq!(info.segments_trimmed, 0);
        logger.with_registry(|registry| {
            assert!(registry.oldest().unwrap().max_lsn >= begin);
        });

        logger.append(LogEntryBody::CommitTxn { xid }).unwrap();
        let info = checkpointer
            .run_checkpoint(&logger, CheckpointReason::Scheduled)
            .unwrap();
        assert!(info.segments_trimmed > 0);
    }

    #[test]
    fn test_repeated_checkpoints_are_harmless() {
        let dir = tempdir().unwrap();
        let logger =
            Logger::open(dir.path(), LogConfig::for_testing(), LoggerStart::default()).unwrap();
        fill(&logger, 20);

        let checkpointer = LogCheckpointer::new();
        let first = checkpointer
            .run_checkpoint(&logger, CheckpointReason::Client)
            .unwrap();
        let second = checkpointer
            .run_checkpoint(&logger, CheckpointReason::Client)
            .unwrap();
        assert!(second.begin_lsn > first.end_lsn);
        assert!(logger.num_segments() >= 1);
        assert_eq!(logger.last_lsn(), second.end_lsn);
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(CheckpointReason::Upgrade.to_string(), "upgrade");
        assert_eq!(CheckpointReason::Shutdown.as_str(), "shutdown");
    }
}
