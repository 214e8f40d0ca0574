//! Logger: appends entries to the active segment.
//!
//! The logger owns the log directory while the engine runs. On open it scans
//! the segments already on disk into a `LogSegmentRegistry`, then starts a
//! fresh segment in the current format version. Every append assigns the
//! next LSN and advances the registry's last LSN; segments rotate once the
//! active one grows past `max_segment_size`.
//!
//! All mutable state sits behind one mutex, which is also what serializes
//! access to the registry.
//!
//! # Lifecycle
//!
//! ```text
//! open / open_existing ──> append* ──> [checkpoint + trim_before]* ──> close
//!                                                                     (Shutdown entry, fsync)
//! ```
//!
//! Dropping a logger without `close` leaves no shutdown record, which the
//! next startup treats as a dirty shutdown.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tidewal_core::{Lsn, TxnId};
use tracing::{debug, info};

use crate::config::LogConfig;
use crate::cursor::{FileLogSource, LogCursor, LogSource};
use crate::format::{LogEntry, LogEntryBody, LogError, SegmentName, SegmentWriter};
use crate::segment_registry::{scan_segments, LogSegmentInfo, LogSegmentRegistry};

/// Where a logger starts numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggerStart {
    /// LSN given to the first appended entry
    pub first_lsn: Lsn,
    /// Highest root transaction id already handed out
    pub last_xid: TxnId,
}

impl LoggerStart {
    /// Continue after `lsn`, with `last_xid` already used.
    pub fn after(lsn: Lsn, last_xid: TxnId) -> Self {
        LoggerStart {
            first_lsn: lsn.next(),
            last_xid,
        }
    }
}

impl Default for LoggerStart {
    fn default() -> Self {
        LoggerStart::after(Lsn::ZERO, TxnId::NONE)
    }
}

struct LoggerInner {
    registry: LogSegmentRegistry,
    active: SegmentWriter,
    next_lsn: Lsn,
    last_xid: TxnId,
    /// First LSN of every root transaction not yet committed or aborted
    live_roots: BTreeMap<TxnId, Lsn>,
}

/// Write side of the log.
pub struct Logger {
    log_dir: PathBuf,
    config: LogConfig,
    inner: Mutex<LoggerInner>,
}

impl Logger {
    /// Open a logger that numbers entries from `start`.
    ///
    /// Existing segments are registered and left untouched; appends go to a
    /// new segment written in `config.current_version`.
    pub fn open(log_dir: &Path, config: LogConfig, start: LoggerStart) -> Result<Self, LogError> {
        std::fs::create_dir_all(log_dir)?;

        let mut registry = LogSegmentRegistry::new();
        registry.init(scan_segments(log_dir, &FileLogSource)?);

        let on_disk = registry.last_lsn();
        let next_lsn = if start.first_lsn > on_disk {
            start.first_lsn
        } else {
            debug!(
                target: "tidewal::logger",
                requested = start.first_lsn.as_u64(),
                on_disk = on_disk.as_u64(),
                "Requested first LSN is not above the log, continuing after it"
            );
            on_disk.next()
        };

        let index = registry.newest().map_or(0, |s| s.index + 1);
        let active = SegmentWriter::create(log_dir, index, config.current_version)?;
        registry.add_segment_info(LogSegmentInfo::new(
            index,
            Lsn::new(next_lsn.as_u64() - 1),
            config.current_version,
        ));

        info!(
            target: "tidewal::logger",
            log_dir = %log_dir.display(),
            segment = index,
            version = config.current_version,
            first_lsn = next_lsn.as_u64(),
            last_xid = start.last_xid.as_u64(),
            "Logger opened"
        );

        Ok(Logger {
            log_dir: log_dir.to_path_buf(),
            config,
            inner: Mutex::new(LoggerInner {
                registry,
                active,
                next_lsn,
                last_xid: start.last_xid,
                live_roots: BTreeMap::new(),
            }),
        })
    }

    /// Open a logger that continues the log already in `log_dir`.
    ///
    /// The start point is the newest LSN on disk and the highest root
    /// transaction id any entry mentions.
    pub fn open_existing(log_dir: &Path, config: LogConfig) -> Result<Self, LogError> {
        let start = Self::resume_point(log_dir, &FileLogSource)?;
        Self::open(log_dir, config, start)
    }

    fn resume_point(log_dir: &Path, source: &dyn LogSource) -> Result<LoggerStart, LogError> {
        let mut cursor = source.open_log(log_dir)?;
        let mut last_lsn = Lsn::ZERO;
        let mut last_xid = TxnId::NONE;

        while let Some(entry) = cursor.next()? {
            last_lsn = last_lsn.max(entry.lsn);
            let xid = match entry.body {
                LogEntryBody::BeginTxn { xid } => xid.parent_id,
                LogEntryBody::BeginCheckpoint { last_xid } => last_xid,
                LogEntryBody::Shutdown { last_xid } => last_xid,
                _ => TxnId::NONE,
            };
            last_xid = last_xid.max(xid);
        }

        Ok(LoggerStart::after(last_lsn, last_xid))
    }

    /// Append an entry and return its LSN.
    pub fn append(&self, body: LogEntryBody) -> Result<Lsn, LogError> {
        let mut inner = self.inner.lock();
        Self::append_locked(&mut inner, &self.log_dir, &self.config, body)
    }

    fn append_locked(
        inner: &mut LoggerInner,
        log_dir: &Path,
        config: &LogConfig,
        body: LogEntryBody,
    ) -> Result<Lsn, LogError> {
        let lsn = inner.next_lsn;

        match &body {
            LogEntryBody::BeginTxn { xid } if xid.is_root() => {
                inner.live_roots.insert(xid.parent_id, lsn);
            }
            LogEntryBody::CommitTxn { xid } | LogEntryBody::AbortTxn { xid } if xid.is_root() => {
                inner.live_roots.remove(&xid.parent_id);
            }
            _ => {}
        }

        inner.active.append(&LogEntry::new(lsn, body))?;
        inner.registry.update_last_lsn(lsn);
        inner.next_lsn = lsn.next();

        if inner.active.size() >= config.max_segment_size {
            Self::rotate_locked(inner, log_dir, config)?;
        }
        Ok(lsn)
    }

    fn rotate_locked(
        inner: &mut LoggerInner,
        log_dir: &Path,
        config: &LogConfig,
    ) -> Result<(), LogError> {
        inner.active.sync()?;
        let index = inner.active.name().index + 1;
        inner.active = SegmentWriter::create(log_dir, index, config.current_version)?;
        let last = inner.registry.last_lsn();
        inner
            .registry
            .add_segment_info(LogSegmentInfo::new(index, last, config.current_version));

        debug!(
            target: "tidewal::logger",
            segment = index,
            last_lsn = last.as_u64(),
            "Rotated to new segment"
        );
        Ok(())
    }

    /// fsync the active segment.
    pub fn sync(&self) -> Result<(), LogError> {
        self.inner.lock().active.sync()
    }

    /// Hand out the next root transaction id.
    pub fn next_xid(&self) -> TxnId {
        let mut inner = self.inner.lock();
        inner.last_xid = TxnId::new(inner.last_xid.as_u64() + 1);
        inner.last_xid
    }

    /// Highest root transaction id handed out so far.
    pub fn last_xid(&self) -> TxnId {
        self.inner.lock().last_xid
    }

    /// LSN of the newest entry, or the LSN just before the first one.
    pub fn last_lsn(&self) -> Lsn {
        self.inner.lock().registry.last_lsn()
    }

    /// First LSN of the oldest root transaction still running.
    pub fn oldest_live_lsn(&self) -> Option<Lsn> {
        self.inner.lock().live_roots.values().min().copied()
    }

    /// Number of segments on disk.
    pub fn num_segments(&self) -> usize {
        self.inner.lock().registry.num_segments()
    }

    /// Run `f` against the segment registry while holding the logger lock.
    pub fn with_registry<R>(&self, f: impl FnOnce(&LogSegmentRegistry) -> R) -> R {
        f(&self.inner.lock().registry)
    }

    /// Delete the oldest segments whose entries all precede `lsn`.
    ///
    /// The active segment is never deleted. Returns how many were removed.
    pub fn trim_before(&self, lsn: Lsn) -> Result<usize, LogError> {
        let mut inner = self.inner.lock();
        let mut removed = 0;

        while inner.registry.num_segments() > 1 {
            let oldest = match inner.registry.oldest() {
                Some(oldest) if oldest.max_lsn < lsn => *oldest,
                _ => break,
            };

            let path = SegmentName::new(oldest.index, oldest.version).path(&self.log_dir);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(LogError::Io(e)),
            }
            inner.registry.delete_oldest();
            removed += 1;

            debug!(
                target: "tidewal::logger",
                segment = oldest.index,
                version = oldest.version,
                max_lsn = oldest.max_lsn.as_u64(),
                "Trimmed log segment"
            );
        }

        if removed > 0 {
            std::fs::File::open(&self.log_dir)?.sync_all()?;
            info!(
                target: "tidewal::logger",
                removed,
                remaining = inner.registry.num_segments(),
                "Log trimmed"
            );
        }
        Ok(removed)
    }

    /// Log directory.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Configuration in effect.
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Write the clean-shutdown record and fsync.
    ///
    /// Returns the LSN of the shutdown record.
    pub fn close(self) -> Result<Lsn, LogError> {
        let Logger {
            log_dir,
            config,
            inner,
        } = self;
        let mut inner = inner.into_inner();

        let last_xid = inner.last_xid;
        let lsn = Self::append_locked(
            &mut inner,
            &log_dir,
            &config,
            LogEntryBody::Shutdown { last_xid },
        )?;
        inner.active.sync()?;

        info!(
            target: "tidewal::logger",
            lsn = lsn.as_u64(),
            last_xid = last_xid.as_u64(),
            segments = inner.registry.num_segments(),
            "Logger closed cleanly"
        );
        Ok(lsn)
    }
}
