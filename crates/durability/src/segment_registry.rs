//! Registry of on-disk log segments.
//!
//! The registry remembers, for every segment still on disk, its index, its
//! format version, and the highest LSN it holds. Segments are appended at the
//! tail when the logger opens them and removed from the head when a
//! checkpoint makes them obsolete, so the list is always ordered oldest
//! first and the highest LSNs are non-decreasing along it.
//!
//! # Concurrency
//!
//! The registry does no locking of its own. Its owner serializes access;
//! the `Logger` keeps it behind the same mutex that guards the active
//! segment.

use std::collections::VecDeque;
use std::fmt;
use std::path::Path;

use tidewal_core::Lsn;

use crate::cursor::LogSource;
use crate::format::{list_segments, LogError, ShutdownRecord};

/// What the registry knows about one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSegmentInfo {
    /// Segment index
    pub index: i64,
    /// Highest LSN written to the segment
    pub max_lsn: Lsn,
    /// Format version the segment was written in
    pub version: u32,
}

impl LogSegmentInfo {
    /// Create segment info.
    pub fn new(index: i64, max_lsn: Lsn, version: u32) -> Self {
        LogSegmentInfo {
            index,
            max_lsn,
            version,
        }
    }
}

/// Result of scanning one segment file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentDescriptor {
    /// Segment index
    pub index: i64,
    /// Format version
    pub version: u32,
    /// LSN of the segment's last entry, `None` for a segment with no entries
    pub last_lsn: Option<Lsn>,
    /// Set when the last entry is a clean-shutdown record
    pub shutdown: Option<ShutdownRecord>,
}

/// Ordered registry of log segments, oldest first.
#[derive(Debug, Default)]
pub struct LogSegmentRegistry {
    segments: VecDeque<LogSegmentInfo>,
}

impl LogSegmentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append scanned segments in file order.
    ///
    /// A segment with no entries inherits the highest LSN of the segment
    /// before it. Returns the shutdown record that ends the log, if the
    /// newest segment holding entries ends in one.
    pub fn init<I>(&mut self, descriptors: I) -> Option<ShutdownRecord>
    where
        I: IntoIterator<Item = SegmentDescriptor>,
    {
        let mut running = self.last_lsn();
        let mut clean = None;

        for descriptor in descriptors {
            let max_lsn = match descriptor.last_lsn {
                Some(lsn) => {
                    if lsn < running {
                        tracing::warn!(
                            target: "tidewal::log",
                            index = descriptor.index,
                            lsn = lsn.as_u64(),
                            previous = running.as_u64(),
                            "Segment ends below the previous segment's LSN"
                        );
                    }
                    clean = descriptor.shutdown;
                    lsn
                }
                None => running,
            };
            running = max_lsn;
            self.add_segment_info(LogSegmentInfo::new(
                descriptor.index,
                max_lsn,
                descriptor.version,
            ));
        }

        clean
    }

    /// Append a segment; it becomes the newest.
    pub fn add_segment_info(&mut self, info: LogSegmentInfo) {
        debug_assert!(
            self.segments.back().map_or(true, |last| last.index < info.index),
            "segments must be added in index order"
        );
        self.segments.push_back(info);
    }

    /// The oldest segment, if any.
    pub fn oldest(&self) -> Option<&LogSegmentInfo> {
        self.segments.front()
    }

    /// Remove and return the oldest segment. Does nothing on an empty registry.
    pub fn delete_oldest(&mut self) -> Option<LogSegmentInfo> {
        self.segments.pop_front()
    }

    /// The newest segment, if any.
    pub fn newest(&self) -> Option<&LogSegmentInfo> {
        self.segments.back()
    }

    /// Highest LSN of the newest segment, `Lsn::ZERO` when empty.
    pub fn last_lsn(&self) -> Lsn {
        self.segments.back().map_or(Lsn::ZERO, |s| s.max_lsn)
    }

    /// Record that the newest segment now reaches `lsn`.
    ///
    /// Callers only ever move the LSN forward.
    pub fn update_last_lsn(&mut self, lsn: Lsn) {
        debug_assert!(!self.segments.is_empty(), "update_last_lsn on an empty registry");
        if let Some(last) = self.segments.back_mut() {
            debug_assert!(lsn >= last.max_lsn, "last LSN moved backwards");
            last.max_lsn = lsn;
        }
    }

    /// Number of registered segments.
    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    /// True when no segments are registered.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segments oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &LogSegmentInfo> {
        self.segments.iter()
    }
}

impl fmt::Display for LogSegmentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, s) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}@v{}<={}", s.index, s.version, s.max_lsn)?;
        }
        write!(f, "]")
    }
}

/// Describe every segment in `log_dir`, oldest first, by reading each one's
/// last entry.
pub fn scan_segments(
    log_dir: &Path,
    source: &dyn LogSource,
) -> Result<Vec<SegmentDescriptor>, LogError> {
    let mut descriptors = Vec::new();
    for segment in list_segments(log_dir)? {
        let mut cursor = source.open_segment(&segment.path)?;
        let last = cursor.last()?;
        descriptors.push(SegmentDescriptor {
            index: segment.name.index,
            version: segment.name.version,
            last_lsn: last.as_ref().map(|e| e.lsn),
            shutdown: last.as_ref().and_then(|e| e.as_shutdown()),
        });
    }
    Ok(descriptors)
}
