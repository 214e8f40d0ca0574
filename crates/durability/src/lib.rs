//! Durability layer for tidewal
//!
//! This crate handles everything that touches the log directory:
//!
//! - Segment files: naming, headers, framed log entries
//! - Cursors over a whole log or a single segment
//! - `LogSegmentRegistry`: in-memory view of the segments on disk
//! - `Logger`: LSN assignment, segment rotation, trimming, clean shutdown
//! - Checkpoints that bracket a recovery point and trim the log
//! - `LogUpgrader`: the startup version check and format upgrade

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint; // Checkpoint driver and log trimming
pub mod config; // LogConfig
pub mod cursor; // LogCursor / LogSource and the file-backed cursor
pub mod format; // On-disk segment and entry formats
pub mod logger; // Active-segment writer
pub mod segment_registry; // Ordered segment metadata
pub mod upgrade; // Startup upgrade workflow

pub use checkpoint::{
    CheckpointDriver, CheckpointError, CheckpointInfo, CheckpointReason, LogCheckpointer,
};
pub use config::{LogConfig, LogConfigError};
pub use cursor::{FileLogCursor, FileLogSource, LogCursor, LogSource};
pub use format::{
    list_segments, read_segment, version_of_logs_on_disk, LogEntry, LogEntryBody, LogError,
    SegmentName, SegmentWriter, ShutdownRecord,
};
pub use logger::{Logger, LoggerStart};
pub use segment_registry::{scan_segments, LogSegmentInfo, LogSegmentRegistry, SegmentDescriptor};
pub use upgrade::{LogUpgrader, UpgradeError, UpgradeOutcome, UpgradeStep};
