//! On-disk byte formats for log segments.
//!
//! This module centralizes all serialization logic for the log. Keeping it
//! separate from how segments are tracked and written (registry, logger)
//! makes format evolution easier to manage.
//!
//! # Module Structure
//!
//! - `segment_name`: segment file naming and directory scans
//! - `segment`: segment header, writer, and reader
//! - `log_entry`: log entries and their record framing
//! - `error`: `LogError`

pub mod error;
pub mod log_entry;
pub mod segment;
pub mod segment_name;

pub use error::LogError;
pub use log_entry::{
    LogEntry, LogEntryBody, RecordError, ShutdownRecord, MAX_RECORD_PAYLOAD, RECORD_OVERHEAD,
};
pub use segment::{
    read_segment, SegmentContents, SegmentHeader, SegmentWriter, SEGMENT_HEADER_SIZE,
    SEGMENT_MAGIC,
};
pub use segment_name::{
    list_segments, version_of_logs_on_disk, SegmentFile, SegmentName, SEGMENT_EXTENSION,
    SEGMENT_PREFIX,
};
