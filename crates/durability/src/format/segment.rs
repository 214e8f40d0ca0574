//! Segment files.
//!
//! # Segment Layout
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │ Segment Header (16 bytes)          │
//! │   magic "TLOG" | version | index   │
//! ├────────────────────────────────────┤
//! │ Record 1                           │
//! ├────────────────────────────────────┤
//! │ ...                                │
//! └────────────────────────────────────┘
//! ```
//!
//! Only the active segment is ever appended to. A record cut short by a
//! crash ends the readable part of the segment; a complete record with a bad
//! checksum is reported as corruption.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use super::log_entry::{LogEntry, RecordError};
use super::segment_name::SegmentName;
use super::LogError;

/// Magic bytes identifying a segment file: "TLOG"
pub const SEGMENT_MAGIC: [u8; 4] = *b"TLOG";

/// Size of the segment header in bytes
pub const SEGMENT_HEADER_SIZE: usize = 16;

/// Segment header (16 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Magic bytes: "TLOG"
    pub magic: [u8; 4],
    /// Format version the segment was written in
    pub format_version: u32,
    /// Segment index
    pub index: i64,
}

impl SegmentHeader {
    /// Create a header for a new segment.
    pub fn new(index: i64, format_version: u32) -> Self {
        SegmentHeader {
            magic: SEGMENT_MAGIC,
            format_version,
            index,
        }
    }

    /// Serialize header to bytes.
    pub fn to_bytes(&self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut bytes = [0u8; SEGMENT_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..8].copy_from_slice(&self.format_version.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.index.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes.
    pub fn from_bytes(bytes: &[u8; SEGMENT_HEADER_SIZE]) -> Option<Self> {
        Some(SegmentHeader {
            magic: bytes[0..4].try_into().ok()?,
            format_version: u32::from_le_bytes(bytes[4..8].try_into().ok()?),
            index: i64::from_le_bytes(bytes[8..16].try_into().ok()?),
        })
    }

    /// Validate the header has correct magic bytes.
    pub fn is_valid(&self) -> bool {
        self.magic == SEGMENT_MAGIC
    }
}

/// Append handle for the active segment.
pub struct SegmentWriter {
    file: File,
    name: SegmentName,
    path: PathBuf,
    size: u64,
}

impl SegmentWriter {
    /// Create a new segment file and write its header.
    ///
    /// Fails if a file with the same name already exists.
    pub fn create(dir: &Path, index: i64, format_version: u32) -> Result<Self, LogError> {
        let name = SegmentName::new(index, format_version);
        let path = name.path(dir);

        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)?;
        file.write_all(&SegmentHeader::new(index, format_version).to_bytes())?;
        file.sync_all()?;

        // Make the new directory entry durable
        File::open(dir)?.sync_all()?;

        Ok(SegmentWriter {
            file,
            name,
            path,
            size: SEGMENT_HEADER_SIZE as u64,
        })
    }

    /// Append one entry. Returns the number of bytes written.
    pub fn append(&mut self, entry: &LogEntry) -> Result<u64, LogError> {
        let record = entry.to_record()?;
        self.file.write_all(&record)?;
        self.size += record.len() as u64;
        Ok(record.len() as u64)
    }

    /// fsync the segment.
    pub fn sync(&mut self) -> Result<(), LogError> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Decoded name of this segment.
    pub fn name(&self) -> SegmentName {
        self.name
    }

    /// Path of this segment.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far, header included.
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Everything readable from one segment.
#[derive(Debug, Clone)]
pub struct SegmentContents {
    /// Decoded header
    pub header: SegmentHeader,
    /// Entries in file order
    pub entries: Vec<LogEntry>,
    /// True when a partially written record was dropped from the tail
    pub torn_tail: bool,
}

/// Read and validate a whole segment.
pub fn read_segment(path: &Path) -> Result<SegmentContents, LogError> {
    let name = SegmentName::from_path(path)?;

    let mut buffer = Vec::new();
    File::open(path)?.read_to_end(&mut buffer)?;

    if buffer.len() < SEGMENT_HEADER_SIZE {
        return Err(LogError::InvalidHeader {
            path: path.to_path_buf(),
        });
    }
    let mut header_bytes = [0u8; SEGMENT_HEADER_SIZE];
    header_bytes.copy_from_slice(&buffer[..SEGMENT_HEADER_SIZE]);
    let header = SegmentHeader::from_bytes(&header_bytes)
        .filter(|h| h.is_valid())
        .ok_or_else(|| LogError::InvalidHeader {
            path: path.to_path_buf(),
        })?;

    if header.format_version != name.version {
        return Err(LogError::VersionMismatch {
            path: path.to_path_buf(),
            header: header.format_version,
            name: name.version,
        });
    }

    let mut entries = Vec::new();
    let mut offset = SEGMENT_HEADER_SIZE;
    let mut torn_tail = false;

    while offset < buffer.len() {
        match LogEntry::from_record(&buffer[offset..]) {
            Ok((entry, consumed)) => {
                entries.push(entry);
                offset += consumed;
            }
            Err(RecordError::InsufficientData) => {
                tracing::warn!(
                    target: "tidewal::log",
                    path = %path.display(),
                    offset,
                    "Ignoring partially written record at segment tail"
                );
                torn_tail = true;
                break;
            }
            Err(RecordError::TooLarge { length, max }) => {
                return Err(LogError::RecordTooLarge {
                    path: path.to_path_buf(),
                    offset: offset as u64,
                    length,
                    max,
                });
            }
            Err(RecordError::ChecksumMismatch { stored, computed }) => {
                return Err(LogError::ChecksumMismatch {
                    path: path.to_path_buf(),
                    offset: offset as u64,
                    stored,
                    computed,
                });
            }
            Err(RecordError::Decode(detail)) => return Err(LogError::Decode(detail)),
        }
    }

    Ok(SegmentContents {
        header,
        entries,
        torn_tail,
    })
}
