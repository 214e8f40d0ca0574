//! Errors raised while naming, writing, or reading log segments.

use std::path::PathBuf;

/// Log segment errors.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// I/O error during segment access.
    #[error("log I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File name does not follow the segment naming scheme.
    #[error("not a log segment name: {0}")]
    InvalidSegmentName(String),

    /// Segment header is missing or has the wrong magic bytes.
    #[error("invalid segment header in {}", path.display())]
    InvalidHeader {
        /// Segment file path
        path: PathBuf,
    },

    /// Version in the header disagrees with the version in the file name.
    #[error("segment {} claims version {header} but is named as version {name}", path.display())]
    VersionMismatch {
        /// Segment file path
        path: PathBuf,
        /// Version stored in the header
        header: u32,
        /// Version encoded in the file name
        name: u32,
    },

    /// A complete record failed its CRC check.
    #[error("checksum mismatch in {} at offset {offset}: stored {stored:#010x}, computed {computed:#010x}", path.display())]
    ChecksumMismatch {
        /// Segment file path
        path: PathBuf,
        /// Byte offset of the record within the segment
        offset: u64,
        /// CRC stored in the record
        stored: u32,
        /// CRC computed over the payload
        computed: u32,
    },

    /// A record's length prefix is larger than any record ever written.
    #[error("record at offset {offset} in {} claims {length} bytes (max {max})", path.display())]
    RecordTooLarge {
        /// Segment file path
        path: PathBuf,
        /// Byte offset of the record within the segment
        offset: u64,
        /// Length read from the prefix
        length: usize,
        /// Largest valid payload length
        max: usize,
    },

    /// A segment that newer segments follow ends in a partial record.
    ///
    /// Only the newest segment can be cut short by a crash; anywhere else
    /// the missing bytes were already synced and are lost.
    #[error("segment {} ends in a partial record but is not the newest segment", path.display())]
    TruncatedSegment {
        /// Segment file path
        path: PathBuf,
    },

    /// Record payload could not be decoded.
    #[error("cannot decode log entry: {0}")]
    Decode(String),

    /// Log entry could not be encoded.
    #[error("cannot encode log entry: {0}")]
    Encode(String),
}

impl From<rmp_serde::decode::Error> for LogError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        LogError::Decode(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for LogError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        LogError::Encode(e.to_string())
    }
}

impl From<LogError> for tidewal_core::Error {
    fn from(e: LogError) -> Self {
        match e {
            LogError::Io(io) => tidewal_core::Error::IoError(io),
            other => tidewal_core::Error::Corruption(other.to_string()),
        }
    }
}
