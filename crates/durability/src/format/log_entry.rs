//! Log entries and their record framing.
//!
//! # Record Layout
//!
//! ```text
//! ┌─────────────────┬──────────────────────────────┬──────────┐
//! │ Length (4 bytes)│ Payload (MessagePack entry)  │ CRC32 (4)│
//! └─────────────────┴──────────────────────────────┴──────────┘
//! ```
//!
//! The length field counts payload bytes only. The CRC covers the payload.
//! A length above `MAX_RECORD_PAYLOAD` is never written, so reading one
//! means the length field itself is damaged.

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use tidewal_core::{Lsn, TxnId, TxnIdPair};

use super::LogError;

/// Bytes of framing around each payload (length + crc).
pub const RECORD_OVERHEAD: usize = 8;

/// Largest payload a record may carry (64 MiB).
pub const MAX_RECORD_PAYLOAD: usize = 64 * 1024 * 1024;

/// One entry in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Sequence number assigned when the entry was appended.
    pub lsn: Lsn,
    /// What happened.
    pub body: LogEntryBody,
}

/// Entry payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogEntryBody {
    /// A transaction began.
    BeginTxn {
        /// Transaction id pair
        xid: TxnIdPair,
    },
    /// A transaction committed.
    CommitTxn {
        /// Transaction id pair
        xid: TxnIdPair,
    },
    /// A transaction aborted.
    AbortTxn {
        /// Transaction id pair
        xid: TxnIdPair,
    },
    /// A checkpoint began.
    BeginCheckpoint {
        /// Highest root transaction id handed out so far
        last_xid: TxnId,
    },
    /// A checkpoint completed.
    EndCheckpoint {
        /// LSN of the matching `BeginCheckpoint`
        begin_lsn: Lsn,
    },
    /// Free-form annotation.
    Comment(String),
    /// Written only by an orderly close; always the last entry of the log.
    Shutdown {
        /// Highest root transaction id handed out before the close
        last_xid: TxnId,
    },
}

/// The facts carried by a clean-shutdown entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownRecord {
    /// Sequence number of the shutdown entry
    pub lsn: Lsn,
    /// Highest root transaction id handed out before the close
    pub last_xid: TxnId,
}

impl LogEntry {
    /// Create an entry.
    pub fn new(lsn: Lsn, body: LogEntryBody) -> Self {
        LogEntry { lsn, body }
    }

    /// The shutdown record, if this entry is one.
    pub fn as_shutdown(&self) -> Option<ShutdownRecord> {
        match self.body {
            LogEntryBody::Shutdown { last_xid } => Some(ShutdownRecord {
                lsn: self.lsn,
                last_xid,
            }),
            _ => None,
        }
    }

    /// Short name of the entry kind, for logs and diagnostics.
    pub fn kind(&self) -> &'static str {
        match self.body {
            LogEntryBody::BeginTxn { .. } => "begin_txn",
            LogEntryBody::CommitTxn { .. } => "commit_txn",
            LogEntryBody::AbortTxn { .. } => "abort_txn",
            LogEntryBody::BeginCheckpoint { .. } => "begin_checkpoint",
            LogEntryBody::EndCheckpoint { .. } => "end_checkpoint",
            LogEntryBody::Comment(_) => "comment",
            LogEntryBody::Shutdown { .. } => "shutdown",
        }
    }

    /// Serialize to a framed record.
    pub fn to_record(&self) -> Result<Vec<u8>, LogError> {
        let payload = rmp_serde::to_vec(self)?;
        if payload.len() > MAX_RECORD_PAYLOAD {
            return Err(LogError::Encode(format!(
                "entry of {} bytes exceeds the {} byte record limit",
                payload.len(),
                MAX_RECORD_PAYLOAD
            )));
        }
        let crc = compute_crc(&payload);

        let mut record = Vec::with_capacity(payload.len() + RECORD_OVERHEAD);
        record.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        record.extend_from_slice(&payload);
        record.extend_from_slice(&crc.to_le_bytes());
        Ok(record)
    }

    /// Parse one framed record from the front of `bytes`.
    ///
    /// Returns the entry and the number of bytes consumed.
    pub fn from_record(bytes: &[u8]) -> Result<(Self, usize), RecordError> {
        if bytes.len() < 4 {
            return Err(RecordError::InsufficientData);
        }
        let length = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if length > MAX_RECORD_PAYLOAD {
            return Err(RecordError::TooLarge {
                length,
                max: MAX_RECORD_PAYLOAD,
            });
        }
        let total = length + RECORD_OVERHEAD;
        if bytes.len() < total {
            return Err(RecordError::InsufficientData);
        }

        let payload = &bytes[4..4 + length];
        let crc_bytes = &bytes[4 + length..total];
        let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let computed = compute_crc(payload);
        if stored != computed {
            return Err(RecordError::ChecksumMismatch { stored, computed });
        }

        let entry: LogEntry =
            rmp_serde::from_slice(payload).map_err(|e| RecordError::Decode(e.to_string()))?;
        Ok((entry, total))
    }
}

fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Record parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// Not enough bytes for a whole record (torn tail)
    #[error("insufficient data to parse record")]
    InsufficientData,

    /// Length prefix is beyond anything a writer produces
    #[error("record length {length} exceeds maximum {max}")]
    TooLarge {
        /// Length read from the prefix
        length: usize,
        /// Largest valid payload length
        max: usize,
    },

    /// Checksum verification failed
    #[error("checksum mismatch: stored {stored:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// CRC stored in the record
        stored: u32,
        /// CRC computed over the payload
        computed: u32,
    },

    /// Payload passed its CRC but is not a valid entry
    #[error("undecodable payload: {0}")]
    Decode(String),
}
