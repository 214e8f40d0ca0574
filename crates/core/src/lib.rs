//! Core types for tidewal
//!
//! This crate defines the foundational types shared by the durability and
//! concurrency layers:
//! - Lsn: log sequence number, the ordering token for durability
//! - TxnId / TxnIdPair: root and nested transaction identifiers
//! - BlockNum: identifier of an on-disk block (rollback log nodes live in blocks)
//! - Log format versions understood by this build
//! - Error: Error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;
pub mod version;

pub use error::{Error, Result};
pub use types::{BlockNum, Lsn, TxnId, TxnIdPair};
pub use version::{
    LOG_VERSION_CURRENT, LOG_VERSION_LEGACY, LOG_VERSION_MIN_DIRTY_RECOVERY,
    LOG_VERSION_MIN_SUPPORTED,
};
