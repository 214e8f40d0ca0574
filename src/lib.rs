//! tidewal - write-ahead log durability and nested transaction bookkeeping
//!
//! tidewal is the layer beneath a write-ahead-logging storage engine that
//! keeps the log consistent across restarts and format changes:
//!
//! - Ordered registry of on-disk log segments and their LSN ranges
//! - One-time log format upgrade with clean-shutdown verification at startup
//! - Bounded pool of reusable rollback (undo-log) nodes
//! - Collision-free ids for nested transactions
//!
//! # Quick Start
//!
//! ```ignore
//! use tidewal::{Engine, Resolution};
//!
//! let engine = Engine::open("/path/to/env")?;
//!
//! let txns = engine.transactions();
//! let family = txns.begin_root()?;
//! let child = txns.begin_child(&family, &family.root())?;
//! txns.finish_child(&family, &child, Resolution::Commit)?;
//! txns.finish_root(family, Resolution::Commit)?;
//!
//! engine.close()?;
//! ```

pub use tidewal_concurrency::{
    ChildTransactionRegistry, MemoryBlockStore, Resolution, RollbackBlockStore, RollbackLogNode,
    RollbackNodePool, Transaction, TransactionError, TransactionFamily, TransactionManager,
};
pub use tidewal_core::{BlockNum, Lsn, TxnId, TxnIdPair};
pub use tidewal_durability::{
    CheckpointDriver, CheckpointInfo, CheckpointReason, LogCheckpointer, LogConfig,
    LogSegmentRegistry, Logger, UpgradeError, UpgradeOutcome, UpgradeStep,
};
pub use tidewal_engine::{ConfigError, Engine, EngineConfig, EngineError, EngineParts};
