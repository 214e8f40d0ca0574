//! Concurrency layer for tidewal
//!
//! This crate holds the per-transaction bookkeeping shared between worker
//! threads:
//! - `ChildTransactionRegistry`: collision-free ids for nested transactions
//!   and the live root-to-leaf chain of each family
//! - `RollbackNodePool`: bounded cache of idle undo-log blocks
//! - `TransactionManager`: begins and finishes transactions against the log
//!   and hands out rollback nodes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod child_txn;
pub mod manager;
pub mod memory_store;
pub mod rollback;
pub mod rollback_pool;

pub use child_txn::{ChainGuard, ChildTransactionRegistry, Transaction};
pub use manager::{Resolution, TransactionError, TransactionFamily, TransactionManager};
pub use memory_store::MemoryBlockStore;
pub use rollback::{RollbackBlockStore, RollbackLogNode, UndoEntry};
pub use rollback_pool::{GiveError, RollbackNodePool};
