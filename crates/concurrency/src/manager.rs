//! Transaction manager for nested transactions
//!
//! Front end that ties the transaction families, the rollback node pool,
//! and the log together:
//!
//! ```text
//! begin_root   -> next root xid, BeginTxn logged, new family registry
//! begin_child  -> id from the family registry, BeginTxn logged
//! finish_child -> CommitTxn / AbortTxn logged, child unlinked
//! finish_root  -> CommitTxn / AbortTxn logged, family dropped
//!
//! acquire_rollback_node -> pool first, block store allocation otherwise
//! release_rollback_node -> pool first, block store free when the pool is full
//! ```

use std::sync::Arc;

use tidewal_core::{BlockNum, Lsn, TxnId, TxnIdPair};
use tidewal_durability::{LogEntryBody, LogError, Logger};
use tracing::debug;

use crate::child_txn::{ChildTransactionRegistry, Transaction};
use crate::rollback::{RollbackBlockStore, RollbackLogNode};
use crate::rollback_pool::{GiveError, RollbackNodePool};

/// How a transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Make the transaction's effects permanent
    Commit,
    /// Undo the transaction's effects
    Abort,
}

/// Transaction manager errors.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    /// Logging the transaction boundary failed
    #[error("transaction log error: {0}")]
    Log(#[from] LogError),

    /// The rollback block store failed
    #[error("rollback store error: {0}")]
    Store(#[from] tidewal_core::Error),

    /// A root was finished while children were still live. Nothing was
    /// logged and the family is handed back so it can be finished later.
    #[error("root transaction {root} still has {live} live child transaction(s)")]
    ChildrenStillLive {
        /// Root transaction id
        root: TxnId,
        /// Live children at the time
        live: usize,
        /// The unfinished family
        family: Box<TransactionFamily>,
    },
}

impl TransactionError {
    /// Recover the family a failed `finish_root` handed back.
    pub fn into_family(self) -> Option<TransactionFamily> {
        match self {
            TransactionError::ChildrenStillLive { family, .. } => Some(*family),
            _ => None,
        }
    }
}

/// A root transaction and its nested descendants.
#[derive(Debug)]
pub struct TransactionFamily {
    registry: ChildTransactionRegistry,
    begin_lsn: Lsn,
}

impl TransactionFamily {
    /// The root transaction.
    pub fn root(&self) -> Arc<Transaction> {
        self.registry.root()
    }

    /// Id of the root transaction.
    pub fn root_id(&self) -> TxnId {
        self.registry.root_id()
    }

    /// LSN of the root's `BeginTxn` entry.
    pub fn begin_lsn(&self) -> Lsn {
        self.begin_lsn
    }

    /// The family's id allocator and chain.
    pub fn registry(&self) -> &ChildTransactionRegistry {
        &self.registry
    }
}

/// Drives nested transactions against the log and the rollback node pool.
pub struct TransactionManager {
    logger: Arc<Logger>,
    pool: Arc<RollbackNodePool>,
    store: Arc<dyn RollbackBlockStore>,
}

impl TransactionManager {
    /// Create a manager.
    ///
    /// `pool` must draw from `store`.
    pub fn new(
        logger: Arc<Logger>,
        pool: Arc<RollbackNodePool>,
        store: Arc<dyn RollbackBlockStore>,
    ) -> Self {
        TransactionManager {
            logger,
            pool,
            store,
        }
    }

    /// Begin a root transaction.
    pub fn begin_root(&self) -> Result<TransactionFamily, TransactionError> {
        let root_id = self.logger.next_xid();
        let begin_lsn = self.logger.append(LogEntryBody::BeginTxn {
            xid: TxnIdPair::root(root_id),
        })?;
        debug!(target: "tidewal::txn", root = root_id.as_u64(), lsn = begin_lsn.as_u64(), "Root transaction started");

        Ok(TransactionFamily {
            registry: ChildTransactionRegistry::new(root_id),
            begin_lsn,
        })
    }

    /// Begin a child of `parent`, which must be the deepest live
    /// transaction in `family`.
    pub fn begin_child(
        &self,
        family: &TransactionFamily,
        parent: &Transaction,
    ) -> Result<Arc<Transaction>, TransactionError> {
        let child = family.registry.start_child(parent);
        if let Err(e) = self.logger.append(LogEntryBody::BeginTxn { xid: child.id() }) {
            family.registry.finish_child(&child);
            return Err(e.into());
        }
        Ok(child)
    }

    /// Commit or abort `child` and unlink it from its parent.
    pub fn finish_child(
        &self,
        family: &TransactionFamily,
        child: &Transaction,
        resolution: Resolution,
    ) -> Result<Lsn, TransactionError> {
        let lsn = self.logger.append(boundary(child.id(), resolution))?;
        family.registry.finish_child(child);
        Ok(lsn)
    }

    /// Commit or abort the root of `family`. All children must be finished;
    /// otherwise the family comes back inside the error, still live.
    pub fn finish_root(
        &self,
        family: TransactionFamily,
        resolution: Resolution,
    ) -> Result<Lsn, TransactionError> {
        let live = family.registry.live_children();
        if live > 0 {
            return Err(TransactionError::ChildrenStillLive {
                root: family.root_id(),
                live,
                family: Box::new(family),
            });
        }

        let lsn = self
            .logger
            .append(boundary(TxnIdPair::root(family.root_id()), resolution))?;
        debug!(
            target: "tidewal::txn",
            root = family.root_id().as_u64(),
            ?resolution,
            lsn = lsn.as_u64(),
            "Root transaction finished"
        );
        Ok(lsn)
    }

    /// Get a pinned rollback node for `txn`, reusing a pooled one if any.
    pub fn acquire_rollback_node(
        &self,
        txn: &Transaction,
        sequence: u64,
        previous: BlockNum,
    ) -> Result<RollbackLogNode, TransactionError> {
        let mut node = match self.pool.get(txn.id())? {
            Some(node) => node,
            None => self.store.allocate()?,
        };
        node.initialize_for_txn(txn.id(), sequence, previous);
        Ok(node)
    }

    /// Return a rollback node `txn` no longer needs.
    pub fn release_rollback_node(
        &self,
        txn: &Transaction,
        node: RollbackLogNode,
    ) -> Result<(), TransactionError> {
        match self.pool.give(txn.id(), node) {
            Ok(()) => Ok(()),
            Err(GiveError::Full(node)) => {
                self.store.free(node)?;
                Ok(())
            }
            Err(GiveError::Store(e)) => Err(e.into()),
        }
    }

    /// The logger transaction boundaries are written to.
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// The rollback node pool.
    pub fn pool(&self) -> &RollbackNodePool {
        &self.pool
    }
}

fn boundary(xid: TxnIdPair, resolution: Resolution) -> LogEntryBody {
    match resolution {
        Resolution::Commit => LogEntryBody::CommitTxn { xid },
        Resolution::Abort => LogEntryBody::AbortTxn { xid },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryBlockStore;
    use tempfile::TempDir;
    use tidewal_durability::{FileLogCursor, LogConfig, LogCursor, LoggerStart};

    fn setup(capacity: usize) -> (TempDir, TransactionManager, Arc<MemoryBlockStore>) {
        let dir = TempDir::new().unwrap();
        let logger =
            Logger::open(dir.path(), LogConfig::default(), LoggerStart::default()).unwrap();
        let store = Arc::new(MemoryBlockStore::new());
        let pool = Arc::new(RollbackNodePool::new(capacity, store.clone()));
        let manager = TransactionManager::new(Arc::new(logger), pool, store.clone());
        (dir, manager, store)
    }

    fn logged(dir: &TempDir) -> Vec<LogEntryBody> {
        let mut cursor = FileLogCursor::open(dir.path()).unwrap();
        let mut bodies = Vec::new();
        while let Some(entry) = cursor.next().unwrap() {
            bodies.push(entry.body);
        }
        bodies
    }

    #[test]
    fn test_nested_boundaries_are_logged() {
        let (dir, manager, _store) = setup(4);
        let family = manager.begin_root().unwrap();
        let root = family.root();
        let child = manager.begin_child(&family, &root).unwrap();
        manager
            .finish_child(&family, &child, Resolution::Abort)
            .unwrap();
        manager.finish_root(family, Resolution::Commit).unwrap();

        let root_xid = root.id();
        assert_eq!(
            logged(&dir),
            vec![
                LogEntryBody::BeginTxn { xid: root_xid },
                LogEntryBody::BeginTxn { xid: child.id() },
                LogEntryBody::AbortTxn { xid: child.id() },
                LogEntryBody::CommitTxn { xid: root_xid },
            ]
        );
    }

    #[test]
    fn test_root_ids_come_from_logger() {
        let (_dir, manager, _store) = setup(4);
        let a = manager.begin_root().unwrap();
        let b = manager.begin_root().unwrap();
        assert_eq!(a.root_id(), TxnId::new(1));
        assert_eq!(b.root_id(), TxnId::new(2));
        assert_eq!(manager.logger().oldest_live_lsn(), Some(a.begin_lsn()));
    }

    #[test]
    fn test_finish_root_with_live_child_fails() {
        let (_dir, manager, _store) = setup(4);
        let family = manager.begin_root().unwrap();
        let _child = manager.begin_child(&family, &family.root()).unwrap();

        let err = manager.finish_root(family, Resolution::Commit).unwrap_err();
        assert!(matches!(err, TransactionError::ChildrenStillLive { live: 1, .. }));
    }

    #[test]
    fn test_finish_root_retry_after_live_child() {
        let (dir, manager, _store) = setup(4);
        let family = manager.begin_root().unwrap();
        let root_xid = family.root().id();
        let child = manager.begin_child(&family, &family.root()).unwrap();
        assert_eq!(manager.logger().oldest_live_lsn(), Some(family.begin_lsn()));

        let family = manager
            .finish_root(family, Resolution::Commit)
            .unwrap_err()
            .into_family()
            .unwrap();
        assert_eq!(family.registry().live_children(), 1);

        manager
            .finish_child(&family, &child, Resolution::Commit)
            .unwrap();
        manager.finish_root(family, Resolution::Commit).unwrap();
        assert_eq!(manager.logger().oldest_live_lsn(), None);

        let bodies = logged(&dir);
        assert_eq!(bodies.last(), Some(&LogEntryBody::CommitTxn { xid: root_xid }));
        assert_eq!(
            bodies
                .iter()
                .filter(|b| **b == LogEntryBody::CommitTxn { xid: root_xid })
                .count(),
            1
        );
    }

    #[test]
    fn test_rollback_nodes_recycle_through_pool() {
        let (_dir, manager, store) = setup(2);
        let family = manager.begin_root().unwrap();
        let root = family.root();

        let first = manager.acquire_rollback_node(&root, 0, BlockNum::NONE).unwrap();
        let blocknum = first.blocknum();
        assert_eq!(first.txnid(), root.id());
        manager.release_rollback_node(&root, first).unwrap();
        assert_eq!(manager.pool().len(), 1);

        let child = manager.begin_child(&family, &root).unwrap();
        let reused = manager.acquire_rollback_node(&child, 0, BlockNum::NONE).unwrap();
        assert_eq!(reused.blocknum(), blocknum);
        assert_eq!(reused.txnid(), child.id());
        assert_eq!(store.allocated(), 1);
    }

    #[test]
    fn test_full_pool_frees_nodes() {
        let (_dir, manager, store) = setup(1);
        let family = manager.begin_root().unwrap();
        let root = family.root();

        let a = manager.acquire_rollback_node(&root, 0, BlockNum::NONE).unwrap();
        let b = manager.acquire_rollback_node(&root, 1, a.blocknum()).unwrap();
        manager.release_rollback_node(&root, b).unwrap();
        manager.release_rollback_node(&root, a).unwrap();

        assert_eq!(manager.pool().len(), 1);
        assert_eq!(store.freed(), 1);
        assert_eq!(store.pinned_count(), 0);
    }
}
