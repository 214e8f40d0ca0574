//! Pool of idle rollback nodes.
//!
//! Finished transactions donate their rollback nodes here so the next
//! transaction can reuse a block instead of allocating one. The pool only
//! remembers block numbers; the nodes themselves stay in the block store.
//!
//! The ring of block numbers is guarded by a single mutex held for O(1)
//! work. Pinning and unpinning happen outside it. A donated block number
//! only becomes visible to `get` once its node is unpinned, so a reused
//! block is never still held by the donor.
//!
//! Bypassing the pool entirely (always allocate, always free) behaves the
//! same, only slower.

use std::sync::Arc;

use parking_lot::Mutex;
use tidewal_core::{BlockNum, TxnIdPair};
use tracing::trace;

use crate::rollback::{RollbackBlockStore, RollbackLogNode};

/// Why `give` did not keep a node.
#[derive(Debug, thiserror::Error)]
pub enum GiveError {
    /// The pool is at capacity. The caller still owns the pinned node.
    #[error("rollback node pool is full")]
    Full(RollbackLogNode),

    /// The node could not be unpinned. The pool did not keep it.
    #[error("rollback node unpin failed: {0}")]
    Store(#[from] tidewal_core::Error),
}

/// Fixed-capacity ring of block numbers.
///
/// `reserved` counts slots promised to donors still unpinning their node.
#[derive(Debug)]
struct Ring {
    blocks: Vec<BlockNum>,
    first: usize,
    count: usize,
    reserved: usize,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Ring {
            blocks: vec![BlockNum::NONE; capacity],
            first: 0,
            count: 0,
            reserved: 0,
        }
    }

    fn reserve(&mut self) -> bool {
        if self.count + self.reserved >= self.blocks.len() {
            return false;
        }
        self.reserved += 1;
        true
    }

    fn cancel(&mut self) {
        self.reserved -= 1;
    }

    /// Fill a reserved slot. Never fails: the reservation kept room for it.
    fn publish(&mut self, blocknum: BlockNum) {
        self.reserved -= 1;
        let slot = (self.first + self.count) % self.blocks.len();
        self.blocks[slot] = blocknum;
        self.count += 1;
    }

    fn pop(&mut self) -> Option<BlockNum> {
        if self.count == 0 {
            return None;
        }
        let blocknum = std::mem::replace(&mut self.blocks[self.first], BlockNum::NONE);
        self.first = (self.first + 1) % self.blocks.len();
        self.count -= 1;
        Some(blocknum)
    }
}

/// Bounded, thread-safe pool of reusable rollback nodes.
pub struct RollbackNodePool {
    ring: Mutex<Ring>,
    capacity: usize,
    store: Arc<dyn RollbackBlockStore>,
}

impl RollbackNodePool {
    /// Create a pool holding at most `capacity` idle nodes from `store`.
    pub fn new(capacity: usize, store: Arc<dyn RollbackBlockStore>) -> Self {
        RollbackNodePool {
            ring: Mutex::new(Ring::new(capacity)),
            capacity,
            store,
        }
    }

    /// Donate `node`, finished by `txnid`, to the pool.
    ///
    /// An accepted node is reset to unused and unpinned. A rejected node is
    /// handed back untouched so the caller can free it.
    pub fn give(&self, txnid: TxnIdPair, mut node: RollbackLogNode) -> Result<(), GiveError> {
        let accepted = self.ring.lock().reserve();
        if !accepted {
            trace!(
                target: "tidewal::rollback",
                txn = %txnid,
                block = %node.blocknum(),
                "Pool full, rejecting rollback node"
            );
            return Err(GiveError::Full(node));
        }

        trace!(
            target: "tidewal::rollback",
            txn = %txnid,
            block = %node.blocknum(),
            "Rollback node donated to pool"
        );
        let blocknum = node.blocknum();
        node.make_unused();
        if let Err(e) = self.store.unpin(node) {
            self.ring.lock().cancel();
            return Err(e.into());
        }
        self.ring.lock().publish(blocknum);
        Ok(())
    }

    /// Take an idle node for `txnid`, pinned. `None` when the pool is empty.
    ///
    /// # Panics
    ///
    /// Panics if the pooled node is owned by a transaction; only unused
    /// nodes are ever pooled.
    pub fn get(&self, txnid: TxnIdPair) -> tidewal_core::Result<Option<RollbackLogNode>> {
        let blocknum = match self.ring.lock().pop() {
            Some(blocknum) => blocknum,
            None => return Ok(None),
        };

        let node = self.store.pin(blocknum)?;
        assert!(
            node.is_unused(),
            "pooled rollback node {} is owned by {}",
            blocknum,
            node.txnid()
        );
        trace!(
            target: "tidewal::rollback",
            txn = %txnid,
            block = %blocknum,
            "Rollback node reused from pool"
        );
        Ok(Some(node))
    }

    /// Free every pooled node back to the block store.
    ///
    /// Returns how many were freed.
    pub fn drain(&self) -> tidewal_core::Result<usize> {
        let mut freed = 0;
        loop {
            let blocknum = match self.ring.lock().pop() {
                Some(blocknum) => blocknum,
                None => break,
            };
            let node = self.store.pin(blocknum)?;
            self.store.free(node)?;
            freed += 1;
        }
        Ok(freed)
    }

    /// Maximum number of idle nodes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Idle nodes currently held.
    pub fn len(&self) -> usize {
        self.ring.lock().count
    }

    /// True when no idle nodes are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for RollbackNodePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackNodePool")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
