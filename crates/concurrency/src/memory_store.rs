//! In-memory rollback block store.
//!
//! Stands in for the block manager when rollback nodes do not need to
//! survive a restart. It enforces the pin discipline: a block can be pinned
//! by one holder at a time, and every pinned node must come back through
//! `unpin` or `free`.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use tidewal_core::{BlockNum, Error, Result};

use crate::rollback::{RollbackBlockStore, RollbackLogNode};

#[derive(Debug, Default)]
struct StoreState {
    next_block: i64,
    resting: HashMap<BlockNum, RollbackLogNode>,
    pinned: HashSet<BlockNum>,
    allocated: usize,
    freed: usize,
}

/// In-memory block store.
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    state: Mutex<StoreState>,
}

impl MemoryBlockStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks handed out by `allocate` so far.
    pub fn allocated(&self) -> usize {
        self.state.lock().allocated
    }

    /// Blocks returned through `free` so far.
    pub fn freed(&self) -> usize {
        self.state.lock().freed
    }

    /// Blocks allocated and not yet freed, pinned or not.
    pub fn live_blocks(&self) -> usize {
        let state = self.state.lock();
        state.resting.len() + state.pinned.len()
    }

    /// Blocks currently pinned.
    pub fn pinned_count(&self) -> usize {
        self.state.lock().pinned.len()
    }
}

impl RollbackBlockStore for MemoryBlockStore {
    fn allocate(&self) -> Result<RollbackLogNode> {
        let mut state = self.state.lock();
        let blocknum = BlockNum::new(state.next_block);
        state.next_block += 1;
        state.allocated += 1;
        state.pinned.insert(blocknum);
        Ok(RollbackLogNode::new(blocknum))
    }

    fn pin(&self, blocknum: BlockNum) -> Result<RollbackLogNode> {
        let mut state = self.state.lock();
        if state.pinned.contains(&blocknum) {
            return Err(Error::InvalidOperation(format!(
                "block {} is already pinned",
                blocknum
            )));
        }
        let node = state
            .resting
            .remove(&blocknum)
            .ok_or_else(|| Error::Corruption(format!("no rollback node at block {}", blocknum)))?;
        state.pinned.insert(blocknum);
        Ok(node)
    }

    fn unpin(&self, node: RollbackLogNode) -> Result<()> {
        let mut state = self.state.lock();
        if !state.pinned.remove(&node.blocknum()) {
            return Err(Error::InvalidOperation(format!(
                "block {} is not pinned",
                node.blocknum()
            )));
        }
        state.resting.insert(node.blocknum(), node);
        Ok(())
    }

    fn free(&self, node: RollbackLogNode) -> Result<()> {
        let mut state = self.state.lock();
        if !state.pinned.remove(&node.blocknum()) {
            return Err(Error::InvalidOperation(format!(
                "block {} is not pinned",
                node.blocknum()
            )));
        }
        state.freed += 1;
        Ok(())
    }
}
