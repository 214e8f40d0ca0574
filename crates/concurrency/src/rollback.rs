//! Rollback (undo) log nodes and the block store that holds them.
//!
//! A transaction's undo information lives in a chain of rollback nodes, one
//! block each. A node belongs to exactly one transaction at a time; a node
//! whose owner is `TxnIdPair::NONE` is unused and may be handed to any
//! transaction.

use tidewal_core::{BlockNum, Lsn, Result, TxnIdPair};

/// One undo record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoEntry {
    /// LSN of the log entry this record undoes
    pub lsn: Lsn,
    /// Opaque undo payload
    pub payload: Vec<u8>,
}

impl UndoEntry {
    /// Bytes this record keeps resident.
    pub fn resident_bytes(&self) -> usize {
        std::mem::size_of::<Self>() + self.payload.len()
    }
}

/// One block of a transaction's undo log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackLogNode {
    blocknum: BlockNum,
    txnid: TxnIdPair,
    sequence: u64,
    previous: BlockNum,
    entries: Vec<UndoEntry>,
    resident_bytes: usize,
}

impl RollbackLogNode {
    /// A fresh unused node stored at `blocknum`.
    pub fn new(blocknum: BlockNum) -> Self {
        RollbackLogNode {
            blocknum,
            txnid: TxnIdPair::NONE,
            sequence: 0,
            previous: BlockNum::NONE,
            entries: Vec::new(),
            resident_bytes: 0,
        }
    }

    /// Hand the node to `txnid` as the `sequence`-th block of its undo log.
    ///
    /// `previous` is the block holding the transaction's older undo records.
    pub fn initialize_for_txn(&mut self, txnid: TxnIdPair, sequence: u64, previous: BlockNum) {
        debug_assert!(self.is_unused(), "rollback node {} still owned", self.blocknum);
        self.txnid = txnid;
        self.sequence = sequence;
        self.previous = previous;
    }

    /// Append an undo record.
    pub fn push(&mut self, entry: UndoEntry) {
        self.resident_bytes += entry.resident_bytes();
        self.entries.push(entry);
    }

    /// Reset to the unused state. The block number is kept.
    pub fn make_unused(&mut self) {
        self.txnid = TxnIdPair::NONE;
        self.sequence = 0;
        self.previous = BlockNum::NONE;
        self.entries.clear();
        self.resident_bytes = 0;
    }

    /// True when no transaction owns the node.
    pub fn is_unused(&self) -> bool {
        self.txnid.is_none()
    }

    /// Block holding this node.
    pub fn blocknum(&self) -> BlockNum {
        self.blocknum
    }

    /// Owning transaction.
    pub fn txnid(&self) -> TxnIdPair {
        self.txnid
    }

    /// Position in the owner's chain of rollback nodes.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Block with the owner's previous rollback node.
    pub fn previous(&self) -> BlockNum {
        self.previous
    }

    /// Oldest undo record.
    pub fn oldest_entry(&self) -> Option<&UndoEntry> {
        self.entries.first()
    }

    /// Newest undo record.
    pub fn newest_entry(&self) -> Option<&UndoEntry> {
        self.entries.last()
    }

    /// Number of undo records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the node holds no undo records.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes held in memory by the undo records.
    pub fn resident_bytes(&self) -> usize {
        self.resident_bytes
    }
}

/// Block manager for rollback nodes.
///
/// A pinned node is checked out to the caller by value and must come back
/// through `unpin` or `free`.
pub trait RollbackBlockStore: Send + Sync {
    /// Allocate a new block and return its unused node, pinned.
    fn allocate(&self) -> Result<RollbackLogNode>;

    /// Pin the node stored at `blocknum`.
    fn pin(&self, blocknum: BlockNum) -> Result<RollbackLogNode>;

    /// Write the node back and release the pin.
    fn unpin(&self, node: RollbackLogNode) -> Result<()>;

    /// Release the pin and return the block to the allocator.
    fn free(&self, node: RollbackLogNode) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidewal_core::TxnId;

    fn undo(lsn: u64, len: usize) -> UndoEntry {
        UndoEntry {
            lsn: Lsn::new(lsn),
            payload: vec![0; len],
        }
    }

    #[test]
    fn test_new_node_is_unused() {
        let node = RollbackLogNode::new(BlockNum::new(3));
        assert!(node.is_unused());
        assert!(node.is_empty());
        assert_eq!(node.previous(), BlockNum::NONE);
        assert_eq!(node.resident_bytes(), 0);
    }

    #[test]
    fn test_entries_and_resident_bytes() {
        let mut node = RollbackLogNode::new(BlockNum::new(3));
        node.initialize_for_txn(TxnIdPair::root(TxnId::new(9)), 2, BlockNum::new(1));
        node.push(undo(10, 100));
        node.push(undo(11, 50));

        assert!(!node.is_unused());
        assert_eq!(node.len(), 2);
        assert_eq!(node.oldest_entry().unwrap().lsn, Lsn::new(10));
        assert_eq!(node.newest_entry().unwrap().lsn, Lsn::new(11));
        assert!(node.resident_bytes() >= 150);
    }

    #[test]
    fn test_make_unused_keeps_block() {
        let mut node = RollbackLogNode::new(BlockNum::new(7));
        node.initialize_for_txn(TxnIdPair::root(TxnId::new(1)), 1, BlockNum::new(2));
        node.push(undo(1, 8));
        node.make_unused();

        assert_eq!(node, RollbackLogNode::new(BlockNum::new(7)));
    }
}
