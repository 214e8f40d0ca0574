//! Nested transaction ids and the live transaction chain.
//!
//! Every root transaction owns one `ChildTransactionRegistry`. It hands out
//! ids to nested transactions and records which ones are live. Nesting is
//! strictly linear: a transaction has at most one live child, so the family
//! is a chain `root -> child -> grandchild -> ...` and only the deepest
//! transaction may start or finish a child.
//!
//! # Ids
//!
//! Children get `{root, n}` where `n` comes from a per-family counter that
//! starts at `TxnId::NONE`, so the first child is `{root, 1}`. A value equal
//! to the root id is skipped, so a child id pair never repeats the root's
//! number.
//!
//! # Locking
//!
//! One mutex guards the counter and the chain. `iterate` and the guard
//! returned by `suspend` hold it for their whole duration, so callbacks must
//! stay short.

use std::ops::ControlFlow;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tidewal_core::{TxnId, TxnIdPair};
use tracing::trace;

/// A live transaction in a family chain.
#[derive(Debug, PartialEq, Eq)]
pub struct Transaction {
    id: TxnIdPair,
    parent: Option<TxnIdPair>,
    depth: usize,
}

impl Transaction {
    /// Id pair.
    pub fn id(&self) -> TxnIdPair {
        self.id
    }

    /// Id pair of the parent, `None` for the root.
    pub fn parent(&self) -> Option<TxnIdPair> {
        self.parent
    }

    /// Nesting depth; the root is 0.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// True for the root of the family.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

#[derive(Debug)]
struct ChainState {
    last_xid: TxnId,
    /// `chain[d]` is the live transaction at depth `d`
    chain: Vec<Arc<Transaction>>,
}

impl ChainState {
    fn next_child_id(&mut self, root: TxnId) -> TxnId {
        self.last_xid = TxnId::new(self.last_xid.as_u64() + 1);
        if self.last_xid == root {
            self.last_xid = TxnId::new(self.last_xid.as_u64() + 1);
        }
        self.last_xid
    }

    /// Depth of `parent`, which must be the deepest live transaction.
    fn leaf_depth(&self, parent: &Transaction) -> usize {
        let depth = self
            .chain
            .iter()
            .position(|t| t.id == parent.id)
            .unwrap_or_else(|| panic!("transaction {} is not live in this family", parent.id));
        assert!(
            depth + 1 == self.chain.len(),
            "transaction {} already has a live child",
            parent.id
        );
        depth
    }

    fn link(&mut self, parent: &Transaction, id: TxnIdPair) -> Arc<Transaction> {
        let depth = self.leaf_depth(parent) + 1;
        let child = Arc::new(Transaction {
            id,
            parent: Some(parent.id),
            depth,
        });
        self.chain.push(Arc::clone(&child));
        child
    }

    fn find_by_id(&self, id: TxnIdPair) -> Option<&Arc<Transaction>> {
        self.chain.iter().find(|t| t.id == id)
    }
}

/// Id allocator and chain tracker for one root transaction's family.
#[derive(Debug)]
pub struct ChildTransactionRegistry {
    root_id: TxnId,
    state: Mutex<ChainState>,
}

impl ChildTransactionRegistry {
    /// Registry for the family rooted at `root_id`.
    ///
    /// The child counter starts at `TxnId::NONE`: children are numbered
    /// `1, 2, 3, ...`, stepping over `root_id` when the count reaches it.
    pub fn new(root_id: TxnId) -> Self {
        Self::with_last_xid(root_id, TxnId::NONE)
    }

    /// Registry whose child counter continues after `last_xid`.
    pub fn with_last_xid(root_id: TxnId, last_xid: TxnId) -> Self {
        let root = Arc::new(Transaction {
            id: TxnIdPair::root(root_id),
            parent: None,
            depth: 0,
        });
        ChildTransactionRegistry {
            root_id,
            state: Mutex::new(ChainState {
                last_xid,
                chain: vec![root],
            }),
        }
    }

    /// Id of the root transaction.
    pub fn root_id(&self) -> TxnId {
        self.root_id
    }

    /// The root transaction.
    pub fn root(&self) -> Arc<Transaction> {
        Arc::clone(&self.state.lock().chain[0])
    }

    /// Start a child of `parent` with a freshly drawn id.
    ///
    /// # Panics
    ///
    /// Panics if `parent` already has a live child or is not live in this
    /// family.
    pub fn start_child(&self, parent: &Transaction) -> Arc<Transaction> {
        let mut state = self.state.lock();
        let child_id = state.next_child_id(self.root_id);
        let child = state.link(parent, TxnIdPair::child(self.root_id, child_id));
        trace!(
            target: "tidewal::txn",
            parent = %parent.id,
            child = %child.id,
            depth = child.depth,
            "Child transaction started"
        );
        child
    }

    /// Start a child of `parent` with an id read back from the log.
    ///
    /// The counter is raised so later children never reuse `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` belongs to another family or repeats the root's
    /// number, or under the same conditions as `start_child`.
    pub fn start_child_for_recovery(&self, parent: &Transaction, id: TxnIdPair) -> Arc<Transaction> {
        assert_eq!(id.parent_id, self.root_id, "child {} is not in this family", id);
        assert_ne!(id.child_id, self.root_id, "child {} repeats the root id", id);

        let mut state = self.state.lock();
        state.last_xid = state.last_xid.max(id.child_id);
        let child = state.link(parent, id);
        trace!(
            target: "tidewal::txn",
            parent = %parent.id,
            child = %child.id,
            "Child transaction restored"
        );
        child
    }

    /// Unlink `child` from its parent.
    ///
    /// # Panics
    ///
    /// Panics if `child` is the root or still has a live child of its own.
    pub fn finish_child(&self, child: &Transaction) {
        assert!(!child.is_root(), "the root is not a child transaction");
        let mut state = self.state.lock();
        let depth = state.leaf_depth(child);
        debug_assert_eq!(depth, child.depth);
        state.chain.pop();
        trace!(
            target: "tidewal::txn",
            child = %child.id,
            depth,
            "Child transaction finished"
        );
    }

    /// Lock the chain for a consistent multi-step view.
    ///
    /// No child can start or finish until the guard is passed to `resume`
    /// or dropped.
    pub fn suspend(&self) -> ChainGuard<'_> {
        ChainGuard {
            state: self.state.lock(),
        }
    }

    /// Release a guard taken with `suspend`.
    pub fn resume(&self, guard: ChainGuard<'_>) {
        drop(guard);
    }

    /// Call `f` on root, child, grandchild, ... under the lock.
    ///
    /// Stops at the first `Break` and returns it.
    pub fn iterate<B, F>(&self, mut f: F) -> ControlFlow<B>
    where
        F: FnMut(&Transaction) -> ControlFlow<B>,
    {
        let state = self.state.lock();
        for txn in &state.chain {
            if let ControlFlow::Break(signal) = f(txn.as_ref()) {
                return ControlFlow::Break(signal);
            }
        }
        ControlFlow::Continue(())
    }

    /// Number of live child transactions.
    pub fn live_children(&self) -> usize {
        self.state.lock().chain.len() - 1
    }

    /// Most recent value drawn from the child counter.
    pub fn last_xid(&self) -> TxnId {
        self.state.lock().last_xid
    }
}

/// Exclusive view of a family chain, obtained from `suspend`.
pub struct ChainGuard<'a> {
    state: MutexGuard<'a, ChainState>,
}

impl ChainGuard<'_> {
    /// Live transaction with id `id`, walking down from the root.
    pub fn find_by_id(&self, id: TxnIdPair) -> Option<Arc<Transaction>> {
        self.state.find_by_id(id).cloned()
    }

    /// The deepest live transaction.
    pub fn leaf(&self) -> Arc<Transaction> {
        // The root is never removed
        Arc::clone(&self.state.chain[self.state.chain.len() - 1])
    }

    /// Live transactions, root first.
    pub fn chain(&self) -> impl Iterator<Item = &Transaction> {
        self.state.chain.iter().map(|t| t.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_of(registry: &ChildTransactionRegistry, depth: usize) -> Vec<Arc<Transaction>> {
        let mut chain = vec![registry.root()];
        for _ in 0..depth {
            let parent = Arc::clone(chain.last().unwrap());
            chain.push(registry.start_child(&parent));
        }
        chain
    }

    #[test]
    fn test_child_ids_count_from_one() {
        let registry = ChildTransactionRegistry::new(TxnId::new(40));
        let chain = chain_of(&registry, 3);

        let ids: Vec<TxnIdPair> = chain.iter().map(|t| t.id()).collect();
        assert_eq!(
            ids,
            vec![
                TxnIdPair::root(TxnId::new(40)),
                TxnIdPair::child(TxnId::new(40), TxnId::new(1)),
                TxnIdPair::child(TxnId::new(40), TxnId::new(2)),
                TxnIdPair::child(TxnId::new(40), TxnId::new(3)),
            ]
        );
        assert_eq!(chain[2].parent(), Some(chain[1].id()));
        assert_eq!(chain[3].depth(), 3);
    }

    #[test]
    fn test_child_id_skips_root_id() {
        let root = TxnId::new(100);
        let registry = ChildTransactionRegistry::with_last_xid(root, TxnId::new(99));
        let child = registry.start_child(&registry.root());

        assert_ne!(child.id().child_id, root);
        assert_eq!(child.id().child_id, TxnId::new(101));
    }

    #[test]
    fn test_fresh_registry_steps_over_root_id() {
        let root = TxnId::new(2);
        let registry = ChildTransactionRegistry::new(root);
        let chain = chain_of(&registry, 3);

        let children: Vec<TxnId> = chain[1..].iter().map(|t| t.id().child_id).collect();
        assert_eq!(children, vec![TxnId::new(1), TxnId::new(3), TxnId::new(4)]);
        assert_eq!(registry.last_xid(), TxnId::new(4));
    }

    #[test]
    fn test_finish_allows_new_child() {
        let registry = ChildTransactionRegistry::new(TxnId::new(1));
        let root = registry.root();
        let first = registry.start_child(&root);
        registry.finish_child(&first);
        assert_eq!(registry.live_children(), 0);

        let second = registry.start_child(&root);
        assert_ne!(second.id(), first.id());
        assert_eq!(registry.live_children(), 1);
    }

    #[test]
    #[should_panic(expected = "already has a live child")]
    fn test_second_live_child_panics() {
        let registry = ChildTransactionRegistry::new(TxnId::new(1));
        let root = registry.root();
        let _first = registry.start_child(&root);
        registry.start_child(&root);
    }

    #[test]
    #[should_panic(expected = "already has a live child")]
    fn test_finish_out_of_order_panics() {
        let registry = ChildTransactionRegistry::new(TxnId::new(1));
        let chain = chain_of(&registry, 2);
        registry.finish_child(&chain[1]);
    }

    #[test]
    fn test_recovery_raises_counter() {
        let root = TxnId::new(10);
        let registry = ChildTransactionRegistry::new(root);
        let restored =
            registry.start_child_for_recovery(&registry.root(), TxnIdPair::child(root, TxnId::new(57)));
        assert_eq!(registry.last_xid(), TxnId::new(57));

        let next = registry.start_child(&restored);
        assert_eq!(next.id().child_id, TxnId::new(58));
    }

    #[test]
    fn test_recovery_keeps_higher_counter() {
        let root = TxnId::new(10);
        let registry = ChildTransactionRegistry::with_last_xid(root, TxnId::new(80));
        registry.start_child_for_recovery(&registry.root(), TxnIdPair::child(root, TxnId::new(57)));
        assert_eq!(registry.last_xid(), TxnId::new(80));
    }

    #[test]
    #[should_panic(expected = "not in this family")]
    fn test_recovery_rejects_foreign_id() {
        let registry = ChildTransactionRegistry::new(TxnId::new(10));
        registry.start_child_for_recovery(
            &registry.root(),
            TxnIdPair::child(TxnId::new(11), TxnId::new(12)),
        );
    }

    #[test]
    fn test_iterate_visits_whole_chain() {
        for depth in 0..6 {
            let registry = ChildTransactionRegistry::new(TxnId::new(7));
            chain_of(&registry, depth);

            let mut calls = 0;
            let flow: ControlFlow<()> = registry.iterate(|_| {
                calls += 1;
                ControlFlow::Continue(())
            });
            assert_eq!(flow, ControlFlow::Continue(()));
            assert_eq!(calls, depth + 1);
        }
    }

    #[test]
    fn test_iterate_stops_early() {
        let registry = ChildTransactionRegistry::new(TxnId::new(7));
        let chain = chain_of(&registry, 4);

        let mut visited = Vec::new();
        let flow = registry.iterate(|txn| {
            visited.push(txn.id());
            if txn.depth() == 2 {
                ControlFlow::Break(txn.id())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(flow, ControlFlow::Break(chain[2].id()));
        assert_eq!(visited.len(), 3);
    }

    #[test]
    fn test_suspend_find_by_id() {
        let registry = ChildTransactionRegistry::new(TxnId::new(3));
        let chain = chain_of(&registry, 2);

        let guard = registry.suspend();
        assert_eq!(guard.find_by_id(chain[2].id()), Some(Arc::clone(&chain[2])));
        assert_eq!(guard.find_by_id(chain[0].id()), Some(Arc::clone(&chain[0])));
        assert!(guard
            .find_by_id(TxnIdPair::child(TxnId::new(3), TxnId::new(99)))
            .is_none());
        assert_eq!(guard.leaf().id(), chain[2].id());
        assert_eq!(guard.chain().count(), 3);
        registry.resume(guard);

        registry.finish_child(&chain[2]);
        assert!(registry.suspend().find_by_id(chain[2].id()).is_none());
    }
}
