//! Identifier types
//!
//! Thin newtypes over the raw integers that flow through the log and the
//! transaction layer. Keeping them distinct stops an LSN from being passed
//! where a transaction id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Log sequence number.
///
/// Strictly increasing over the lifetime of a log. `Lsn::ZERO` is the
/// sentinel reported when nothing has been logged yet.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Lsn(u64);

impl Lsn {
    /// Sentinel for "no sequence number".
    pub const ZERO: Self = Self(0);

    /// Creates an LSN from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the LSN immediately following this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Debug for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lsn({})", self.0)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Lsn {
    #[inline]
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Transaction identifier.
///
/// `TxnId::NONE` (zero) marks "no transaction": the child half of a root
/// transaction's id pair, the owner of an unused rollback node, and the
/// last-assigned id of a log that never ran a transaction.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TxnId(u64);

impl TxnId {
    /// The "no transaction" sentinel.
    pub const NONE: Self = Self(0);

    /// Creates a transaction id from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true unless this is `TxnId::NONE`.
    #[inline]
    #[must_use]
    pub const fn is_some(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Debug for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_some() {
            write!(f, "TxnId({})", self.0)
        } else {
            write!(f, "TxnId(NONE)")
        }
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TxnId {
    #[inline]
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Identifier of a transaction inside a root transaction's family.
///
/// A root transaction is `{parent_id: root, child_id: NONE}`. Every nested
/// transaction below it shares the root's `parent_id` and carries a
/// `child_id` drawn from the family's counter, which is never equal to
/// `parent_id`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TxnIdPair {
    /// Id of the root transaction of the family.
    pub parent_id: TxnId,
    /// Id of the nested transaction, `NONE` for the root itself.
    pub child_id: TxnId,
}

impl TxnIdPair {
    /// The pair owning nothing.
    pub const NONE: Self = Self {
        parent_id: TxnId::NONE,
        child_id: TxnId::NONE,
    };

    /// Id pair of a root transaction.
    #[must_use]
    pub const fn root(id: TxnId) -> Self {
        Self {
            parent_id: id,
            child_id: TxnId::NONE,
        }
    }

    /// Id pair of a nested transaction in `root`'s family.
    #[must_use]
    pub const fn child(root: TxnId, child: TxnId) -> Self {
        Self {
            parent_id: root,
            child_id: child,
        }
    }

    /// True for the id pair of a root transaction.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.parent_id.is_some() && !self.child_id.is_some()
    }

    /// True for `TxnIdPair::NONE`.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        !self.parent_id.is_some() && !self.child_id.is_some()
    }
}

impl fmt::Debug for TxnIdPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxnIdPair({}:{})", self.parent_id.0, self.child_id.0)
    }
}

impl fmt::Display for TxnIdPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.child_id.is_some() {
            write!(f, "{}.{}", self.parent_id.0, self.child_id.0)
        } else {
            write!(f, "{}", self.parent_id.0)
        }
    }
}

/// Block number inside the block manager's address space.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct BlockNum(i64);

impl BlockNum {
    /// Sentinel for "no block".
    pub const NONE: Self = Self(-1);

    /// Creates a block number from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Debug for BlockNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::NONE {
            write!(f, "BlockNum(NONE)")
        } else {
            write!(f, "BlockNum({})", self.0)
        }
    }
}

impl fmt::Display for BlockNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
