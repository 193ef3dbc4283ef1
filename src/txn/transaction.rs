// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Global transaction identity.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies a cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Cluster-wide transaction identifier: the originating node plus a
/// per-node sequence number.
///
/// Doubles as the logical lock owner for owner-aware lock containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalTxId {
    node: NodeId,
    seq: u64,
}

impl GlobalTxId {
    #[inline]
    pub const fn new(node: NodeId, seq: u64) -> Self {
        Self { node, seq }
    }

    /// Returns the originating node.
    #[inline]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Returns the per-node sequence number.
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for GlobalTxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GlobalTx:{}:{}", self.node.0, self.seq)
    }
}

/// Hands out monotonically increasing transaction ids for one node.
#[derive(Debug)]
pub struct TxIdGenerator {
    node: NodeId,
    next_seq: AtomicU64,
}

impl TxIdGenerator {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            next_seq: AtomicU64::new(1),
        }
    }

    /// Returns the next identifier.
    pub fn next_id(&self) -> GlobalTxId {
        GlobalTxId::new(self.node, self.next_seq.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_monotonic() {
        let gen = TxIdGenerator::new(NodeId(7));
        let a = gen.next_id();
        let b = gen.next_id();

        assert_eq!(a.node(), NodeId(7));
        assert!(b.seq() > a.seq());
        assert_ne!(a, b);
    }

    #[test]
    fn test_display() {
        let gtx = GlobalTxId::new(NodeId(2), 42);
        assert_eq!(gtx.to_string(), "GlobalTx:2:42");
    }

    #[test]
    fn test_id_hash() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(GlobalTxId::new(NodeId(1), 1));
        set.insert(GlobalTxId::new(NodeId(1), 2));
        assert!(set.contains(&GlobalTxId::new(NodeId(1), 1)));
        assert!(!set.contains(&GlobalTxId::new(NodeId(2), 1)));
    }
}
