// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Key-ownership table: which in-flight transaction last claimed each key.

use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;

use crate::storage::Key;
use crate::sync::Latch;

const NUM_SHARDS: usize = 64;

/// Maps each key to the latch of the transaction currently claiming it.
///
/// Sharded so that releases of unrelated keys do not contend. Every
/// operation touches one shard, except the snapshot and size queries.
pub struct KeyOwnershipTable {
    shards: [Mutex<HashMap<Key, Latch>>; NUM_SHARDS],
}

impl KeyOwnershipTable {
    pub fn new() -> Self {
        Self {
            shards: std::array::from_fn(|_| Mutex::new(HashMap::new())),
        }
    }

    #[inline]
    fn shard(&self, key: &Key) -> &Mutex<HashMap<Key, Latch>> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % NUM_SHARDS]
    }

    /// Installs `latch` as the claimant of `key`, returning the previous one.
    pub fn claim(&self, key: Key, latch: Latch) -> Option<Latch> {
        self.shard(&key).lock().insert(key, latch)
    }

    /// Removes `key` only if it is still claimed by `expected`.
    ///
    /// Returns false when a newer claim has replaced it; that claim is left
    /// in place.
    pub fn release_if(&self, key: &Key, expected: &Latch) -> bool {
        let mut shard = self.shard(key).lock();
        match shard.get(key) {
            Some(current) if current == expected => {
                shard.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn claimant(&self, key: &Key) -> Option<Latch> {
        self.shard(key).lock().get(key).cloned()
    }

    /// Distinct latches of every transaction currently claiming a key.
    pub fn snapshot_latches(&self) -> Vec<Latch> {
        let mut seen = HashSet::new();
        for shard in &self.shards {
            seen.extend(shard.lock().values().cloned());
        }
        seen.into_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.lock().is_empty())
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }
}

impl Default for KeyOwnershipTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::{GlobalTxId, NodeId};

    fn latch(seq: u64) -> Latch {
        Latch::new(GlobalTxId::new(NodeId(1), seq))
    }

    #[test]
    fn test_claim_exposes_previous() {
        let table = KeyOwnershipTable::new();
        let a = latch(1);
        let b = latch(2);

        assert!(table.claim(Key::from("k"), a.clone()).is_none());
        assert_eq!(table.claim(Key::from("k"), b.clone()), Some(a));
        assert_eq!(table.claimant(&Key::from("k")), Some(b));
    }

    #[test]
    fn test_stale_release_keeps_newer_claim() {
        let table = KeyOwnershipTable::new();
        let old = latch(1);
        let new = latch(1);

        table.claim(Key::from("k"), old.clone());
        table.claim(Key::from("k"), new.clone());

        assert!(!table.release_if(&Key::from("k"), &old));
        assert_eq!(table.claimant(&Key::from("k")), Some(new.clone()));
        assert!(table.release_if(&Key::from("k"), &new));
        assert!(table.is_empty());
    }

    #[test]
    fn test_snapshot_deduplicates() {
        let table = KeyOwnershipTable::new();
        let a = latch(1);
        let b = latch(2);
        for k in ["x", "y", "z"] {
            table.claim(Key::from(k), a.clone());
        }
        table.claim(Key::from("w"), b.clone());

        let snapshot: HashSet<_> = table.snapshot_latches().into_iter().collect();
        assert_eq!(snapshot, [a, b].into_iter().collect());
        assert_eq!(table.len(), 4);

        table.clear();
        assert!(table.is_empty());
    }
}
