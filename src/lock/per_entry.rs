// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! One lock per key, created on demand and reclaimed when idle.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::storage::Key;
use crate::txn::GlobalTxId;

use super::slot::{LockSlot, SlotRelease};
use super::{LockContainer, LockHandle, LockHolder};

const MAX_SHARDS: usize = 256;

type Shard = Mutex<HashMap<Key, Arc<LockSlot>>>;

/// Container holding a lock object per key currently in use.
///
/// A key's lock lives while someone holds it or waits on it; the last party
/// to let go removes it from the table.
pub struct PerEntryLockContainer {
    shards: Box<[Shard]>,
    owner_aware: bool,
}

/// Keeps a slot alive while a caller waits on it and reclaims it afterwards.
struct SlotRef<'a> {
    container: &'a PerEntryLockContainer,
    key: &'a Key,
    slot: Option<Arc<LockSlot>>,
}

impl Drop for SlotRef<'_> {
    fn drop(&mut self) {
        drop(self.slot.take());
        self.container.reclaim_if_idle(self.key);
    }
}

impl PerEntryLockContainer {
    /// `initial_capacity` is spread across the internal shards.
    pub fn new(initial_capacity: usize, owner_aware: bool) -> Self {
        let shard_count = initial_capacity.clamp(1, MAX_SHARDS).next_power_of_two();
        let per_shard = initial_capacity.div_ceil(shard_count);
        Self {
            shards: (0..shard_count)
                .map(|_| Mutex::new(HashMap::with_capacity(per_shard)))
                .collect(),
            owner_aware,
        }
    }

    #[inline]
    fn shard(&self, key: &Key) -> &Shard {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) & (self.shards.len() - 1)]
    }

    #[inline]
    fn tag(&self, owner: GlobalTxId) -> Option<GlobalTxId> {
        self.owner_aware.then_some(owner)
    }

    fn slot_for<'a>(&'a self, key: &'a Key) -> SlotRef<'a> {
        let slot = self
            .shard(key)
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(LockSlot::new()))
            .clone();
        SlotRef {
            container: self,
            key,
            slot: Some(slot),
        }
    }

    fn reclaim_if_idle(&self, key: &Key) {
        let mut shard = self.shard(key).lock();
        let idle = shard
            .get(key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1 && !slot.is_locked());
        if idle {
            shard.remove(key);
        }
    }
}

#[async_trait]
impl LockContainer for PerEntryLockContainer {
    async fn acquire(&self, key: &Key, owner: GlobalTxId, timeout: Duration) -> Option<LockHandle> {
        let slot_ref = self.slot_for(key);
        let slot = slot_ref.slot.as_ref()?;
        let depth = slot.acquire(self.tag(owner), timeout).await?;
        Some(LockHandle {
            key: key.clone(),
            holder: if self.owner_aware {
                LockHolder::Owner(owner)
            } else {
                LockHolder::Unknown
            },
            depth,
        })
    }

    fn release(&self, key: &Key, owner: GlobalTxId) {
        let mut shard = self.shard(key).lock();
        let Some(slot) = shard.get(key) else {
            return;
        };
        if slot.release(self.tag(owner)) == SlotRelease::Freed && Arc::strong_count(slot) == 1 {
            shard.remove(key);
        }
    }

    fn is_locked(&self, key: &Key) -> bool {
        self.shard(key)
            .lock()
            .get(key)
            .is_some_and(|slot| slot.is_locked())
    }

    fn owner(&self, key: &Key) -> LockHolder {
        self.shard(key)
            .lock()
            .get(key)
            .map_or(LockHolder::Free, |slot| slot.holder())
    }

    fn size(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    fn held_count(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().values().filter(|slot| slot.is_locked()).count())
            .sum()
    }

    fn is_owner_aware(&self) -> bool {
        self.owner_aware
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::NodeId;

    fn gtx(seq: u64) -> GlobalTxId {
        GlobalTxId::new(NodeId(1), seq)
    }

    #[tokio::test]
    async fn test_entries_reclaimed_after_release() {
        let container = PerEntryLockContainer::new(16, true);
        let a = Key::from("a");
        let b = Key::from("b");

        container.acquire(&a, gtx(1), Duration::ZERO).await.unwrap();
        container.acquire(&b, gtx(1), Duration::ZERO).await.unwrap();
        assert_eq!(container.size(), 2);
        assert_eq!(container.held_count(), 2);

        container.release(&a, gtx(1));
        assert_eq!(container.size(), 1);
        container.release(&b, gtx(1));
        assert_eq!(container.size(), 0);
    }

    #[tokio::test]
    async fn test_no_false_contention() {
        let container = PerEntryLockContainer::new(1, true);
        container
            .acquire(&Key::from("a"), gtx(1), Duration::ZERO)
            .await
            .unwrap();
        assert!(container
            .acquire(&Key::from("b"), gtx(2), Duration::ZERO)
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_timed_out_waiter_reclaims_entry() {
        let container = PerEntryLockContainer::new(4, true);
        let key = Key::from("k");
        container.acquire(&key, gtx(1), Duration::ZERO).await.unwrap();

        assert!(container
            .acquire(&key, gtx(2), Duration::from_millis(10))
            .await
            .is_none());
        assert_eq!(container.size(), 1);

        container.release(&key, gtx(1));
        assert_eq!(container.size(), 0);
        assert_eq!(container.owner(&key), LockHolder::Free);
    }

    #[tokio::test]
    async fn test_failed_try_on_free_key_leaves_nothing() {
        let container = PerEntryLockContainer::new(4, false);
        let key = Key::from("k");
        container.acquire(&key, gtx(1), Duration::ZERO).await.unwrap();
        // Plain locks are not reentrant, even for the same transaction.
        assert!(container.acquire(&key, gtx(1), Duration::ZERO).await.is_none());
        assert_eq!(container.owner(&key), LockHolder::Unknown);

        container.release(&key, gtx(1));
        assert_eq!(container.size(), 0);
    }

    #[tokio::test]
    async fn test_release_unknown_key_is_noop() {
        let container = PerEntryLockContainer::new(4, true);
        container.release(&Key::from("missing"), gtx(1));
        assert_eq!(container.size(), 0);
    }

    #[tokio::test]
    async fn test_handoff_between_owners() {
        let container = Arc::new(PerEntryLockContainer::new(4, true));
        let key = Key::from("k");
        container.acquire(&key, gtx(1), Duration::ZERO).await.unwrap();

        let waiter = {
            let container = container.clone();
            let key = key.clone();
            tokio::spawn(async move {
                container
                    .acquire(&key, gtx(2), Duration::from_secs(5))
                    .await
                    .map(|h| h.holder)
            })
        };
        tokio::task::yield_now().await;
        container.release(&key, gtx(1));

        assert_eq!(waiter.await.unwrap(), Some(LockHolder::Owner(gtx(2))));
        assert_eq!(container.size(), 1);
        container.release(&key, gtx(2));
        assert_eq!(container.size(), 0);
    }
}
