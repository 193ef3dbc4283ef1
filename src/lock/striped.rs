// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Lock striping: a fixed array of locks shared by hash bucket.

use std::hash::{Hash, Hasher};
use std::time::Duration;

use async_trait::async_trait;

use crate::storage::Key;
use crate::txn::GlobalTxId;

use super::slot::LockSlot;
use super::{LockContainer, LockHandle, LockHolder};

/// Container with a fixed number of shared locks.
///
/// Keys of different transactions that hash to the same stripe contend with
/// each other. A stripe is always reentrant for the transaction holding it,
/// so one transaction's keys never block each other; every hold is released
/// separately. Plain stripes only hide the holder: [`owner`] reports
/// [`LockHolder::Unknown`].
///
/// [`owner`]: LockContainer::owner
pub struct StripedLockContainer {
    stripes: Box<[LockSlot]>,
    owner_aware: bool,
}

impl StripedLockContainer {
    /// Creates `concurrency_level` stripes, rounded up to a power of two.
    pub fn new(concurrency_level: usize, owner_aware: bool) -> Self {
        let count = concurrency_level.max(1).next_power_of_two();
        Self {
            stripes: (0..count).map(|_| LockSlot::new()).collect(),
            owner_aware,
        }
    }

    #[inline]
    fn stripe_index(&self, key: &Key) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & (self.stripes.len() - 1)
    }

    #[inline]
    fn stripe(&self, key: &Key) -> &LockSlot {
        &self.stripes[self.stripe_index(key)]
    }

    fn reported(&self, holder: LockHolder) -> LockHolder {
        match holder {
            LockHolder::Owner(_) if !self.owner_aware => LockHolder::Unknown,
            other => other,
        }
    }

    /// Returns true if both keys map onto the same stripe.
    pub fn shares_stripe(&self, a: &Key, b: &Key) -> bool {
        self.stripe_index(a) == self.stripe_index(b)
    }
}

#[async_trait]
impl LockContainer for StripedLockContainer {
    async fn acquire(&self, key: &Key, owner: GlobalTxId, timeout: Duration) -> Option<LockHandle> {
        let depth = self.stripe(key).acquire(Some(owner), timeout).await?;
        Some(LockHandle {
            key: key.clone(),
            holder: self.reported(LockHolder::Owner(owner)),
            depth,
        })
    }

    fn release(&self, key: &Key, owner: GlobalTxId) {
        self.stripe(key).release(Some(owner));
    }

    fn is_locked(&self, key: &Key) -> bool {
        self.stripe(key).is_locked()
    }

    fn owner(&self, key: &Key) -> LockHolder {
        self.reported(self.stripe(key).holder())
    }

    fn size(&self) -> usize {
        self.stripes.len()
    }

    fn held_count(&self) -> usize {
        self.stripes.iter().filter(|s| s.is_locked()).count()
    }

    fn is_owner_aware(&self) -> bool {
        self.owner_aware
    }
}
