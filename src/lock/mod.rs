// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Per-key mutual exclusion.
//!
//! A [`LockContainer`] is the strategy that maps keys to exclusive locks.
//! Two axes of variation are supported:
//!
//! - **Striped vs. per-entry**: [`StripedLockContainer`] hashes every key onto
//!   a fixed array of shared locks (bounded memory, some false contention);
//!   [`PerEntryLockContainer`] keeps one lock per key in use and reclaims it
//!   once nobody holds or waits for it.
//! - **Owner-aware vs. plain**: owner-aware locks are tagged with the
//!   acquiring transaction and are reentrant for it; plain locks cannot tell
//!   who holds them. Plain per-entry locks are bare mutual exclusion. Plain
//!   stripes stay reentrant for their holder, since one transaction's keys
//!   often share a stripe.
//!
//! [`LockManager`] is the cache-facing layer on top: it applies the
//! acquisition-timeout policy from an [`InvocationContext`] and releases a
//! unit of work's locks in reverse registration order.
//!
//! Timeouts are not errors here. `acquire` yields `None`/`false` and the
//! caller rolls back; only the bulk helpers turn that into a [`LockError`].

mod context;
mod error;
mod manager;
mod per_entry;
mod slot;
mod striped;

pub use context::{EntryFate, Flag, InvocationContext};
pub use error::LockError;
pub use manager::LockManager;
pub use per_entry::PerEntryLockContainer;
pub use striped::StripedLockContainer;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::LockingConfig;
use crate::storage::Key;
use crate::txn::GlobalTxId;

/// Who holds a lock, as far as the container can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockHolder {
    /// Not locked.
    Free,
    /// Held by this transaction.
    Owner(GlobalTxId),
    /// Held by some other unit of work whose identity the lock does not record.
    Unknown,
}

impl LockHolder {
    #[inline]
    pub fn is_free(&self) -> bool {
        matches!(self, LockHolder::Free)
    }
}

/// Proof of a successful acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub key: Key,
    pub holder: LockHolder,
    /// Hold count after this acquisition (greater than one when reentrant).
    pub depth: u32,
}

/// Strategy mapping keys to exclusive locks.
#[async_trait]
pub trait LockContainer: Send + Sync {
    /// Tries to lock `key` for `owner` within `timeout`.
    ///
    /// Returns `None` on timeout. Succeeds immediately when `owner` already
    /// holds the lock, except for plain per-entry locks, which ignore `owner`.
    async fn acquire(&self, key: &Key, owner: GlobalTxId, timeout: Duration) -> Option<LockHandle>;

    /// Releases one hold on `key`. A no-op when `owner` does not hold it.
    fn release(&self, key: &Key, owner: GlobalTxId);

    fn is_locked(&self, key: &Key) -> bool;

    /// Best-effort holder introspection.
    fn owner(&self, key: &Key) -> LockHolder;

    /// Number of lock objects (stripes, or live per-key entries).
    fn size(&self) -> usize;

    /// Number of lock objects currently held.
    fn held_count(&self) -> usize;

    fn is_owner_aware(&self) -> bool;
}

/// Builds the container selected by `config`.
pub fn create_lock_container(config: &LockingConfig) -> Arc<dyn LockContainer> {
    if config.use_lock_striping {
        Arc::new(StripedLockContainer::new(
            config.concurrency_level,
            config.owner_aware,
        ))
    } else {
        Arc::new(PerEntryLockContainer::new(
            config.concurrency_level,
            config.owner_aware,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_selects_strategy() {
        let striped = create_lock_container(
            &LockingConfig::default()
                .with_lock_striping(true)
                .with_concurrency_level(16),
        );
        assert_eq!(striped.size(), 16);
        assert!(striped.is_owner_aware());

        let per_entry =
            create_lock_container(&LockingConfig::default().with_owner_aware(false));
        assert_eq!(per_entry.size(), 0);
        assert!(!per_entry.is_owner_aware());
    }
}
