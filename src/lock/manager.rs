// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Cache-facing lock manager.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::config::LockingConfig;
use crate::storage::Key;
use crate::txn::GlobalTxId;

use super::context::InvocationContext;
use super::error::LockError;
use super::{create_lock_container, LockContainer, LockHolder};

/// Applies the timeout policy and unit-of-work bookkeeping on top of a
/// [`LockContainer`].
pub struct LockManager {
    container: Arc<dyn LockContainer>,
    default_timeout: Duration,
}

impl LockManager {
    pub fn new(container: Arc<dyn LockContainer>, default_timeout: Duration) -> Self {
        Self {
            container,
            default_timeout,
        }
    }

    /// Builds the container described by `config`.
    pub fn from_config(config: &LockingConfig) -> Self {
        Self::new(
            create_lock_container(config),
            config.lock_acquisition_timeout,
        )
    }

    /// Locks `key` for the context's owner.
    ///
    /// Returns `false` on timeout. A key the context already holds succeeds
    /// without touching the container. Dropping the future abandons the
    /// wait without taking the lock.
    pub async fn acquire(&self, key: &Key, ctx: &mut InvocationContext) -> bool {
        if ctx.has_locked(key) {
            return true;
        }

        let owner = ctx.owner();
        let timeout = ctx.lock_timeout(self.default_timeout);
        trace!(%owner, ?key, ?timeout, "acquiring lock");

        match self.container.acquire(key, owner, timeout).await {
            Some(_) => {
                ctx.register_locked_key(key.clone());
                true
            }
            None => {
                debug!(%owner, ?key, holder = ?self.container.owner(key), "lock acquisition timed out");
                false
            }
        }
    }

    /// Locks every key in order, stopping at the first timeout.
    ///
    /// Keys locked before the failure stay registered in `ctx`; the caller
    /// unwinds them with [`release_all`](Self::release_all).
    pub async fn acquire_all(
        &self,
        keys: &[Key],
        ctx: &mut InvocationContext,
    ) -> Result<(), LockError> {
        for key in keys {
            if !self.acquire(key, ctx).await {
                return Err(LockError::Timeout {
                    key: key.clone(),
                    owner: ctx.owner(),
                    holder: self.container.owner(key),
                });
            }
        }
        Ok(())
    }

    /// Releases the context's locks, last-registered first.
    ///
    /// Every key the context locked is unlocked, whatever happened to its
    /// entry. Looked-up entries it did not lock are unlocked too when they
    /// may have been written, unless the container cannot tell owners apart.
    /// Returns how many locks were released.
    pub fn release_all(&self, ctx: &mut InvocationContext) -> usize {
        let owner = ctx.owner();
        let keys = ctx.take_locked_keys();
        let mut released = keys.len();
        for key in keys.iter().rev() {
            self.container.release(key, owner);
        }

        let unregistered = ctx.take_unregistered_entries();
        if self.container.is_owner_aware() {
            for key in &unregistered {
                if self.container.owner(key) == LockHolder::Owner(owner) {
                    trace!(%owner, ?key, "unlocking entry locked outside this context");
                    self.container.release(key, owner);
                    released += 1;
                }
            }
        }
        if released > 0 {
            trace!(%owner, released, "released locks");
        }
        released
    }

    /// Unconditionally releases one hold on `key`.
    pub fn release(&self, key: &Key, owner: GlobalTxId) {
        self.container.release(key, owner);
    }

    pub fn is_locked(&self, key: &Key) -> bool {
        self.container.is_locked(key)
    }

    /// Returns the holder of `key`, or [`LockHolder::Unknown`] when the
    /// container cannot identify it.
    pub fn owner(&self, key: &Key) -> LockHolder {
        self.container.owner(key)
    }

    pub fn is_owned_by(&self, key: &Key, owner: GlobalTxId) -> bool {
        self.container.owner(key) == LockHolder::Owner(owner)
    }

    /// Number of locks currently held.
    pub fn lock_count(&self) -> usize {
        self.container.held_count()
    }

    /// Number of lock objects in the container.
    pub fn concurrency_level(&self) -> usize {
        self.container.size()
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }
}
