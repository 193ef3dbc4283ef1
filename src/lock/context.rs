// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Unit-of-work context consumed by the lock manager.

use std::collections::HashMap;
use std::time::Duration;

use crate::storage::Key;
use crate::txn::GlobalTxId;

/// Per-invocation behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Try each lock once, never wait.
    ZeroLockAcquisitionTimeout,
    /// Do not compare conditional writes against the current value.
    SkipWriteSkewCheck,
}

/// What happened to an entry this unit of work looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryFate {
    /// Read but not changed.
    Unmodified,
    /// Written or removed.
    Changed,
    /// Locked ahead of a write that has not produced an entry yet.
    LockPlaceholder,
}

/// The unit of work on whose behalf locks are taken.
///
/// Tracks the keys locked so far in registration order, plus the fate of the
/// entries it looked up, which decides what `release_all` unlocks.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    owner: GlobalTxId,
    flags: Vec<Flag>,
    lock_timeout: Option<Duration>,
    locked_keys: Vec<Key>,
    entries: HashMap<Key, EntryFate>,
}

impl InvocationContext {
    pub fn new(owner: GlobalTxId) -> Self {
        Self {
            owner,
            flags: Vec::new(),
            lock_timeout: None,
            locked_keys: Vec::new(),
            entries: HashMap::new(),
        }
    }

    pub fn with_flag(mut self, flag: Flag) -> Self {
        self.set_flag(flag);
        self
    }

    /// Overrides the configured acquisition timeout for this unit of work.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    #[inline]
    pub fn owner(&self) -> GlobalTxId {
        self.owner
    }

    pub fn set_flag(&mut self, flag: Flag) {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
    }

    #[inline]
    pub fn has_flag(&self, flag: Flag) -> bool {
        self.flags.contains(&flag)
    }

    /// Resolves the timeout to use, given the configured default.
    pub fn lock_timeout(&self, default: Duration) -> Duration {
        if self.has_flag(Flag::ZeroLockAcquisitionTimeout) {
            Duration::ZERO
        } else {
            self.lock_timeout.unwrap_or(default)
        }
    }

    /// Keys locked by this unit of work, oldest first.
    pub fn locked_keys(&self) -> &[Key] {
        &self.locked_keys
    }

    pub fn has_locked(&self, key: &Key) -> bool {
        self.locked_keys.contains(key)
    }

    pub(crate) fn register_locked_key(&mut self, key: Key) {
        self.entries
            .entry(key.clone())
            .or_insert(EntryFate::LockPlaceholder);
        self.locked_keys.push(key);
    }

    pub(crate) fn take_locked_keys(&mut self) -> Vec<Key> {
        std::mem::take(&mut self.locked_keys)
    }

    /// Records what happened to a looked-up entry.
    pub fn record_entry(&mut self, key: Key, fate: EntryFate) {
        self.entries.insert(key, fate);
    }

    pub fn entry_fate(&self, key: &Key) -> Option<EntryFate> {
        self.entries.get(key).copied()
    }

    /// Whether `key` may still be locked on release.
    ///
    /// A key this context locked always is, whatever its entry's fate. Of
    /// the other keys, only an entry known to be untouched is skipped.
    pub fn needs_unlock(&self, key: &Key) -> bool {
        self.has_locked(key) || !matches!(self.entry_fate(key), Some(EntryFate::Unmodified))
    }

    /// Removes and returns the looked-up entries this context did not lock
    /// itself but which may be locked for its owner.
    pub(crate) fn take_unregistered_entries(&mut self) -> Vec<Key> {
        let keys: Vec<Key> = self
            .entries
            .keys()
            .filter(|k| !self.has_locked(k) && self.needs_unlock(k))
            .cloned()
            .collect();
        for key in &keys {
            self.entries.remove(key);
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::NodeId;

    fn ctx() -> InvocationContext {
        InvocationContext::new(GlobalTxId::new(NodeId(1), 1))
    }

    #[test]
    fn test_zero_timeout_flag_wins() {
        let ctx = ctx()
            .with_lock_timeout(Duration::from_secs(3))
            .with_flag(Flag::ZeroLockAcquisitionTimeout);
        assert_eq!(ctx.lock_timeout(Duration::from_secs(10)), Duration::ZERO);
    }

    #[test]
    fn test_timeout_override() {
        let ctx = ctx().with_lock_timeout(Duration::from_secs(3));
        assert_eq!(ctx.lock_timeout(Duration::from_secs(10)), Duration::from_secs(3));
        assert_eq!(
            InvocationContext::new(ctx.owner()).lock_timeout(Duration::from_secs(10)),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_needs_unlock_bias() {
        let mut ctx = ctx();
        let missing = Key::from("missing");
        let read = Key::from("read");
        let written = Key::from("written");
        let locked = Key::from("locked");

        ctx.record_entry(read.clone(), EntryFate::Unmodified);
        ctx.record_entry(written.clone(), EntryFate::Changed);
        ctx.register_locked_key(locked.clone());

        assert!(ctx.needs_unlock(&missing));
        assert!(!ctx.needs_unlock(&read));
        assert!(ctx.needs_unlock(&written));
        assert!(ctx.needs_unlock(&locked));
        assert_eq!(ctx.entry_fate(&locked), Some(EntryFate::LockPlaceholder));

        // Locked, then only read: still unlocked.
        ctx.record_entry(locked.clone(), EntryFate::Unmodified);
        assert!(ctx.needs_unlock(&locked));

        assert_eq!(ctx.take_unregistered_entries(), vec![written.clone()]);
        assert_eq!(ctx.entry_fate(&written), None);
        assert_eq!(ctx.entry_fate(&read), Some(EntryFate::Unmodified));
    }

    #[test]
    fn test_flags_deduplicated() {
        let mut ctx = ctx();
        ctx.set_flag(Flag::SkipWriteSkewCheck);
        ctx.set_flag(Flag::SkipWriteSkewCheck);
        assert!(ctx.has_flag(Flag::SkipWriteSkewCheck));
        assert!(!ctx.has_flag(Flag::ZeroLockAcquisitionTimeout));
    }
}
