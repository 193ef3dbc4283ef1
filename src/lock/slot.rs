// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The exclusive lock shared by both container strategies.

use std::pin::pin;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::txn::GlobalTxId;

use super::LockHolder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    /// `owner` is `None` for plain (non-owner-aware) locks.
    Exclusive {
        owner: Option<GlobalTxId>,
        depth: u32,
    },
}

/// Outcome of releasing a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotRelease {
    /// The caller did not hold the lock; nothing changed.
    NotHeld,
    /// A reentrant hold was dropped but the owner still holds the lock.
    StillHeld,
    /// The lock is now free.
    Freed,
}

/// One exclusive lock: a stripe, or a single key's entry.
pub(crate) struct LockSlot {
    state: Mutex<SlotState>,
    released: Notify,
}

impl LockSlot {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Free),
            released: Notify::new(),
        }
    }

    /// Takes the lock if possible without waiting. Returns the hold depth.
    ///
    /// With `owner == None` the lock is plain mutual exclusion: a second
    /// acquisition never succeeds, whoever makes it.
    pub(crate) fn try_acquire(&self, owner: Option<GlobalTxId>) -> Option<u32> {
        let mut state = self.state.lock();
        match *state {
            SlotState::Free => {
                *state = SlotState::Exclusive { owner, depth: 1 };
                Some(1)
            }
            SlotState::Exclusive {
                owner: Some(holder),
                depth,
            } if owner == Some(holder) => {
                let depth = depth + 1;
                *state = SlotState::Exclusive { owner, depth };
                Some(depth)
            }
            SlotState::Exclusive { .. } => None,
        }
    }

    /// Waits up to `timeout` for the lock. A zero timeout tries exactly once.
    pub(crate) async fn acquire(&self, owner: Option<GlobalTxId>, timeout: Duration) -> Option<u32> {
        if timeout.is_zero() {
            return self.try_acquire(owner);
        }

        let deadline = Instant::now() + timeout;
        loop {
            let mut released = pin!(self.released.notified());
            released.as_mut().enable();
            if let Some(depth) = self.try_acquire(owner) {
                return Some(depth);
            }
            if tokio::time::timeout_at(deadline, released).await.is_err() {
                return self.try_acquire(owner);
            }
        }
    }

    /// Drops one hold. Plain locks ignore `owner` and always free.
    pub(crate) fn release(&self, owner: Option<GlobalTxId>) -> SlotRelease {
        let mut state = self.state.lock();
        let outcome = match *state {
            SlotState::Free => SlotRelease::NotHeld,
            SlotState::Exclusive { owner: None, .. } => {
                *state = SlotState::Free;
                SlotRelease::Freed
            }
            SlotState::Exclusive {
                owner: Some(holder),
                depth,
            } => {
                if owner != Some(holder) {
                    SlotRelease::NotHeld
                } else if depth > 1 {
                    *state = SlotState::Exclusive {
                        owner,
                        depth: depth - 1,
                    };
                    SlotRelease::StillHeld
                } else {
                    *state = SlotState::Free;
                    SlotRelease::Freed
                }
            }
        };
        drop(state);

        if outcome == SlotRelease::Freed {
            self.released.notify_waiters();
        }
        outcome
    }

    pub(crate) fn is_locked(&self) -> bool {
        !matches!(*self.state.lock(), SlotState::Free)
    }

    pub(crate) fn holder(&self) -> LockHolder {
        match *self.state.lock() {
            SlotState::Free => LockHolder::Free,
            SlotState::Exclusive {
                owner: Some(owner),
                ..
            } => LockHolder::Owner(owner),
            SlotState::Exclusive { owner: None, .. } => LockHolder::Unknown,
        }
    }
}
