// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! One-shot blocked/unblocked gate.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::txn::GlobalTxId;

/// Who published a latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchOrigin {
    /// The dependency latch of a transaction.
    Transaction(GlobalTxId),
    /// A state-transfer barrier for the given topology epoch.
    StateTransfer(u64),
    /// A latch used internally to gate reuse of a validation state.
    Gate,
}

struct LatchInner {
    origin: LatchOrigin,
    unblocked: AtomicBool,
    notify: Notify,
}

/// A single-shot gate that moves from blocked to unblocked exactly once.
///
/// Cloning yields another handle to the same gate. Equality and hashing are
/// by identity: two latches created for the same transaction are different
/// latches, so a retried prepare never matches the latch of its previous
/// attempt.
#[derive(Clone)]
pub struct Latch {
    inner: Arc<LatchInner>,
}

impl Latch {
    fn with_origin(origin: LatchOrigin, unblocked: bool) -> Self {
        Self {
            inner: Arc::new(LatchInner {
                origin,
                unblocked: AtomicBool::new(unblocked),
                notify: Notify::new(),
            }),
        }
    }

    /// Creates a blocked latch owned by a transaction.
    pub fn new(gtx: GlobalTxId) -> Self {
        Self::with_origin(LatchOrigin::Transaction(gtx), false)
    }

    /// Creates a blocked state-transfer barrier.
    pub fn barrier(epoch: u64) -> Self {
        Self::with_origin(LatchOrigin::StateTransfer(epoch), false)
    }

    pub(crate) fn gate(unblocked: bool) -> Self {
        Self::with_origin(LatchOrigin::Gate, unblocked)
    }

    #[inline]
    pub fn origin(&self) -> LatchOrigin {
        self.inner.origin
    }

    #[inline]
    pub fn is_blocked(&self) -> bool {
        !self.inner.unblocked.load(Ordering::Acquire)
    }

    /// Unblocks the latch and wakes every waiter.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn unblock(&self) -> bool {
        if self.inner.unblocked.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.notify.notify_waiters();
        true
    }

    /// Waits until the latch is unblocked.
    ///
    /// Cancel-safe: dropping the future stops the wait and leaves the latch
    /// untouched.
    pub async fn wait(&self) {
        loop {
            let mut notified = pin!(self.inner.notify.notified());
            // Register before checking so an unblock between the check and the
            // await cannot be missed.
            notified.as_mut().enable();
            if !self.is_blocked() {
                return;
            }
            notified.await;
        }
    }

    /// Waits at most `timeout`; returns whether the latch is unblocked.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }

    /// Returns true if both handles refer to the same latch.
    #[inline]
    pub fn ptr_eq(&self, other: &Latch) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Latch {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Latch {}

impl Hash for Latch {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.inner), state);
    }
}

impl fmt::Debug for Latch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Latch")
            .field("origin", &self.inner.origin)
            .field("blocked", &self.is_blocked())
            .finish()
    }
}
