// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Ordering-core error types.

use crate::config::ConfigError;
use crate::lock::LockError;
use crate::storage::StorageError;
use crate::txn::GlobalTxId;

/// Errors raised by the total-order core.
///
/// Stale releases and repeated releases are not errors; they are ignored
/// where they happen.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("validation state of {0} reused before its previous cycle was released")]
    StateInUse(GlobalTxId),

    #[error("transaction {0} depends on its own latch")]
    SelfDependency(GlobalTxId),

    #[error("cannot prepare transaction {0}: it was already marked for rollback")]
    MarkedForRollback(GlobalTxId),

    #[error("prepare of transaction {0} was not delivered through total order")]
    NotTotalOrder(GlobalTxId),

    #[error("no prepare recorded for transaction {0}")]
    MissingPrepare(GlobalTxId),

    #[error("validation of transaction {0} was interrupted")]
    Interrupted(GlobalTxId),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl OrderError {
    /// Whether a client may simply retry the transaction.
    pub fn is_retryable(&self) -> bool {
        match self {
            OrderError::Lock(e) => e.is_retryable(),
            OrderError::Interrupted(_) => true,
            _ => false,
        }
    }
}
