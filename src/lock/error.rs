// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Lock error types.

use crate::storage::Key;
use crate::txn::GlobalTxId;

use super::LockHolder;

/// Errors surfaced by the bulk lock operations.
///
/// Single-key acquisition reports timeouts as `false`; a unit of work that
/// needs every key converts the first miss into this error so the
/// transaction can be rolled back and retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("{owner} timed out acquiring lock on {key:?} (held by {holder:?})")]
    Timeout {
        key: Key,
        owner: GlobalTxId,
        holder: LockHolder,
    },
}

impl LockError {
    /// Timeouts are transient; the transaction may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LockError::Timeout { .. })
    }
}
