// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Storage error types.

use crate::txn::GlobalTxId;

use super::Key;

/// Errors raised by an [`EntryApplier`](super::EntryApplier).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("key too large: {size} > {max}")]
    KeyTooLarge { size: usize, max: usize },

    #[error("write skew detected at key {key:?}")]
    WriteSkew { key: Key },

    #[error("nothing prepared for transaction {0}")]
    NotPrepared(GlobalTxId),
}
