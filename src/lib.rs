// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! ordergrid: transaction admission and lock ordering for a transactional
//! in-memory data grid.
//!
//! Prepares delivered in a cluster-wide total order are admitted by the
//! [`TotalOrderManager`], which derives per-key wait dependencies and
//! barriers admission against in-flight state transfer. Validation then
//! takes per-key locks through the [`LockManager`] and hands the writes to
//! an [`EntryApplier`].

pub mod command;
pub mod config;
pub mod lock;
pub mod storage;
pub mod sync;
pub mod totalorder;
pub mod txn;

pub use command::{CommitCommand, PrepareCommand, RollbackCommand, TxCommand};
pub use config::{ConfigError, GridConfig, LockingConfig, TotalOrderConfig};
pub use lock::{
    InvocationContext, LockContainer, LockError, LockHolder, LockManager, PerEntryLockContainer,
    StripedLockContainer,
};
pub use storage::{EntryApplier, Key, MemoryStore, Modification, StorageError, Value};
pub use sync::Latch;
pub use totalorder::{OrderError, TotalOrderManager, TxValidationState, ValidationOutcome};
pub use txn::{GlobalTxId, NodeId, TxIdGenerator};
