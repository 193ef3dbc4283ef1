// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Total-order transaction admission.
//!
//! Prepares arrive on a single delivery task in the same order on every
//! node. [`TotalOrderManager`] turns that order into per-key dependencies:
//! a transaction that writes a key waits for the previous transaction that
//! claimed the key, and for any state-transfer barrier that was active when
//! it was admitted. Transactions with disjoint keys never wait on each
//! other.
//!
//! Validation runs on a [`ValidationExecutor`], which parks tasks whose
//! dependencies are still blocked instead of letting them hold a worker.
//! `release` and the end of a state transfer nudge it to re-check.
//!
//! ```text
//! Idle ── ensure_order ──▶ Claimed ── release ──▶ Released ──▶ Idle
//! ```

mod error;
mod executor;
mod keys;
mod manager;
mod state;
mod table;
mod validation;

pub use error::OrderError;
pub use executor::{BlockingTask, ValidationExecutor};
pub use keys::KeyOwnershipTable;
pub use manager::TotalOrderManager;
pub use state::{
    CompletionMark, PreparePhase, TxValidationState, ValidationOutcome, ValidationPhase,
};
pub use table::RemoteTxTable;
