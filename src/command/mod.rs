// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Two-phase-commit commands, as far as the ordering core sees them.
//!
//! A [`PrepareCommand`] is either a [`StandardPrepare`], fixed at
//! construction, or a [`TotalOrderPrepare`] whose one-phase and
//! skip-write-skew flags may be flipped later. The variant is chosen once
//! when the command is built. Commit and rollback carry only the
//! transaction id; for the ordering core they just trigger the release of
//! the transaction's claims.

mod tx;

pub use tx::{
    CommitCommand, PrepareCommand, RollbackCommand, StandardPrepare, TotalOrderPrepare, TxCommand,
};
