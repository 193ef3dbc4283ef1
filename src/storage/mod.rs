// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Keys, write operations and the entry-apply collaborator.
//!
//! The storage engine itself lives outside the ordering core. Validation
//! tasks only see it through [`EntryApplier`]: once every dependency latch
//! has cleared and the per-key locks are held, the task stages the
//! transaction's [`Modification`]s and, for one-phase commits, applies them
//! straight away.

mod applier;
mod error;
mod key;
mod modification;

pub use applier::{EntryApplier, MemoryStore};
pub use error::StorageError;
pub use key::{Key, Value, MAX_KEY_SIZE};
pub use modification::{modified_keys, Modification};
