// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The entry-apply collaborator and an in-memory implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::txn::GlobalTxId;

use super::error::StorageError;
use super::key::{Key, Value, MAX_KEY_SIZE};
use super::modification::Modification;

/// Applies a transaction's writes once ordering and locking are settled.
///
/// The ordering core treats this as opaque: `prepare` validates and stages,
/// `commit` makes staged writes visible, `rollback` discards them.
#[async_trait]
pub trait EntryApplier: Send + Sync {
    /// Validates and stages `modifications` for `gtx`.
    ///
    /// When `skip_write_skew_check` is set, conditional writes are staged
    /// without comparing against the current value.
    async fn prepare(
        &self,
        gtx: GlobalTxId,
        modifications: &[Modification],
        skip_write_skew_check: bool,
    ) -> Result<(), StorageError>;

    /// Applies the staged writes and returns how many entries changed.
    async fn commit(&self, gtx: GlobalTxId) -> Result<usize, StorageError>;

    /// Discards any staged writes.
    async fn rollback(&self, gtx: GlobalTxId);
}

/// Hash-map backed applier.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<Key, Value>>,
    staged: Mutex<HashMap<GlobalTxId, Vec<Modification>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the committed value of `key`.
    pub fn get(&self, key: &Key) -> Option<Value> {
        self.data.read().get(key).cloned()
    }

    /// Number of committed entries.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Number of transactions with staged writes.
    pub fn staged_count(&self) -> usize {
        self.staged.lock().len()
    }

    fn check_write_skew(&self, modifications: &[Modification]) -> Result<(), StorageError> {
        let data = self.data.read();
        for modification in modifications {
            if let Modification::Replace { key, expected, .. } = modification {
                if data.get(key) != expected.as_ref() {
                    return Err(StorageError::WriteSkew { key: key.clone() });
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EntryApplier for MemoryStore {
    async fn prepare(
        &self,
        gtx: GlobalTxId,
        modifications: &[Modification],
        skip_write_skew_check: bool,
    ) -> Result<(), StorageError> {
        for key in modifications.iter().flat_map(Modification::affected_keys) {
            if key.len() > MAX_KEY_SIZE {
                return Err(StorageError::KeyTooLarge {
                    size: key.len(),
                    max: MAX_KEY_SIZE,
                });
            }
        }

        if !skip_write_skew_check {
            self.check_write_skew(modifications)?;
        }

        trace!(%gtx, ops = modifications.len(), "staged modifications");
        self.staged.lock().insert(gtx, modifications.to_vec());
        Ok(())
    }

    async fn commit(&self, gtx: GlobalTxId) -> Result<usize, StorageError> {
        let modifications = self
            .staged
            .lock()
            .remove(&gtx)
            .ok_or(StorageError::NotPrepared(gtx))?;

        let mut data = self.data.write();
        let mut changed = 0;
        for modification in modifications {
            match modification {
                Modification::Put { key, value } | Modification::Replace { key, value, .. } => {
                    data.insert(key, value);
                    changed += 1;
                }
                Modification::Remove { key } => {
                    if data.remove(&key).is_some() {
                        changed += 1;
                    }
                }
                Modification::PutAll(entries) => {
                    changed += entries.len();
                    data.extend(entries);
                }
                Modification::Clear => {
                    changed += data.len();
                    data.clear();
                }
            }
        }
        Ok(changed)
    }

    async fn rollback(&self, gtx: GlobalTxId) {
        self.staged.lock().remove(&gtx);
    }
}
