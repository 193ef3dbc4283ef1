// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Registry of remote transactions known to the ordering core.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::txn::GlobalTxId;

use super::error::OrderError;
use super::state::{TxValidationState, ValidationOutcome};

/// How many finished transaction ids are remembered.
const COMPLETED_CAPACITY: usize = 4096;

#[derive(Default)]
struct Completed {
    // `Some` holds the error a failed validation ended with.
    ids: HashMap<GlobalTxId, Option<OrderError>>,
    order: VecDeque<GlobalTxId>,
}

impl Completed {
    fn insert(&mut self, gtx: GlobalTxId, failure: Option<OrderError>) {
        if self.ids.insert(gtx, failure).is_some() {
            return;
        }
        self.order.push_back(gtx);
        if self.order.len() > COMPLETED_CAPACITY {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
    }
}

/// Maps a global transaction id to its validation state.
///
/// A commit or rollback that arrives before its prepare creates the entry;
/// the prepare then finds and reuses it. Recently finished ids are
/// remembered, with the error of a failed validation, so that a late
/// command neither recreates an entry nobody will ever remove nor reports a
/// failed transaction as committed.
#[derive(Default)]
pub struct RemoteTxTable {
    txs: Mutex<HashMap<GlobalTxId, Arc<TxValidationState>>>,
    completed: Mutex<Completed>,
}

impl RemoteTxTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, gtx: GlobalTxId) -> Arc<TxValidationState> {
        self.txs
            .lock()
            .entry(gtx)
            .or_insert_with(|| TxValidationState::new(gtx))
            .clone()
    }

    pub fn get(&self, gtx: GlobalTxId) -> Option<Arc<TxValidationState>> {
        self.txs.lock().get(&gtx).cloned()
    }

    /// Removes `gtx` and remembers it as finished.
    pub fn remove(&self, gtx: GlobalTxId) -> Option<Arc<TxValidationState>> {
        let removed = self.txs.lock().remove(&gtx);
        let failure = removed.as_deref().and_then(failure_of);
        self.completed.lock().insert(gtx, failure);
        removed
    }

    /// Removes `gtx` only if it still maps to `state`.
    pub(crate) fn remove_if(&self, state: &Arc<TxValidationState>) -> bool {
        let gtx = state.gtx();
        let removed = {
            let mut txs = self.txs.lock();
            match txs.get(&gtx) {
                Some(current) if Arc::ptr_eq(current, state) => {
                    txs.remove(&gtx);
                    true
                }
                _ => false,
            }
        };
        if removed {
            let failure = failure_of(state);
            self.completed.lock().insert(gtx, failure);
        }
        removed
    }

    /// How `gtx` ended, if it finished recently and has no live entry.
    ///
    /// `Err` carries the error its validation failed with.
    pub fn finished(&self, gtx: GlobalTxId) -> Option<Result<(), OrderError>> {
        if self.txs.lock().contains_key(&gtx) {
            return None;
        }
        match self.completed.lock().ids.get(&gtx)? {
            Some(e) => Some(Err(e.clone())),
            None => Some(Ok(())),
        }
    }

    /// Whether `state` is the live entry for its transaction.
    pub fn is_current(&self, state: &Arc<TxValidationState>) -> bool {
        self.txs
            .lock()
            .get(&state.gtx())
            .is_some_and(|current| Arc::ptr_eq(current, state))
    }

    /// Whether `gtx` finished recently and has no live entry.
    pub fn is_completed(&self, gtx: GlobalTxId) -> bool {
        self.finished(gtx).is_some()
    }

    pub fn len(&self) -> usize {
        self.txs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.lock().is_empty()
    }

    /// Drops every entry and forgets finished ids.
    ///
    /// Returns the states that were live, so the caller can release them
    /// outside this table's lock.
    pub fn clear(&self) -> Vec<Arc<TxValidationState>> {
        let drained = self.txs.lock().drain().map(|(_, s)| s).collect();
        *self.completed.lock() = Completed::default();
        drained
    }
}

fn failure_of(state: &TxValidationState) -> Option<OrderError> {
    match state.outcome() {
        Some(ValidationOutcome::Failed(e)) => Some(e),
        _ => None,
    }
}
