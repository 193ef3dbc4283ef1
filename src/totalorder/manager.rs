// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The ordering state machine.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, trace, warn};

use crate::command::{CommitCommand, PrepareCommand, RollbackCommand};
use crate::config::GridConfig;
use crate::lock::LockManager;
use crate::storage::{EntryApplier, Key};
use crate::sync::Latch;
use crate::txn::GlobalTxId;

use super::error::OrderError;
use super::executor::ValidationExecutor;
use super::keys::KeyOwnershipTable;
use super::state::{PreparePhase, TxValidationState, ValidationOutcome};
use super::table::RemoteTxTable;
use super::validation::ValidationTask;

struct ManagerInner {
    keys_locked: KeyOwnershipTable,
    // Held for the whole of `ensure_order`, which makes admission and the
    // barrier snapshot mutually exclusive.
    state_transfer_in_progress: Mutex<Option<Latch>>,
    remote_txs: RemoteTxTable,
    // Transactions originated here, waiting to learn their prepare outcome.
    local_txs: Mutex<HashMap<GlobalTxId, oneshot::Sender<ValidationOutcome>>>,
    executor: ValidationExecutor,
    lock_manager: Arc<LockManager>,
    applier: Arc<dyn EntryApplier>,
    prepare_wait_timeout: Duration,
}

/// Turns a totally ordered stream of prepares into a safe concurrent
/// schedule.
///
/// Every delivered prepare claims its modified keys in the key-ownership
/// table. Whoever claimed a key before it becomes a dependency, and so does
/// an active state-transfer barrier. The validation task only runs once all
/// of those latches are unblocked.
///
/// [`deliver`](Self::deliver) and [`ensure_order`](Self::ensure_order) must
/// be called from a single delivery task, in delivery order. Everything else
/// may be called from anywhere.
///
/// Cloning is cheap and yields a handle to the same manager.
#[derive(Clone)]
pub struct TotalOrderManager {
    inner: Arc<ManagerInner>,
}

impl TotalOrderManager {
    /// Creates a manager on the current tokio runtime.
    pub fn new(
        config: &GridConfig,
        lock_manager: Arc<LockManager>,
        applier: Arc<dyn EntryApplier>,
    ) -> Result<Self, OrderError> {
        config.validate()?;
        let executor = ValidationExecutor::new(&config.total_order)?;
        info!(
            lock_striping = config.locking.use_lock_striping,
            owner_aware = config.locking.owner_aware,
            concurrency_level = config.locking.concurrency_level,
            pool_size = executor.pool_size(),
            "total order manager started"
        );
        Ok(Self {
            inner: Arc::new(ManagerInner {
                keys_locked: KeyOwnershipTable::new(),
                state_transfer_in_progress: Mutex::new(None),
                remote_txs: RemoteTxTable::new(),
                local_txs: Mutex::new(HashMap::new()),
                executor,
                lock_manager,
                applier,
                prepare_wait_timeout: config.total_order.prepare_wait_timeout,
            }),
        })
    }

    /// Creates a manager and the lock manager described by `config`.
    pub fn from_config(
        config: &GridConfig,
        applier: Arc<dyn EntryApplier>,
    ) -> Result<Self, OrderError> {
        let lock_manager = Arc::new(LockManager::from_config(&config.locking));
        Self::new(config, lock_manager, applier)
    }

    pub(crate) fn lock_manager(&self) -> &Arc<LockManager> {
        &self.inner.lock_manager
    }

    pub(crate) fn applier(&self) -> &Arc<dyn EntryApplier> {
        &self.inner.applier
    }

    pub(crate) fn remote_txs(&self) -> &RemoteTxTable {
        &self.inner.remote_txs
    }

    /// Registers a transaction originated on this node.
    ///
    /// The receiver yields the outcome of the transaction's next validation,
    /// including one-phase and failed prepares whose state is gone by the
    /// time anyone could look it up. Registering the same id again replaces
    /// the previous registration, whose receiver then reports an error.
    pub fn add_local_transaction(&self, gtx: GlobalTxId) -> oneshot::Receiver<ValidationOutcome> {
        let (tx, rx) = oneshot::channel();
        if self.inner.local_txs.lock().insert(gtx, tx).is_some() {
            debug!(%gtx, "local transaction registered twice");
        }
        rx
    }

    /// Drops a local registration without delivering an outcome.
    pub fn remove_local_transaction(&self, gtx: GlobalTxId) -> bool {
        self.inner.local_txs.lock().remove(&gtx).is_some()
    }

    /// Number of local transactions still waiting for their outcome.
    pub fn local_transaction_count(&self) -> usize {
        self.inner.local_txs.lock().len()
    }

    /// Hands a finished validation's outcome to the local originator, if any.
    pub(crate) fn complete_local_transaction(&self, gtx: GlobalTxId, outcome: &ValidationOutcome) {
        let Some(tx) = self.inner.local_txs.lock().remove(&gtx) else {
            return;
        };
        if tx.send(outcome.clone()).is_err() {
            trace!(%gtx, "local originator no longer waiting");
        }
    }

    /// Claims `keys` for `state` and records what it must wait for.
    ///
    /// Fails with [`OrderError::StateInUse`] if the state's previous cycle has
    /// not been released yet; the table is left untouched in that case.
    pub fn ensure_order(
        &self,
        state: &Arc<TxValidationState>,
        keys: &[Key],
    ) -> Result<(), OrderError> {
        let barrier = self.inner.state_transfer_in_progress.lock();
        let own = state.begin_cycle()?;

        let mut seen = HashSet::with_capacity(keys.len());
        for key in keys {
            if !seen.insert(key) {
                continue;
            }
            let previous = self.inner.keys_locked.claim(key.clone(), own.clone());
            state.record_claim(key.clone(), previous.filter(|p| *p != own));
        }
        if let Some(barrier) = barrier.as_ref() {
            state.add_dependency(barrier.clone());
        }

        trace!(
            gtx = %state.gtx(),
            keys = seen.len(),
            wait_for = state.wait_for().len(),
            "transaction ordered"
        );
        Ok(())
    }

    /// Admits a delivered prepare and hands it to the validation pool.
    ///
    /// Waits for a previous attempt of the same transaction to release
    /// before ordering it again; if that attempt finished the transaction,
    /// a fresh state is used. Only [`PrepareCommand::TotalOrder`] is
    /// accepted; anything else fails with [`OrderError::NotTotalOrder`].
    #[instrument(skip(self, prepare), fields(gtx = %prepare.gtx()))]
    pub async fn deliver(
        &self,
        prepare: Arc<PrepareCommand>,
    ) -> Result<Arc<TxValidationState>, OrderError> {
        if !prepare.is_total_order() {
            warn!("rejecting prepare that was not totally ordered");
            return Err(OrderError::NotTotalOrder(prepare.gtx()));
        }
        let state = loop {
            let state = self.inner.remote_txs.get_or_create(prepare.gtx());
            state.await_reset().await;
            if self.inner.remote_txs.is_current(&state) {
                break state;
            }
            trace!("previous attempt finished the transaction, starting afresh");
        };
        state.set_prepare(prepare.clone());

        self.ensure_order(&state, &prepare.modified_keys())?;
        if prepare.has_unkeyed_writes() {
            debug!("prepare clears without a key list, ordered against the barrier only");
        }

        let task = ValidationTask::new(self.clone(), state.clone(), prepare);
        self.inner.executor.submit(Box::new(task));
        Ok(state)
    }

    /// Unblocks `state`'s latch and drops the claims it still owns.
    ///
    /// Safe to call more than once; only the first call has an effect.
    pub fn release(&self, state: &TxValidationState) {
        let Some((own, keys)) = state.begin_release() else {
            trace!(gtx = %state.gtx(), "already released");
            return;
        };

        let mut removed = 0;
        for key in &keys {
            if self.inner.keys_locked.release_if(key, &own) {
                removed += 1;
            }
        }
        state.finish_release();
        trace!(gtx = %state.gtx(), claimed = keys.len(), removed, "transaction released");

        self.inner.executor.check_for_ready_tasks();
    }

    /// Called by the state-transfer driver before it moves data.
    ///
    /// Returns the latches of every transaction still claiming a key; the
    /// driver waits for all of them. A rebalance also installs a barrier
    /// that every later admission waits on. If a barrier is already active
    /// nothing happens and the result is empty.
    #[instrument(skip(self))]
    pub fn notify_state_transfer_start(&self, epoch: u64, is_rebalance: bool) -> Vec<Latch> {
        let mut barrier = self.inner.state_transfer_in_progress.lock();
        if barrier.is_some() {
            debug!("state transfer barrier already active");
            return Vec::new();
        }

        let pending = self.inner.keys_locked.snapshot_latches();
        if is_rebalance {
            *barrier = Some(Latch::barrier(epoch));
        }
        info!(in_flight = pending.len(), "state transfer starting");
        pending
    }

    /// Lifts the state-transfer barrier, if any.
    #[instrument(skip(self))]
    pub fn notify_state_transfer_end(&self) {
        let barrier = self.inner.state_transfer_in_progress.lock().take();
        match barrier {
            Some(latch) => {
                latch.unblock();
                info!(origin = ?latch.origin(), "state transfer finished");
            }
            None => debug!("no state transfer barrier to lift"),
        }
        self.inner.executor.check_for_ready_tasks();
    }

    /// Whether a state-transfer barrier is installed.
    pub fn is_state_transfer_in_progress(&self) -> bool {
        self.inner.state_transfer_in_progress.lock().is_some()
    }

    /// True while any transaction still claims a key.
    pub fn has_in_flight_claims(&self) -> bool {
        !self.inner.keys_locked.is_empty()
    }

    /// Current claimant of `key`.
    pub fn claimant(&self, key: &Key) -> Option<Latch> {
        self.inner.keys_locked.claimant(key)
    }

    /// Number of keys currently claimed.
    pub fn claimed_key_count(&self) -> usize {
        self.inner.keys_locked.len()
    }

    /// Validation state of a transaction the manager knows about.
    pub fn transaction(&self, gtx: GlobalTxId) -> Option<Arc<TxValidationState>> {
        self.inner.remote_txs.get(gtx)
    }

    /// Number of transactions the manager is tracking.
    pub fn remote_transaction_count(&self) -> usize {
        self.inner.remote_txs.len()
    }

    /// Number of validations parked on dependencies.
    pub fn pending_validations(&self) -> usize {
        self.inner.executor.pending_count()
    }

    /// Records a commit (`commit == true`) or rollback decision and waits
    /// for the prepare to finish.
    ///
    /// Returns `false` when the prepare has not started yet; it will pick up
    /// the decision itself, so the caller has nothing to do. Also returns
    /// `false`, with a warning, if the prepare is still running after
    /// `timeout`.
    pub async fn wait_for_tx_prepared(
        &self,
        state: &TxValidationState,
        commit: bool,
        timeout: Duration,
    ) -> bool {
        let gtx = state.gtx();
        let (phase, prepared) = state.mark_completion(commit);
        match phase {
            PreparePhase::NotStarted => {
                trace!(%gtx, commit, "prepare not started, it will adapt");
                false
            }
            PreparePhase::Prepared => true,
            PreparePhase::Preparing => {
                if prepared.wait_timeout(timeout).await {
                    true
                } else {
                    warn!(%gtx, ?timeout, "timed out waiting for prepare to finish");
                    false
                }
            }
        }
    }

    /// Processes a commit. Returns the number of entries applied.
    #[instrument(skip(self), fields(gtx = %cmd.gtx))]
    pub async fn commit(&self, cmd: &CommitCommand) -> Result<usize, OrderError> {
        let gtx = cmd.gtx;
        match self.inner.remote_txs.finished(gtx) {
            Some(Ok(())) => {
                debug!("commit for a finished transaction");
                return Ok(0);
            }
            Some(Err(e)) => {
                debug!(error = %e, "commit for a transaction whose validation failed");
                return Err(e);
            }
            None => {}
        }

        let state = self.inner.remote_txs.get_or_create(gtx);
        if !self
            .wait_for_tx_prepared(&state, true, self.inner.prepare_wait_timeout)
            .await
        {
            return match state.prepare_phase() {
                PreparePhase::NotStarted => Ok(0),
                _ => Err(OrderError::Interrupted(gtx)),
            };
        }

        match state.outcome() {
            Some(ValidationOutcome::Prepared) => {
                let result = self.inner.applier.commit(gtx).await;
                self.finish_transaction(gtx, false);
                result.map_err(OrderError::from)
            }
            Some(ValidationOutcome::Committed { applied }) => {
                self.finish_transaction(gtx, true);
                Ok(applied)
            }
            Some(ValidationOutcome::Failed(e)) => {
                self.finish_transaction(gtx, true);
                Err(e)
            }
            None => Err(OrderError::MissingPrepare(gtx)),
        }
    }

    /// Processes a rollback.
    #[instrument(skip(self), fields(gtx = %cmd.gtx))]
    pub async fn rollback(&self, cmd: &RollbackCommand) -> Result<(), OrderError> {
        let gtx = cmd.gtx;
        if self.inner.remote_txs.is_completed(gtx) {
            debug!("rollback for a finished transaction");
            return Ok(());
        }

        let state = self.inner.remote_txs.get_or_create(gtx);
        if !self
            .wait_for_tx_prepared(&state, false, self.inner.prepare_wait_timeout)
            .await
        {
            return match state.prepare_phase() {
                PreparePhase::NotStarted => Ok(()),
                _ => Err(OrderError::Interrupted(gtx)),
            };
        }

        if state.outcome() == Some(ValidationOutcome::Prepared) {
            self.inner.applier.rollback(gtx).await;
        }
        self.finish_transaction(gtx, true);
        Ok(())
    }

    /// Forgets `gtx`, unlocks its keys and releases its ordering claims.
    ///
    /// Returns whether the transaction was known.
    pub fn finish_transaction(&self, gtx: GlobalTxId, ignore_missing: bool) -> bool {
        let Some(state) = self.inner.remote_txs.remove(gtx) else {
            if !ignore_missing {
                warn!(%gtx, "finishing unknown transaction");
            }
            return false;
        };

        if let Some(mut ctx) = state.take_lock_context() {
            self.inner.lock_manager.release_all(&mut ctx);
        }
        self.release(&state);
        trace!(%gtx, "transaction finished");
        true
    }

    /// Stops the validation pool and clears every table.
    ///
    /// Parked validations are dropped and release their claims. Latches of
    /// tracked transactions are unblocked so that nobody waits on them.
    pub fn stop(&self) {
        let discarded = self.inner.executor.shutdown();
        for state in self.inner.remote_txs.clear() {
            if let Some(mut ctx) = state.take_lock_context() {
                self.inner.lock_manager.release_all(&mut ctx);
            }
            self.release(&state);
        }
        self.inner.keys_locked.clear();
        self.inner.local_txs.lock().clear();
        if let Some(barrier) = self.inner.state_transfer_in_progress.lock().take() {
            barrier.unblock();
        }
        info!(discarded, "total order manager stopped");
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::txn::NodeId;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn arb_key_sets() -> impl Strategy<Value = Vec<Vec<u8>>> {
        prop::collection::vec(prop::collection::vec(0u8..8, 0..4), 1..12)
    }

    fn to_keys(ids: &[u8]) -> Vec<Key> {
        ids.iter().map(|i| Key::from(format!("k{i}"))).collect()
    }

    fn with_manager<F: FnOnce(&TotalOrderManager)>(f: F) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = rt.enter();
        let mgr =
            TotalOrderManager::from_config(&GridConfig::default(), Arc::new(MemoryStore::new()))
                .unwrap();
        f(&mgr);
    }

    proptest! {
        #[test]
        fn later_transaction_waits_on_last_claimant(sets in arb_key_sets()) {
            with_manager(|mgr| {
                let mut last: HashMap<Key, Latch> = HashMap::new();
                for (seq, ids) in sets.iter().enumerate() {
                    let state = TxValidationState::new(GlobalTxId::new(NodeId(1), seq as u64));
                    let keys = to_keys(ids);
                    mgr.ensure_order(&state, &keys).unwrap();

                    let expected: HashSet<Latch> =
                        keys.iter().filter_map(|k| last.get(k).cloned()).collect();
                    let actual: HashSet<Latch> = state.wait_for().into_iter().collect();
                    assert_eq!(actual, expected);

                    let own = state.own_latch().unwrap();
                    for key in keys {
                        last.insert(key, own.clone());
                    }
                }
            });
        }

        #[test]
        fn releases_never_leak_claims(
            sets in arb_key_sets(),
            order in prop::collection::vec(any::<prop::sample::Index>(), 12),
        ) {
            with_manager(|mgr| {
                let mut states: Vec<Arc<TxValidationState>> = sets
                    .iter()
                    .enumerate()
                    .map(|(seq, ids)| {
                        let state = TxValidationState::new(GlobalTxId::new(NodeId(1), seq as u64));
                        mgr.ensure_order(&state, &to_keys(ids)).unwrap();
                        state
                    })
                    .collect();

                for idx in &order {
                    if states.is_empty() {
                        break;
                    }
                    let state = states.swap_remove(idx.index(states.len()));
                    mgr.release(&state);
                    mgr.release(&state);

                    let live: HashSet<Latch> =
                        states.iter().filter_map(|s| s.own_latch()).collect();
                    for latch in mgr.notify_state_transfer_start(0, false) {
                        assert!(live.contains(&latch));
                    }
                }
                for state in states {
                    mgr.release(&state);
                }
                assert!(!mgr.has_in_flight_claims());
            });
        }
    }
}
