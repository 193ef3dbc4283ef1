// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Per-transaction validation record.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::command::PrepareCommand;
use crate::lock::InvocationContext;
use crate::storage::Key;
use crate::sync::Latch;
use crate::txn::GlobalTxId;

use super::error::OrderError;

/// Where a state object is in its claim/release cycle.
///
/// `Idle → Claimed → Released → Idle`. A new ordering cycle may only start
/// from `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationPhase {
    Idle,
    Claimed,
    Released,
}

/// Progress of the prepare itself, as seen by a racing commit or rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreparePhase {
    NotStarted,
    Preparing,
    Prepared,
}

/// Second-phase decision recorded before or during the prepare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMark {
    Undecided,
    Commit,
    Rollback,
}

/// Result of one validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Locks held and writes staged; waiting for commit or rollback.
    Prepared,
    /// Applied as a one-phase commit.
    Committed { applied: usize },
    Failed(OrderError),
}

impl ValidationOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ValidationOutcome::Failed(_))
    }
}

struct StateInner {
    phase: ValidationPhase,
    own_latch: Option<Latch>,
    reset_gate: Latch,
    claimed_keys: Vec<Key>,
    wait_for: Vec<Latch>,
    prepare: Option<Arc<PrepareCommand>>,
    prepare_phase: PreparePhase,
    completion: CompletionMark,
    prepared_gate: Latch,
    outcome: Option<ValidationOutcome>,
    lock_ctx: Option<InvocationContext>,
}

/// Mutable record of one in-flight transaction.
///
/// Shared between the delivery thread (which orders it), the validation
/// task, and the commit/rollback path. Recycled when the same prepare is
/// retried, but only once the previous cycle has fully released.
pub struct TxValidationState {
    gtx: GlobalTxId,
    inner: Mutex<StateInner>,
}

impl TxValidationState {
    pub fn new(gtx: GlobalTxId) -> Arc<Self> {
        Arc::new(Self {
            gtx,
            inner: Mutex::new(StateInner {
                phase: ValidationPhase::Idle,
                own_latch: None,
                reset_gate: Latch::gate(true),
                claimed_keys: Vec::new(),
                wait_for: Vec::new(),
                prepare: None,
                prepare_phase: PreparePhase::NotStarted,
                completion: CompletionMark::Undecided,
                prepared_gate: Latch::gate(false),
                outcome: None,
                lock_ctx: None,
            }),
        })
    }

    #[inline]
    pub fn gtx(&self) -> GlobalTxId {
        self.gtx
    }

    pub fn phase(&self) -> ValidationPhase {
        self.inner.lock().phase
    }

    /// The latch other transactions wait on, once ordered.
    pub fn own_latch(&self) -> Option<Latch> {
        self.inner.lock().own_latch.clone()
    }

    pub fn claimed_keys(&self) -> Vec<Key> {
        self.inner.lock().claimed_keys.clone()
    }

    /// Latches that must unblock before validation may run.
    pub fn wait_for(&self) -> Vec<Latch> {
        self.inner.lock().wait_for.clone()
    }

    /// True when no recorded dependency is still blocked.
    pub fn dependencies_cleared(&self) -> bool {
        self.inner.lock().wait_for.iter().all(|l| !l.is_blocked())
    }

    /// Waits until the previous cycle, if any, has released its claims.
    pub async fn await_reset(&self) {
        let gate = self.inner.lock().reset_gate.clone();
        gate.wait().await;
    }

    pub fn prepare(&self) -> Option<Arc<PrepareCommand>> {
        self.inner.lock().prepare.clone()
    }

    pub fn prepare_phase(&self) -> PreparePhase {
        self.inner.lock().prepare_phase
    }

    pub fn completion(&self) -> CompletionMark {
        self.inner.lock().completion
    }

    pub fn outcome(&self) -> Option<ValidationOutcome> {
        self.inner.lock().outcome.clone()
    }

    /// Waits for the current prepare to finish and returns its outcome.
    pub async fn wait_prepared(&self) -> ValidationOutcome {
        loop {
            let gate = {
                let inner = self.inner.lock();
                if let Some(outcome) = &inner.outcome {
                    return outcome.clone();
                }
                inner.prepared_gate.clone()
            };
            gate.wait().await;
        }
    }

    /// Starts a new ordering cycle and publishes a fresh own latch.
    pub(crate) fn begin_cycle(&self) -> Result<Latch, OrderError> {
        let mut inner = self.inner.lock();
        if inner.phase != ValidationPhase::Idle {
            return Err(OrderError::StateInUse(self.gtx));
        }

        let latch = Latch::new(self.gtx);
        inner.phase = ValidationPhase::Claimed;
        inner.own_latch = Some(latch.clone());
        inner.reset_gate = Latch::gate(false);
        inner.claimed_keys.clear();
        inner.wait_for.clear();
        inner.prepare_phase = PreparePhase::NotStarted;
        if !inner.prepared_gate.is_blocked() {
            inner.prepared_gate = Latch::gate(false);
        }
        inner.outcome = None;
        Ok(latch)
    }

    pub(crate) fn record_claim(&self, key: Key, previous: Option<Latch>) {
        let mut inner = self.inner.lock();
        inner.claimed_keys.push(key);
        if let Some(previous) = previous {
            if !inner.wait_for.contains(&previous) {
                inner.wait_for.push(previous);
            }
        }
    }

    pub(crate) fn add_dependency(&self, latch: Latch) {
        let mut inner = self.inner.lock();
        if !inner.wait_for.contains(&latch) {
            inner.wait_for.push(latch);
        }
    }

    pub(crate) fn depends_on_itself(&self) -> bool {
        let inner = self.inner.lock();
        inner
            .own_latch
            .as_ref()
            .is_some_and(|own| inner.wait_for.contains(own))
    }

    /// Unblocks the own latch and hands back the claims to remove.
    ///
    /// Returns `None` if this cycle was already released (or never ordered).
    pub(crate) fn begin_release(&self) -> Option<(Latch, Vec<Key>)> {
        let mut inner = self.inner.lock();
        let latch = inner.own_latch.clone()?;
        if !latch.unblock() {
            return None;
        }
        inner.phase = ValidationPhase::Released;
        Some((latch, std::mem::take(&mut inner.claimed_keys)))
    }

    /// Completes the release and lets the state be ordered again.
    pub(crate) fn finish_release(&self) {
        let mut inner = self.inner.lock();
        inner.phase = ValidationPhase::Idle;
        inner.wait_for.clear();
        inner.reset_gate.unblock();
    }

    pub(crate) fn set_prepare(&self, prepare: Arc<PrepareCommand>) {
        self.inner.lock().prepare = Some(prepare);
    }

    /// Records a commit or rollback decision.
    ///
    /// Returns the prepare phase at that instant plus the gate that opens
    /// when the prepare finishes.
    pub(crate) fn mark_completion(&self, commit: bool) -> (PreparePhase, Latch) {
        let mut inner = self.inner.lock();
        inner.completion = if commit {
            CompletionMark::Commit
        } else {
            CompletionMark::Rollback
        };
        (inner.prepare_phase, inner.prepared_gate.clone())
    }

    /// Marks the prepare as running and returns any decision already made.
    pub(crate) fn mark_preparing(&self) -> CompletionMark {
        let mut inner = self.inner.lock();
        inner.prepare_phase = PreparePhase::Preparing;
        inner.completion
    }

    pub(crate) fn mark_prepared(&self, outcome: ValidationOutcome) {
        let mut inner = self.inner.lock();
        inner.prepare_phase = PreparePhase::Prepared;
        inner.outcome = Some(outcome);
        inner.prepared_gate.unblock();
    }

    pub(crate) fn store_lock_context(&self, ctx: InvocationContext) {
        self.inner.lock().lock_ctx = Some(ctx);
    }

    pub(crate) fn take_lock_context(&self) -> Option<InvocationContext> {
        self.inner.lock().lock_ctx.take()
    }
}

impl fmt::Debug for TxValidationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("TxValidationState")
            .field("gtx", &self.gtx)
            .field("phase", &inner.phase)
            .field("claimed_keys", &inner.claimed_keys)
            .field("wait_for", &inner.wait_for.len())
            .field("prepare_phase", &inner.prepare_phase)
            .field("completion", &inner.completion)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::NodeId;

    fn state(seq: u64) -> Arc<TxValidationState> {
        TxValidationState::new(GlobalTxId::new(NodeId(1), seq))
    }

    #[test]
    fn test_cycle_transitions() {
        let s = state(1);
        assert_eq!(s.phase(), ValidationPhase::Idle);

        let latch = s.begin_cycle().unwrap();
        assert_eq!(s.phase(), ValidationPhase::Claimed);
        assert_eq!(s.own_latch(), Some(latch.clone()));
        assert!(matches!(s.begin_cycle(), Err(OrderError::StateInUse(_))));

        s.record_claim(Key::from("k"), None);
        let (released, keys) = s.begin_release().unwrap();
        assert_eq!(released, latch);
        assert_eq!(keys, vec![Key::from("k")]);
        assert_eq!(s.phase(), ValidationPhase::Released);
        assert!(matches!(s.begin_cycle(), Err(OrderError::StateInUse(_))));

        s.finish_release();
        assert_eq!(s.phase(), ValidationPhase::Idle);
        let next = s.begin_cycle().unwrap();
        assert_ne!(next, latch);
    }

    #[test]
    fn test_second_release_is_noop() {
        let s = state(1);
        s.begin_cycle().unwrap();
        assert!(s.begin_release().is_some());
        assert!(s.begin_release().is_none());
    }

    #[test]
    fn test_release_before_order_is_noop() {
        assert!(state(1).begin_release().is_none());
    }

    #[test]
    fn test_dependencies_deduplicated() {
        let s = state(2);
        s.begin_cycle().unwrap();
        let other = Latch::new(GlobalTxId::new(NodeId(1), 1));
        s.record_claim(Key::from("a"), Some(other.clone()));
        s.record_claim(Key::from("b"), Some(other.clone()));
        s.add_dependency(other.clone());

        assert_eq!(s.wait_for(), vec![other.clone()]);
        assert!(!s.dependencies_cleared());
        other.unblock();
        assert!(s.dependencies_cleared());
    }

    #[test]
    fn test_self_dependency_detected() {
        let s = state(1);
        let own = s.begin_cycle().unwrap();
        assert!(!s.depends_on_itself());
        s.add_dependency(own);
        assert!(s.depends_on_itself());
    }

    #[tokio::test]
    async fn test_await_reset_blocks_until_release() {
        let s = state(1);
        s.await_reset().await;

        s.begin_cycle().unwrap();
        let waiter = {
            let s = s.clone();
            tokio::spawn(async move { s.await_reset().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        s.begin_release().unwrap();
        s.finish_release();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_completion_marks_and_prepared_outcome() {
        let s = state(1);
        let (phase, gate) = s.mark_completion(true);
        assert_eq!(phase, PreparePhase::NotStarted);
        assert!(gate.is_blocked());

        s.begin_cycle().unwrap();
        assert_eq!(s.mark_preparing(), CompletionMark::Commit);
        s.mark_prepared(ValidationOutcome::Committed { applied: 1 });

        assert!(!gate.is_blocked());
        assert_eq!(
            s.wait_prepared().await,
            ValidationOutcome::Committed { applied: 1 }
        );
    }
}
