// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The validation task run on the worker pool for each delivered prepare.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use crate::command::PrepareCommand;
use crate::lock::{Flag, InvocationContext};

use super::error::OrderError;
use super::executor::BlockingTask;
use super::manager::TotalOrderManager;
use super::state::{CompletionMark, TxValidationState, ValidationOutcome};

/// Releases everything a validation holds if it never reaches its end.
///
/// Armed from construction. A task dropped by the pool on shutdown, or a
/// run future cancelled mid-wait, unwinds through here.
struct ReleaseGuard {
    manager: TotalOrderManager,
    state: Arc<TxValidationState>,
    ctx: Option<InvocationContext>,
    armed: bool,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let gtx = self.state.gtx();
        warn!(%gtx, "validation abandoned, releasing claims");
        if let Some(mut ctx) = self.ctx.take() {
            self.manager.lock_manager().release_all(&mut ctx);
        }
        let outcome = ValidationOutcome::Failed(OrderError::Interrupted(gtx));
        self.state.mark_prepared(outcome.clone());
        self.manager.remote_txs().remove_if(&self.state);
        self.manager.release(&self.state);
        self.manager.complete_local_transaction(gtx, &outcome);
    }
}

/// Waits for dependencies, locks the modified keys and prepares the writes.
pub(crate) struct ValidationTask {
    prepare: Arc<PrepareCommand>,
    guard: ReleaseGuard,
}

impl ValidationTask {
    pub(crate) fn new(
        manager: TotalOrderManager,
        state: Arc<TxValidationState>,
        prepare: Arc<PrepareCommand>,
    ) -> Self {
        let ctx = InvocationContext::new(state.gtx());
        Self {
            prepare,
            guard: ReleaseGuard {
                manager,
                state,
                ctx: Some(ctx),
                armed: true,
            },
        }
    }

    async fn validate(&mut self) -> Result<ValidationOutcome, OrderError> {
        let state = self.guard.state.clone();
        let gtx = state.gtx();

        if state.depends_on_itself() {
            return Err(OrderError::SelfDependency(gtx));
        }
        for latch in state.wait_for() {
            latch.wait().await;
        }

        match state.mark_preparing() {
            CompletionMark::Rollback => return Err(OrderError::MarkedForRollback(gtx)),
            CompletionMark::Commit => {
                if let Some(to) = self.prepare.as_total_order() {
                    debug!(%gtx, "commit arrived first, preparing as one-phase");
                    to.mark_skip_write_skew_check();
                    to.mark_as_one_phase_commit();
                }
            }
            CompletionMark::Undecided => {}
        }

        let lock_manager = self.guard.manager.lock_manager().clone();
        let applier = self.guard.manager.applier().clone();
        let ctx = self
            .guard
            .ctx
            .as_mut()
            .ok_or(OrderError::Interrupted(gtx))?;

        if self.prepare.skip_write_skew_check() {
            ctx.set_flag(Flag::SkipWriteSkewCheck);
        }
        lock_manager
            .acquire_all(&self.prepare.modified_keys(), ctx)
            .await?;

        let skip_check = ctx.has_flag(Flag::SkipWriteSkewCheck);
        if let Err(e) = applier
            .prepare(gtx, self.prepare.modifications(), skip_check)
            .await
        {
            applier.rollback(gtx).await;
            return Err(e.into());
        }

        if self.prepare.is_one_phase_commit() {
            match applier.commit(gtx).await {
                Ok(applied) => Ok(ValidationOutcome::Committed { applied }),
                Err(e) => {
                    applier.rollback(gtx).await;
                    Err(e.into())
                }
            }
        } else {
            Ok(ValidationOutcome::Prepared)
        }
    }

    /// Publishes the outcome. One-phase and failed prepares are finished
    /// here; a two-phase prepare keeps its locks for the commit or rollback.
    fn finalize(mut self, outcome: ValidationOutcome) {
        let guard = &mut self.guard;
        guard.armed = false;
        let gtx = guard.state.gtx();
        let ctx = guard.ctx.take();

        if outcome == ValidationOutcome::Prepared {
            if let Some(ctx) = ctx {
                guard.state.store_lock_context(ctx);
            }
            guard.state.mark_prepared(outcome.clone());
        } else {
            if let Some(mut ctx) = ctx {
                guard.manager.lock_manager().release_all(&mut ctx);
            }
            guard.state.mark_prepared(outcome.clone());
            guard.manager.remote_txs().remove_if(&guard.state);
            guard.manager.release(&guard.state);
        }
        guard.manager.complete_local_transaction(gtx, &outcome);
    }
}

#[async_trait]
impl BlockingTask for ValidationTask {
    fn is_ready(&self) -> bool {
        self.guard.state.dependencies_cleared()
    }

    async fn run(mut self: Box<Self>) {
        let gtx = self.guard.state.gtx();
        let started = Instant::now();

        let outcome = match self.validate().await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(%gtx, error = %e, retryable = e.is_retryable(), "validation failed");
                ValidationOutcome::Failed(e)
            }
        };
        trace!(%gtx, ?outcome, elapsed = ?started.elapsed(), "validation finished");
        (*self).finalize(outcome);
    }
}
