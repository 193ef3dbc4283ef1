// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Bounded, blocking-task-aware validation pool.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, trace};

use crate::config::{ConfigError, TotalOrderConfig};

/// A unit of work that may not be able to make progress yet.
///
/// `is_ready` must be cheap and must not block. A task that is not ready is
/// parked by the executor and re-checked when a scheduler hint arrives.
#[async_trait]
pub trait BlockingTask: Send + 'static {
    fn is_ready(&self) -> bool;

    async fn run(self: Box<Self>);
}

/// Runs [`BlockingTask`]s on the tokio runtime with at most `pool_size`
/// running at once.
///
/// Tasks whose dependencies have not cleared are queued instead of taking a
/// permit, so a long chain of conflicting transactions never starves the
/// pool. Parked tasks are only re-checked through
/// [`check_for_ready_tasks`](Self::check_for_ready_tasks).
pub struct ValidationExecutor {
    permits: Arc<Semaphore>,
    pending: Mutex<VecDeque<Box<dyn BlockingTask>>>,
    handle: Handle,
    pool_size: usize,
}

impl ValidationExecutor {
    /// Creates an executor bound to the current tokio runtime.
    pub fn new(config: &TotalOrderConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let handle = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;
        let pool_size = config.effective_pool_size();
        debug!(
            pool_size,
            multi_thread = config.multi_thread_validation,
            "validation executor started"
        );
        Ok(Self {
            permits: Arc::new(Semaphore::new(pool_size)),
            pending: Mutex::new(VecDeque::new()),
            handle,
            pool_size,
        })
    }

    /// Runs `task` now if it is ready, parks it otherwise.
    pub fn submit(&self, task: Box<dyn BlockingTask>) {
        {
            // Checked under the queue lock: a hint issued after the check
            // always sees the parked task.
            let mut pending = self.pending.lock();
            if !task.is_ready() {
                pending.push_back(task);
                trace!(parked = pending.len(), "task parked");
                return;
            }
        }
        self.dispatch(task);
    }

    /// Dispatches every parked task that has become ready.
    ///
    /// Returns how many were dispatched.
    pub fn check_for_ready_tasks(&self) -> usize {
        let ready: VecDeque<Box<dyn BlockingTask>> = {
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                return 0;
            }
            let (ready, blocked): (VecDeque<_>, VecDeque<_>) =
                pending.drain(..).partition(|t| t.is_ready());
            *pending = blocked;
            ready
        };

        let dispatched = ready.len();
        for task in ready {
            self.dispatch(task);
        }
        if dispatched > 0 {
            trace!(dispatched, "parked tasks became ready");
        }
        dispatched
    }

    fn dispatch(&self, task: Box<dyn BlockingTask>) {
        let permits = self.permits.clone();
        self.handle.spawn(async move {
            // A closed semaphore means shutdown; dropping the task runs its
            // cleanup.
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            task.run().await;
        });
    }

    /// Number of parked tasks.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Stops accepting work and drops every parked task.
    ///
    /// Tasks already waiting for a permit are dropped as they wake.
    /// Returns how many parked tasks were discarded.
    pub fn shutdown(&self) -> usize {
        self.permits.close();
        let parked = std::mem::take(&mut *self.pending.lock());
        let discarded = parked.len();
        drop(parked);
        discarded
    }
}
