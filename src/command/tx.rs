// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Prepare, commit and rollback commands.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::storage::{modified_keys, Key, Modification};
use crate::txn::GlobalTxId;

/// Prepare for the classic (not totally ordered) protocol. Immutable.
#[derive(Debug, Clone)]
pub struct StandardPrepare {
    gtx: GlobalTxId,
    modifications: Vec<Modification>,
    one_phase_commit: bool,
    skip_write_skew_check: bool,
}

/// Prepare delivered through total order.
///
/// A commit for the same transaction can be processed before this prepare is
/// delivered. The flags below let the validation pipeline fold the two into
/// one one-phase operation after construction.
#[derive(Debug)]
pub struct TotalOrderPrepare {
    gtx: GlobalTxId,
    modifications: Vec<Modification>,
    one_phase_commit: AtomicBool,
    skip_write_skew_check: AtomicBool,
}

impl TotalOrderPrepare {
    /// Turns this prepare into a one-phase commit.
    pub fn mark_as_one_phase_commit(&self) {
        self.one_phase_commit.store(true, Ordering::Release);
    }

    /// Skips the write-skew check; the transaction is already known to commit.
    pub fn mark_skip_write_skew_check(&self) {
        self.skip_write_skew_check.store(true, Ordering::Release);
    }
}

/// The prepare phase of a transaction.
#[derive(Debug)]
pub enum PrepareCommand {
    Standard(StandardPrepare),
    TotalOrder(TotalOrderPrepare),
}

impl PrepareCommand {
    pub fn standard(gtx: GlobalTxId, modifications: Vec<Modification>, one_phase_commit: bool) -> Self {
        PrepareCommand::Standard(StandardPrepare {
            gtx,
            modifications,
            one_phase_commit,
            skip_write_skew_check: false,
        })
    }

    pub fn total_order(
        gtx: GlobalTxId,
        modifications: Vec<Modification>,
        one_phase_commit: bool,
    ) -> Self {
        PrepareCommand::TotalOrder(TotalOrderPrepare {
            gtx,
            modifications,
            one_phase_commit: AtomicBool::new(one_phase_commit),
            skip_write_skew_check: AtomicBool::new(false),
        })
    }

    /// Sets the skip-write-skew flag at construction.
    pub fn with_skip_write_skew_check(self) -> Self {
        match self {
            PrepareCommand::Standard(p) => PrepareCommand::Standard(StandardPrepare {
                skip_write_skew_check: true,
                ..p
            }),
            PrepareCommand::TotalOrder(p) => {
                p.mark_skip_write_skew_check();
                PrepareCommand::TotalOrder(p)
            }
        }
    }

    pub fn gtx(&self) -> GlobalTxId {
        match self {
            PrepareCommand::Standard(p) => p.gtx,
            PrepareCommand::TotalOrder(p) => p.gtx,
        }
    }

    pub fn modifications(&self) -> &[Modification] {
        match self {
            PrepareCommand::Standard(p) => &p.modifications,
            PrepareCommand::TotalOrder(p) => &p.modifications,
        }
    }

    pub fn is_one_phase_commit(&self) -> bool {
        match self {
            PrepareCommand::Standard(p) => p.one_phase_commit,
            PrepareCommand::TotalOrder(p) => p.one_phase_commit.load(Ordering::Acquire),
        }
    }

    pub fn skip_write_skew_check(&self) -> bool {
        match self {
            PrepareCommand::Standard(p) => p.skip_write_skew_check,
            PrepareCommand::TotalOrder(p) => p.skip_write_skew_check.load(Ordering::Acquire),
        }
    }

    /// Distinct keys written, in first-seen order.
    pub fn modified_keys(&self) -> Vec<Key> {
        modified_keys(self.modifications())
    }

    /// True when some operation (a clear) writes without naming its keys.
    pub fn has_unkeyed_writes(&self) -> bool {
        self.modifications().iter().any(Modification::is_clear)
    }

    pub fn as_total_order(&self) -> Option<&TotalOrderPrepare> {
        match self {
            PrepareCommand::TotalOrder(p) => Some(p),
            PrepareCommand::Standard(_) => None,
        }
    }

    pub fn is_total_order(&self) -> bool {
        self.as_total_order().is_some()
    }
}

/// Second phase: make the prepared writes visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitCommand {
    pub gtx: GlobalTxId,
}

/// Second phase: discard the prepared writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollbackCommand {
    pub gtx: GlobalTxId,
}

/// Any two-phase-commit step.
#[derive(Debug, Clone)]
pub enum TxCommand {
    Prepare(Arc<PrepareCommand>),
    Commit(CommitCommand),
    Rollback(RollbackCommand),
}

impl TxCommand {
    pub fn gtx(&self) -> GlobalTxId {
        match self {
            TxCommand::Prepare(p) => p.gtx(),
            TxCommand::Commit(c) => c.gtx,
            TxCommand::Rollback(r) => r.gtx,
        }
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            TxCommand::Prepare(_) => "prepare",
            TxCommand::Commit(_) => "commit",
            TxCommand::Rollback(_) => "rollback",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Value;
    use crate::txn::NodeId;

    fn gtx() -> GlobalTxId {
        GlobalTxId::new(NodeId(1), 1)
    }

    fn put(key: &str) -> Modification {
        Modification::Put {
            key: Key::from(key),
            value: Value::from("v"),
        }
    }

    #[test]
    fn test_total_order_flags_flip() {
        let prepare = PrepareCommand::total_order(gtx(), vec![put("a")], false);
        assert!(!prepare.is_one_phase_commit());
        assert!(!prepare.skip_write_skew_check());

        let to = prepare.as_total_order().unwrap();
        to.mark_as_one_phase_commit();
        to.mark_skip_write_skew_check();

        assert!(prepare.is_one_phase_commit());
        assert!(prepare.skip_write_skew_check());
    }

    #[test]
    fn test_standard_has_no_mutators() {
        let prepare = PrepareCommand::standard(gtx(), vec![put("a")], true);
        assert!(prepare.as_total_order().is_none());
        assert!(prepare.is_one_phase_commit());

        let prepare = prepare.with_skip_write_skew_check();
        assert!(prepare.skip_write_skew_check());
    }

    #[test]
    fn test_modified_keys_and_clear() {
        let prepare = PrepareCommand::total_order(
            gtx(),
            vec![put("a"), put("b"), put("a"), Modification::Clear],
            false,
        );
        assert_eq!(prepare.modified_keys(), vec![Key::from("a"), Key::from("b")]);
        assert!(prepare.has_unkeyed_writes());
    }

    #[test]
    fn test_command_gtx() {
        let cmd = TxCommand::Commit(CommitCommand { gtx: gtx() });
        assert_eq!(cmd.gtx(), gtx());
        assert_eq!(cmd.name(), "commit");
    }
}
