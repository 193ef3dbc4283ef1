// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Transaction identity shared by the lock layer and the ordering core.

mod transaction;

pub use transaction::{GlobalTxId, NodeId, TxIdGenerator};
