// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Synchronization primitives used to express "X waits until Y finishes".

mod latch;

pub use latch::{Latch, LatchOrigin};
