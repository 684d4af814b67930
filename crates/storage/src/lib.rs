// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dzl-storage: Durable store for the DAZZLE process engine.
//!
//! The store keeps every table in memory and journals each mutation to a
//! JSONL write-ahead log. Opening an existing log replays it to rebuild the
//! tables, which is what makes suspended runs survive restarts.

mod state;
mod store;
mod wal;

pub use state::{ProcessState, StoreOp};
pub use store::{ProcessStore, RunFilter, StoreError, TaskFilter};
pub use wal::{Wal, WalError};
