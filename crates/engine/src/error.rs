// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the engine runtime

use dzl_storage::StoreError;
use thiserror::Error;

/// Errors that can occur in the engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// A step exhausted its retries (or failed fatally). Propagates into
    /// the run executor, which compensates and fails the run.
    #[error("Step '{step}' failed: {message}")]
    StepFailed { step: String, message: String },
    /// The run was externally cancelled.
    #[error("process cancelled: {0}")]
    Cancelled(String),
    /// The run was asked to suspend (shutdown or explicit suspend).
    #[error("process suspended")]
    Suspended,
    #[error("unknown process: {0}")]
    UnknownProcess(String),
    #[error("run not found: {0}")]
    RunNotFound(String),
    #[error("migration not found: {0}")]
    MigrationNotFound(u64),
    #[error("invalid outcome '{outcome}' for task {task_id}")]
    InvalidOutcome { task_id: String, outcome: String },
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl EngineError {
    pub(crate) fn step_failed(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StepFailed {
            step: step.into(),
            message: message.into(),
        }
    }
}
