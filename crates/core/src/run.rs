// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process run record and status state machine.

use crate::context::Bag;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a process run.
///
/// Terminal statuses (`completed`, `failed`, `cancelled`) are sticky: once a
/// run reaches one, its status never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created but not started
    Pending,
    /// Currently executing
    Running,
    /// Owning DSL version is draining; in-flight work continues
    Draining,
    /// Paused (e.g. during shutdown)
    Suspended,
    /// Blocked on a signal or human task
    Waiting,
    /// Successfully finished
    Completed,
    /// Failed with error
    Failed,
    /// Running compensation handlers
    Compensating,
    /// Externally cancelled
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// Active runs are the ones a version drain waits on.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RunStatus::Pending | RunStatus::Running | RunStatus::Waiting | RunStatus::Suspended
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Draining => "draining",
            RunStatus::Suspended => "suspended",
            RunStatus::Waiting => "waiting",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Compensating => "compensating",
            RunStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// A single execution instance of a process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub process_name: String,
    pub process_version: String,
    /// DSL generation this run is bound to (for migrations)
    pub dsl_version: String,
    pub status: RunStatus,
    pub current_step: Option<String>,
    pub inputs: Bag,
    /// Serialized execution context (accumulated step outputs + variables)
    pub context: Bag,
    pub outputs: Option<Bag>,
    pub error: Option<String>,
    /// Deduplication key; unique among runs when present
    pub idempotency_key: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    pub fn new(
        run_id: impl Into<String>,
        process_name: impl Into<String>,
        dsl_version: impl Into<String>,
        inputs: Bag,
        idempotency_key: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            process_name: process_name.into(),
            process_version: "v1".to_string(),
            dsl_version: dsl_version.into(),
            status: RunStatus::Pending,
            current_step: None,
            inputs,
            context: Bag::new(),
            outputs: None,
            error: None,
            idempotency_key,
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
