// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Human task record and status state machine.

use crate::context::Bag;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a human task.
///
/// Transitions are monotone towards the terminal set
/// {`completed`, `expired`, `cancelled`}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Awaiting assignment
    Pending,
    /// Assigned to a user
    Assigned,
    /// User working on it
    InProgress,
    /// Successfully completed
    Completed,
    /// Escalated past its deadline
    Escalated,
    /// Timed out
    Expired,
    /// Manually cancelled
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Expired | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Escalated => "escalated",
            TaskStatus::Expired => "expired",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// A pending human assignment produced by a `human_task` step.
///
/// Surface, entity, and assignee identifiers are opaque; they are carried
/// through for the UI collaborator and never interpreted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub run_id: String,
    pub step_name: String,
    pub surface_name: String,
    pub entity_name: String,
    pub entity_id: String,
    pub assignee_id: Option<String>,
    pub assignee_role: Option<String>,
    pub status: TaskStatus,
    /// Selected outcome (one of the step's declared outcomes)
    pub outcome: Option<String>,
    pub outcome_data: Option<Bag>,
    pub due_at: DateTime<Utc>,
    /// Set at most once
    pub escalated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
