// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory tables materialized from WAL replay.

use chrono::{DateTime, Utc};
use dzl_core::{
    Bag, DslVersion, EventRecord, MigrationRecord, MigrationStatus, RunRecord, RunStatus,
    ScheduleState, SignalRecord, StepExecutionRecord, TaskRecord, TaskStatus, VersionStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single journaled mutation.
///
/// Every public store operation maps to exactly one op; replaying the ops in
/// order rebuilds the state. Application is idempotent where re-delivery is
/// possible (terminal statuses stick, escalation stamps once, signal
/// consumption flips once).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StoreOp {
    RunInserted {
        run: RunRecord,
    },
    RunStatusChanged {
        run_id: String,
        status: RunStatus,
        error: Option<String>,
        at: DateTime<Utc>,
    },
    RunStepChanged {
        run_id: String,
        current_step: Option<String>,
        context: Bag,
        at: DateTime<Utc>,
    },
    RunCompleted {
        run_id: String,
        outputs: Bag,
        at: DateTime<Utc>,
    },
    RunFailed {
        run_id: String,
        error: String,
        at: DateTime<Utc>,
    },
    TaskInserted {
        task: TaskRecord,
    },
    TaskCompleted {
        task_id: String,
        outcome: String,
        outcome_data: Bag,
        completed_by: Option<String>,
        at: DateTime<Utc>,
    },
    TaskReassigned {
        task_id: String,
        assignee_id: String,
        at: DateTime<Utc>,
    },
    TaskEscalated {
        task_id: String,
        at: DateTime<Utc>,
    },
    TaskStatusChanged {
        task_id: String,
        status: TaskStatus,
        at: DateTime<Utc>,
    },
    SignalInserted {
        signal: SignalRecord,
    },
    SignalConsumed {
        signal_id: String,
        at: DateTime<Utc>,
    },
    StepExecutionRecorded {
        execution: StepExecutionRecord,
    },
    EventRecorded {
        event: EventRecord,
    },
    ScheduleRegistered {
        schedule_name: String,
        at: DateTime<Utc>,
    },
    ScheduleFired {
        schedule_name: String,
        run_id: String,
        at: DateTime<Utc>,
    },
    ScheduleErrored {
        schedule_name: String,
        error: String,
        at: DateTime<Utc>,
    },
    VersionDeployed {
        version: DslVersion,
    },
    VersionStatusChanged {
        version_id: String,
        status: VersionStatus,
    },
    MigrationStarted {
        migration: MigrationRecord,
    },
    MigrationFinished {
        id: u64,
        status: MigrationStatus,
        runs_drained: u64,
        at: DateTime<Utc>,
    },
    /// Full-state snapshot written by `checkpoint`
    Snapshot {
        state: Box<ProcessState>,
    },
}

/// Materialized tables built from journaled ops.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ProcessState {
    pub runs: HashMap<String, RunRecord>,
    pub tasks: HashMap<String, TaskRecord>,
    /// Insertion order is the FIFO order for signal consumption
    pub signals: Vec<SignalRecord>,
    /// Insertion order is the audit order within a run
    pub step_executions: Vec<StepExecutionRecord>,
    pub events: Vec<EventRecord>,
    pub schedules: HashMap<String, ScheduleState>,
    pub versions: HashMap<String, DslVersion>,
    /// Linear history; `id` is 1-based position
    pub migrations: Vec<MigrationRecord>,
}

impl ProcessState {
    /// Apply one op to the tables.
    pub fn apply(&mut self, op: &StoreOp) {
        match op {
            StoreOp::RunInserted { run } => {
                self.runs.entry(run.run_id.clone()).or_insert_with(|| run.clone());
            }

            StoreOp::RunStatusChanged {
                run_id,
                status,
                error,
                at,
            } => {
                if let Some(run) = self.mutable_run(run_id) {
                    run.status = *status;
                    if error.is_some() {
                        run.error = error.clone();
                    }
                    run.updated_at = *at;
                    if status.is_terminal() && run.completed_at.is_none() {
                        run.completed_at = Some(*at);
                    }
                }
            }

            StoreOp::RunStepChanged {
                run_id,
                current_step,
                context,
                at,
            } => {
                if let Some(run) = self.mutable_run(run_id) {
                    run.current_step = current_step.clone();
                    run.context = context.clone();
                    run.updated_at = *at;
                }
            }

            StoreOp::RunCompleted { run_id, outputs, at } => {
                if let Some(run) = self.mutable_run(run_id) {
                    run.status = RunStatus::Completed;
                    run.outputs = Some(outputs.clone());
                    run.completed_at = Some(*at);
                    run.updated_at = *at;
                }
            }

            StoreOp::RunFailed { run_id, error, at } => {
                if let Some(run) = self.mutable_run(run_id) {
                    run.status = RunStatus::Failed;
                    run.error = Some(error.clone());
                    run.completed_at = Some(*at);
                    run.updated_at = *at;
                }
            }

            StoreOp::TaskInserted { task } => {
                self.tasks.entry(task.task_id.clone()).or_insert_with(|| task.clone());
            }

            StoreOp::TaskCompleted {
                task_id,
                outcome,
                outcome_data,
                completed_by,
                at,
            } => {
                if let Some(task) = self.mutable_task(task_id) {
                    task.status = TaskStatus::Completed;
                    task.outcome = Some(outcome.clone());
                    task.outcome_data = Some(outcome_data.clone());
                    task.completed_at = Some(*at);
                    task.completed_by = completed_by.clone();
                }
            }

            StoreOp::TaskReassigned {
                task_id,
                assignee_id,
                ..
            } => {
                if let Some(task) = self.mutable_task(task_id) {
                    task.assignee_id = Some(assignee_id.clone());
                    task.status = TaskStatus::Assigned;
                }
            }

            StoreOp::TaskEscalated { task_id, at } => {
                if let Some(task) = self.mutable_task(task_id) {
                    // escalated_at stamps at most once
                    if task.escalated_at.is_none() {
                        task.status = TaskStatus::Escalated;
                        task.escalated_at = Some(*at);
                    }
                }
            }

            StoreOp::TaskStatusChanged { task_id, status, .. } => {
                if let Some(task) = self.mutable_task(task_id) {
                    task.status = *status;
                }
            }

            StoreOp::SignalInserted { signal } => {
                if !self.signals.iter().any(|s| s.signal_id == signal.signal_id) {
                    self.signals.push(signal.clone());
                }
            }

            StoreOp::SignalConsumed { signal_id, at } => {
                if let Some(signal) = self
                    .signals
                    .iter_mut()
                    .find(|s| s.signal_id == *signal_id && !s.processed)
                {
                    signal.processed = true;
                    signal.processed_at = Some(*at);
                }
            }

            StoreOp::StepExecutionRecorded { execution } => {
                self.step_executions.push(execution.clone());
            }

            StoreOp::EventRecorded { event } => {
                self.events.push(event.clone());
            }

            StoreOp::ScheduleRegistered { schedule_name, at } => {
                self.schedules
                    .entry(schedule_name.clone())
                    .or_insert_with(|| ScheduleState::new(schedule_name.clone(), *at));
            }

            StoreOp::ScheduleFired {
                schedule_name,
                run_id,
                at,
            } => {
                let entry = self
                    .schedules
                    .entry(schedule_name.clone())
                    .or_insert_with(|| ScheduleState::new(schedule_name.clone(), *at));
                entry.last_run_at = Some(*at);
                entry.last_run_id = Some(run_id.clone());
                entry.run_count += 1;
                entry.updated_at = *at;
            }

            StoreOp::ScheduleErrored {
                schedule_name,
                error,
                at,
            } => {
                let entry = self
                    .schedules
                    .entry(schedule_name.clone())
                    .or_insert_with(|| ScheduleState::new(schedule_name.clone(), *at));
                entry.error_count += 1;
                entry.last_error = Some(error.clone());
                entry.updated_at = *at;
            }

            StoreOp::VersionDeployed { version } => {
                self.versions
                    .entry(version.version_id.clone())
                    .or_insert_with(|| version.clone());
            }

            StoreOp::VersionStatusChanged { version_id, status } => {
                if let Some(version) = self.versions.get_mut(version_id) {
                    version.status = *status;
                }
            }

            StoreOp::MigrationStarted { migration } => {
                if !self.migrations.iter().any(|m| m.id == migration.id) {
                    self.migrations.push(migration.clone());
                }
            }

            StoreOp::MigrationFinished {
                id,
                status,
                runs_drained,
                at,
            } => {
                if let Some(migration) = self
                    .migrations
                    .iter_mut()
                    .find(|m| m.id == *id && m.status == MigrationStatus::InProgress)
                {
                    migration.status = *status;
                    migration.runs_drained = *runs_drained;
                    migration.completed_at = Some(*at);
                }
            }

            StoreOp::Snapshot { state } => {
                *self = (**state).clone();
            }
        }
    }

    /// Run lookup that refuses to hand out terminal runs for mutation.
    fn mutable_run(&mut self, run_id: &str) -> Option<&mut RunRecord> {
        self.runs.get_mut(run_id).filter(|r| !r.status.is_terminal())
    }

    /// Task lookup that refuses to hand out terminal tasks for mutation.
    fn mutable_task(&mut self, task_id: &str) -> Option<&mut TaskRecord> {
        self.tasks.get_mut(task_id).filter(|t| !t.status.is_terminal())
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
