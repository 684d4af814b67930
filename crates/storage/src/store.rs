// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transactional store over the materialized tables.
//!
//! Every public mutation takes the store lock once, makes its decision
//! against the current tables, journals exactly one op, and applies it —
//! which is what makes each call a single transaction (the idempotency
//! check-and-insert, the signal-consumption flip, terminal-status
//! protection).

use crate::state::{ProcessState, StoreOp};
use crate::wal::{Wal, WalError};
use chrono::{DateTime, Utc};
use dzl_core::{
    Bag, DslVersion, EventRecord, MigrationRecord, MigrationStatus, RunRecord, RunStatus,
    ScheduleState, SignalRecord, StepExecutionRecord, TaskRecord, TaskStatus, VersionStatus,
};
use parking_lot::Mutex;
use std::path::Path;
use thiserror::Error;

/// Errors surfaced by store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("wal error: {0}")]
    Wal(#[from] WalError),
    #[error("run not found: {0}")]
    RunNotFound(String),
    #[error("task not found: {0}")]
    TaskNotFound(String),
    #[error("idempotency key {key} already bound to run {run_id}")]
    IdempotencyConflict { key: String, run_id: String },
    #[error("version {0} already exists")]
    DuplicateVersion(String),
}

/// Filters for run listings. Results are newest-first by `started_at`.
#[derive(Debug, Clone)]
pub struct RunFilter {
    pub process_name: Option<String>,
    pub status: Option<RunStatus>,
    pub dsl_version: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for RunFilter {
    fn default() -> Self {
        Self {
            process_name: None,
            status: None,
            dsl_version: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl RunFilter {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    fn matches(&self, run: &RunRecord) -> bool {
        self.process_name
            .as_deref()
            .is_none_or(|n| run.process_name == n)
            && self.status.is_none_or(|s| run.status == s)
            && self
                .dsl_version
                .as_deref()
                .is_none_or(|v| run.dsl_version == v)
    }
}

/// Filters for task listings. Results are newest-first by `created_at`.
#[derive(Debug, Clone)]
pub struct TaskFilter {
    pub run_id: Option<String>,
    pub assignee_id: Option<String>,
    pub status: Option<TaskStatus>,
    pub limit: usize,
}

impl Default for TaskFilter {
    fn default() -> Self {
        Self {
            run_id: None,
            assignee_id: None,
            status: None,
            limit: 100,
        }
    }
}

impl TaskFilter {
    fn matches(&self, task: &TaskRecord) -> bool {
        self.run_id.as_deref().is_none_or(|r| task.run_id == r)
            && self
                .assignee_id
                .as_deref()
                .is_none_or(|a| task.assignee_id.as_deref() == Some(a))
            && self.status.is_none_or(|s| task.status == s)
    }
}

struct StoreInner {
    state: ProcessState,
    wal: Option<Wal>,
}

impl StoreInner {
    fn commit(&mut self, op: StoreOp) -> Result<(), StoreError> {
        if let Some(wal) = self.wal.as_mut() {
            wal.append(&op)?;
        }
        self.state.apply(&op);
        Ok(())
    }
}

/// The process engine's shared persistence layer.
pub struct ProcessStore {
    inner: Mutex<StoreInner>,
}

impl ProcessStore {
    /// Volatile store for tests and throwaway runs.
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                state: ProcessState::default(),
                wal: None,
            }),
        }
    }

    /// Open a file-backed store, replaying any existing journal.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let (wal, ops) = Wal::open(path)?;
        let mut state = ProcessState::default();
        for op in &ops {
            state.apply(op);
        }
        tracing::debug!(path = %path.display(), replayed = ops.len(), "store opened");
        Ok(Self {
            inner: Mutex::new(StoreInner {
                state,
                wal: Some(wal),
            }),
        })
    }

    /// Compact the journal down to a single snapshot of the current tables.
    pub fn checkpoint(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let snapshot = StoreOp::Snapshot {
            state: Box::new(inner.state.clone()),
        };
        if let Some(wal) = inner.wal.as_mut() {
            wal.rewrite(&snapshot)?;
        }
        Ok(())
    }

    // === Runs ===

    /// Insert a new run.
    ///
    /// When the run carries an idempotency key that is already bound, the
    /// insert is rejected with the existing run's id — the caller returns
    /// that run instead of creating a duplicate.
    pub fn insert_run(&self, run: RunRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if let Some(key) = run.idempotency_key.as_deref() {
            if let Some(existing) = inner
                .state
                .runs
                .values()
                .find(|r| r.idempotency_key.as_deref() == Some(key))
            {
                return Err(StoreError::IdempotencyConflict {
                    key: key.to_string(),
                    run_id: existing.run_id.clone(),
                });
            }
        }
        inner.commit(StoreOp::RunInserted { run })
    }

    pub fn get_run(&self, run_id: &str) -> Option<RunRecord> {
        self.inner.lock().state.runs.get(run_id).cloned()
    }

    pub fn find_run_by_idempotency_key(&self, key: &str) -> Option<RunRecord> {
        self.inner
            .lock()
            .state
            .runs
            .values()
            .find(|r| r.idempotency_key.as_deref() == Some(key))
            .cloned()
    }

    pub fn list_runs(&self, filter: &RunFilter) -> Vec<RunRecord> {
        let inner = self.inner.lock();
        let mut runs: Vec<RunRecord> = inner
            .state
            .runs
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.into_iter().skip(filter.offset).take(filter.limit).collect()
    }

    /// Count non-terminal runs bound to a DSL version.
    pub fn count_active_runs_by_version(&self, dsl_version: &str) -> u64 {
        self.inner
            .lock()
            .state
            .runs
            .values()
            .filter(|r| r.dsl_version == dsl_version && r.status.is_active())
            .count() as u64
    }

    pub fn active_runs_by_version(&self, dsl_version: &str) -> Vec<RunRecord> {
        let mut runs: Vec<RunRecord> = self
            .inner
            .lock()
            .state
            .runs
            .values()
            .filter(|r| r.dsl_version == dsl_version && r.status.is_active())
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs
    }

    /// Update a run's status (and optionally its error).
    ///
    /// Terminal statuses are sticky; updating a terminal run is a no-op.
    pub fn set_run_status(
        &self,
        run_id: &str,
        status: RunStatus,
        error: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let Some(run) = inner.state.runs.get(run_id) else {
            return Err(StoreError::RunNotFound(run_id.to_string()));
        };
        if run.status.is_terminal() {
            return Ok(());
        }
        inner.commit(StoreOp::RunStatusChanged {
            run_id: run_id.to_string(),
            status,
            error,
            at,
        })
    }

    /// Persist the current step and serialized context of a run.
    pub fn set_run_step(
        &self,
        run_id: &str,
        current_step: Option<&str>,
        context: Bag,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.state.runs.contains_key(run_id) {
            return Err(StoreError::RunNotFound(run_id.to_string()));
        }
        inner.commit(StoreOp::RunStepChanged {
            run_id: run_id.to_string(),
            current_step: current_step.map(str::to_string),
            context,
            at,
        })
    }

    pub fn complete_run(
        &self,
        run_id: &str,
        outputs: Bag,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        match inner.state.runs.get(run_id) {
            None => return Err(StoreError::RunNotFound(run_id.to_string())),
            Some(run) if run.status.is_terminal() => return Ok(()),
            Some(_) => {}
        }
        inner.commit(StoreOp::RunCompleted {
            run_id: run_id.to_string(),
            outputs,
            at,
        })
    }

    pub fn fail_run(&self, run_id: &str, error: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        match inner.state.runs.get(run_id) {
            None => return Err(StoreError::RunNotFound(run_id.to_string())),
            Some(run) if run.status.is_terminal() => return Ok(()),
            Some(_) => {}
        }
        inner.commit(StoreOp::RunFailed {
            run_id: run_id.to_string(),
            error: error.to_string(),
            at,
        })
    }

    // === Tasks ===

    pub fn insert_task(&self, task: TaskRecord) -> Result<(), StoreError> {
        self.inner.lock().commit(StoreOp::TaskInserted { task })
    }

    pub fn get_task(&self, task_id: &str) -> Option<TaskRecord> {
        self.inner.lock().state.tasks.get(task_id).cloned()
    }

    pub fn list_tasks(&self, filter: &TaskFilter) -> Vec<TaskRecord> {
        let inner = self.inner.lock();
        let mut tasks: Vec<TaskRecord> = inner
            .state
            .tasks
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks.truncate(filter.limit);
        tasks
    }

    pub fn complete_task(
        &self,
        task_id: &str,
        outcome: &str,
        outcome_data: Bag,
        completed_by: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        match inner.state.tasks.get(task_id) {
            None => return Err(StoreError::TaskNotFound(task_id.to_string())),
            Some(task) if task.status.is_terminal() => return Ok(()),
            Some(_) => {}
        }
        inner.commit(StoreOp::TaskCompleted {
            task_id: task_id.to_string(),
            outcome: outcome.to_string(),
            outcome_data,
            completed_by: completed_by.map(str::to_string),
            at,
        })
    }

    pub fn reassign_task(
        &self,
        task_id: &str,
        assignee_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        match inner.state.tasks.get(task_id) {
            None => return Err(StoreError::TaskNotFound(task_id.to_string())),
            Some(task) if task.status.is_terminal() => return Ok(()),
            Some(_) => {}
        }
        inner.commit(StoreOp::TaskReassigned {
            task_id: task_id.to_string(),
            assignee_id: assignee_id.to_string(),
            at,
        })
    }

    /// Escalate a task. Stamps `escalated_at` at most once.
    pub fn escalate_task(&self, task_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        match inner.state.tasks.get(task_id) {
            None => return Err(StoreError::TaskNotFound(task_id.to_string())),
            Some(task) if task.status.is_terminal() || task.escalated_at.is_some() => {
                return Ok(())
            }
            Some(_) => {}
        }
        inner.commit(StoreOp::TaskEscalated {
            task_id: task_id.to_string(),
            at,
        })
    }

    /// Pending tasks past their deadline that were never escalated
    /// (the scheduler's escalation scan).
    pub fn overdue_tasks(&self, now: DateTime<Utc>) -> Vec<TaskRecord> {
        self.inner
            .lock()
            .state
            .tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Pending && t.due_at < now && t.escalated_at.is_none()
            })
            .cloned()
            .collect()
    }

    // === Signals ===

    pub fn insert_signal(&self, signal: SignalRecord) -> Result<(), StoreError> {
        self.inner.lock().commit(StoreOp::SignalInserted { signal })
    }

    /// Consume the oldest unprocessed signal for `(run_id, signal_name)`.
    ///
    /// The flip from unprocessed to processed happens under the store lock,
    /// so a signal is delivered to at most one waiting step.
    pub fn consume_signal(
        &self,
        run_id: &str,
        signal_name: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<SignalRecord>, StoreError> {
        let mut inner = self.inner.lock();
        let found = inner
            .state
            .signals
            .iter()
            .find(|s| s.run_id == run_id && s.signal_name == signal_name && !s.processed)
            .map(|s| s.signal_id.clone());

        let Some(signal_id) = found else {
            return Ok(None);
        };
        inner.commit(StoreOp::SignalConsumed {
            signal_id: signal_id.clone(),
            at,
        })?;
        Ok(inner
            .state
            .signals
            .iter()
            .find(|s| s.signal_id == signal_id)
            .cloned())
    }

    pub fn signals_for_run(&self, run_id: &str) -> Vec<SignalRecord> {
        self.inner
            .lock()
            .state
            .signals
            .iter()
            .filter(|s| s.run_id == run_id)
            .cloned()
            .collect()
    }

    // === Audit ===

    pub fn record_step_execution(&self, execution: StepExecutionRecord) -> Result<(), StoreError> {
        self.inner
            .lock()
            .commit(StoreOp::StepExecutionRecorded { execution })
    }

    /// Step executions for a run, in insertion order.
    pub fn step_executions(&self, run_id: &str) -> Vec<StepExecutionRecord> {
        self.inner
            .lock()
            .state
            .step_executions
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect()
    }

    // === Events ===

    pub fn record_event(&self, event: EventRecord) -> Result<(), StoreError> {
        self.inner.lock().commit(StoreOp::EventRecorded { event })
    }

    pub fn events_for_run(&self, run_id: &str) -> Vec<EventRecord> {
        self.inner
            .lock()
            .state
            .events
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect()
    }

    // === Schedules ===

    /// Seed a schedule row if one does not exist.
    pub fn register_schedule(&self, schedule_name: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.state.schedules.contains_key(schedule_name) {
            return Ok(());
        }
        inner.commit(StoreOp::ScheduleRegistered {
            schedule_name: schedule_name.to_string(),
            at: now,
        })
    }

    pub fn schedule_state(&self, schedule_name: &str) -> Option<ScheduleState> {
        self.inner.lock().state.schedules.get(schedule_name).cloned()
    }

    pub fn record_schedule_fire(
        &self,
        schedule_name: &str,
        run_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner.lock().commit(StoreOp::ScheduleFired {
            schedule_name: schedule_name.to_string(),
            run_id: run_id.to_string(),
            at,
        })
    }

    pub fn record_schedule_error(
        &self,
        schedule_name: &str,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner.lock().commit(StoreOp::ScheduleErrored {
            schedule_name: schedule_name.to_string(),
            error: error.to_string(),
            at,
        })
    }

    // === Versions ===

    /// Insert a deployed version. Rejects duplicate ids.
    pub fn insert_version(&self, version: DslVersion) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.state.versions.contains_key(&version.version_id) {
            return Err(StoreError::DuplicateVersion(version.version_id));
        }
        inner.commit(StoreOp::VersionDeployed { version })
    }

    pub fn get_version(&self, version_id: &str) -> Option<DslVersion> {
        self.inner.lock().state.versions.get(version_id).cloned()
    }

    pub fn list_versions(&self, status: Option<VersionStatus>, limit: usize) -> Vec<DslVersion> {
        let inner = self.inner.lock();
        let mut versions: Vec<DslVersion> = inner
            .state
            .versions
            .values()
            .filter(|v| status.is_none_or(|s| v.status == s))
            .cloned()
            .collect();
        versions.sort_by(|a, b| b.deployed_at.cmp(&a.deployed_at));
        versions.truncate(limit);
        versions
    }

    /// The currently active version id (newest deployment wins).
    pub fn current_version(&self) -> Option<String> {
        self.list_versions(Some(VersionStatus::Active), 1)
            .into_iter()
            .next()
            .map(|v| v.version_id)
    }

    pub fn set_version_status(
        &self,
        version_id: &str,
        status: VersionStatus,
    ) -> Result<(), StoreError> {
        self.inner.lock().commit(StoreOp::VersionStatusChanged {
            version_id: version_id.to_string(),
            status,
        })
    }

    // === Migrations ===

    /// Append a migration row; ids autoincrement from 1.
    pub fn insert_migration(
        &self,
        from_version: Option<&str>,
        to_version: &str,
        runs_remaining: u64,
        at: DateTime<Utc>,
    ) -> Result<MigrationRecord, StoreError> {
        let mut inner = self.inner.lock();
        let migration = MigrationRecord {
            id: inner.state.migrations.len() as u64 + 1,
            from_version: from_version.map(str::to_string),
            to_version: to_version.to_string(),
            started_at: at,
            completed_at: None,
            status: MigrationStatus::InProgress,
            runs_drained: 0,
            runs_remaining,
        };
        inner.commit(StoreOp::MigrationStarted {
            migration: migration.clone(),
        })?;
        Ok(migration)
    }

    pub fn get_migration(&self, id: u64) -> Option<MigrationRecord> {
        self.inner
            .lock()
            .state
            .migrations
            .iter()
            .find(|m| m.id == id)
            .cloned()
    }

    pub fn migrations_in_progress(&self) -> Vec<MigrationRecord> {
        self.inner
            .lock()
            .state
            .migrations
            .iter()
            .filter(|m| m.status == MigrationStatus::InProgress)
            .cloned()
            .collect()
    }

    pub fn finish_migration(
        &self,
        id: u64,
        status: MigrationStatus,
        runs_drained: u64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner.lock().commit(StoreOp::MigrationFinished {
            id,
            status,
            runs_drained,
            at,
        })
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
