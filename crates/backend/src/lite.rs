// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process backend: embedded store, scheduler as a background task.

use crate::{BackendError, LiteConfig, ProcessBackend};
use async_trait::async_trait;
use dzl_core::{Bag, ProcessSpec, RunRecord, RunStatus, ScheduleSpec, TaskRecord, TaskStatus};
use dzl_engine::{Engine, EngineConfig, StartOptions, SystemEngine};
use dzl_core::{SystemClock, UuidIdGen};
use dzl_storage::{ProcessStore, RunFilter, TaskFilter};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Single-process backend over the embedded store.
///
/// Runs execute as in-process tasks; `initialize` resumes anything left
/// suspended by the previous shutdown.
pub struct LiteBackend {
    engine: Arc<SystemEngine>,
}

impl LiteBackend {
    /// Build a backend from configuration. `db_path = ":memory:"` selects a
    /// volatile store.
    pub fn new(config: &LiteConfig) -> Result<Self, BackendError> {
        let store = if config.db_path == ":memory:" {
            ProcessStore::in_memory()
        } else {
            ProcessStore::open(Path::new(&config.db_path))?
        };
        Ok(Self::with_store(Arc::new(store), config))
    }

    /// Backend over an existing store (shared with e.g. a version manager).
    pub fn with_store(store: Arc<ProcessStore>, config: &LiteConfig) -> Self {
        let engine = Engine::new(
            store,
            SystemClock,
            UuidIdGen,
            EngineConfig {
                poll_interval: Duration::from_secs_f64(config.poll_interval_seconds),
                scheduler_interval: Duration::from_secs_f64(config.scheduler_interval_seconds),
                ..EngineConfig::default()
            },
        );
        Self { engine }
    }

    /// The underlying engine, for registries and the version manager.
    pub fn engine(&self) -> &Arc<SystemEngine> {
        &self.engine
    }
}

#[async_trait]
impl ProcessBackend for LiteBackend {
    async fn initialize(&self) -> Result<(), BackendError> {
        self.engine.initialize().await?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), BackendError> {
        self.engine.shutdown().await;
        Ok(())
    }

    async fn register_process(&self, spec: ProcessSpec) -> Result<(), BackendError> {
        self.engine.register_process(spec);
        Ok(())
    }

    async fn register_schedule(&self, spec: ScheduleSpec) -> Result<(), BackendError> {
        self.engine.register_schedule(spec)?;
        Ok(())
    }

    async fn start_process(
        &self,
        process_name: &str,
        inputs: Bag,
        idempotency_key: Option<String>,
        dsl_version: Option<String>,
    ) -> Result<String, BackendError> {
        let run_id = self
            .engine
            .start_process(
                process_name,
                inputs,
                StartOptions {
                    idempotency_key,
                    dsl_version,
                },
            )
            .await?;
        Ok(run_id)
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, BackendError> {
        Ok(self.engine.get_run(run_id))
    }

    async fn list_runs(
        &self,
        process_name: Option<&str>,
        status: Option<RunStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RunRecord>, BackendError> {
        Ok(self.engine.list_runs(&RunFilter {
            process_name: process_name.map(str::to_string),
            status,
            dsl_version: None,
            limit,
            offset,
        }))
    }

    async fn cancel_process(&self, run_id: &str, reason: &str) -> Result<(), BackendError> {
        self.engine.cancel_process(run_id, reason).await?;
        Ok(())
    }

    async fn suspend_process(&self, run_id: &str) -> Result<(), BackendError> {
        self.engine.suspend_process(run_id).await?;
        Ok(())
    }

    async fn resume_process(&self, run_id: &str) -> Result<(), BackendError> {
        self.engine.resume_process(run_id).await?;
        Ok(())
    }

    async fn signal_process(
        &self,
        run_id: &str,
        signal_name: &str,
        payload: Bag,
    ) -> Result<(), BackendError> {
        self.engine.signal_process(run_id, signal_name, payload)?;
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, BackendError> {
        Ok(self.engine.get_task(task_id))
    }

    async fn list_tasks(
        &self,
        run_id: Option<&str>,
        assignee_id: Option<&str>,
        status: Option<TaskStatus>,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, BackendError> {
        Ok(self.engine.list_tasks(&TaskFilter {
            run_id: run_id.map(str::to_string),
            assignee_id: assignee_id.map(str::to_string),
            status,
            limit,
        }))
    }

    async fn complete_task(
        &self,
        task_id: &str,
        outcome: &str,
        outcome_data: Bag,
        completed_by: Option<&str>,
    ) -> Result<(), BackendError> {
        self.engine
            .complete_task(task_id, outcome, outcome_data, completed_by)?;
        Ok(())
    }

    async fn reassign_task(
        &self,
        task_id: &str,
        new_assignee_id: &str,
        reason: Option<&str>,
    ) -> Result<(), BackendError> {
        self.engine.reassign_task(task_id, new_assignee_id, reason)?;
        Ok(())
    }

    async fn list_runs_by_version(
        &self,
        dsl_version: &str,
        status: Option<RunStatus>,
        limit: usize,
    ) -> Result<Vec<RunRecord>, BackendError> {
        Ok(self.engine.list_runs_by_version(dsl_version, status, limit))
    }

    async fn count_active_runs_by_version(&self, dsl_version: &str) -> Result<u64, BackendError> {
        Ok(self.engine.count_active_runs_by_version(dsl_version))
    }
}

#[cfg(test)]
#[path = "lite_tests.rs"]
mod tests;
