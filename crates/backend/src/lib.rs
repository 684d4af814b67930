// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dzl-backend: Pluggable execution backends for the DAZZLE process engine.
//!
//! Every backend satisfies the same [`ProcessBackend`] contract so callers
//! are indifferent to whether runs execute in-process (lite) or on a remote
//! durable-workflow service. The [`factory`] picks one from configuration.

#[cfg(feature = "remote")]
mod client;
mod config;
mod factory;
mod lite;
#[cfg(feature = "remote")]
mod remote;

#[cfg(feature = "remote")]
pub use client::DurableClient;
pub use config::{BackendKind, LiteConfig, ProcessConfig, RemoteConfig};
pub use factory::{backend_info, create_backend, remote_reachable};
pub use lite::LiteBackend;
#[cfg(feature = "remote")]
pub use remote::RemoteBackend;

use async_trait::async_trait;
use dzl_core::{Bag, ProcessSpec, RunRecord, RunStatus, ScheduleSpec, TaskRecord, TaskStatus};
use dzl_engine::EngineError;
use dzl_storage::StoreError;
use thiserror::Error;

/// Errors surfaced by backend operations
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("backend not available: {0}")]
    Unavailable(String),
    #[error("remote protocol error: {0}")]
    Protocol(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The contract every execution backend satisfies.
///
/// All operations are asynchronous; the lite and remote implementations are
/// interchangeable behind this trait.
#[async_trait]
pub trait ProcessBackend: Send + Sync {
    /// Initialize the backend (storage, connections, background tasks).
    async fn initialize(&self) -> Result<(), BackendError>;

    /// Graceful shutdown, suspending running processes where supported.
    async fn shutdown(&self) -> Result<(), BackendError>;

    /// Register a process definition.
    async fn register_process(&self, spec: ProcessSpec) -> Result<(), BackendError>;

    /// Register a scheduled job.
    async fn register_schedule(&self, spec: ScheduleSpec) -> Result<(), BackendError>;

    /// Start a process instance; returns the run id.
    async fn start_process(
        &self,
        process_name: &str,
        inputs: Bag,
        idempotency_key: Option<String>,
        dsl_version: Option<String>,
    ) -> Result<String, BackendError>;

    /// Get a process run by ID.
    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, BackendError>;

    /// List process runs with optional filters.
    async fn list_runs(
        &self,
        process_name: Option<&str>,
        status: Option<RunStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RunRecord>, BackendError>;

    /// Cancel a running process.
    async fn cancel_process(&self, run_id: &str, reason: &str) -> Result<(), BackendError>;

    /// Suspend a running process (for graceful shutdown).
    async fn suspend_process(&self, run_id: &str) -> Result<(), BackendError>;

    /// Resume a suspended process.
    async fn resume_process(&self, run_id: &str) -> Result<(), BackendError>;

    /// Send a signal to a running process.
    async fn signal_process(
        &self,
        run_id: &str,
        signal_name: &str,
        payload: Bag,
    ) -> Result<(), BackendError>;

    /// Get a human task by ID.
    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, BackendError>;

    /// List human tasks with optional filters.
    async fn list_tasks(
        &self,
        run_id: Option<&str>,
        assignee_id: Option<&str>,
        status: Option<TaskStatus>,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, BackendError>;

    /// Complete a human task with the selected outcome.
    async fn complete_task(
        &self,
        task_id: &str,
        outcome: &str,
        outcome_data: Bag,
        completed_by: Option<&str>,
    ) -> Result<(), BackendError>;

    /// Reassign a human task to another user.
    async fn reassign_task(
        &self,
        task_id: &str,
        new_assignee_id: &str,
        reason: Option<&str>,
    ) -> Result<(), BackendError>;

    /// List runs bound to a DSL version.
    async fn list_runs_by_version(
        &self,
        dsl_version: &str,
        status: Option<RunStatus>,
        limit: usize,
    ) -> Result<Vec<RunRecord>, BackendError>;

    /// Count active (non-terminal) runs for a DSL version.
    async fn count_active_runs_by_version(&self, dsl_version: &str) -> Result<u64, BackendError>;
}
