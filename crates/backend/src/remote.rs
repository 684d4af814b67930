// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote durable-workflow backend.
//!
//! Run persistence, timers, and signals live on the remote service; the
//! backend translates registered `ProcessSpec`s into the service's workflow
//! model and routes every start to a version-suffixed task queue with a
//! `dsl_version` searchable attribute. Task storage stays local, and
//! `complete_task` additionally signals the owning run so the waiting step
//! resumes immediately.

use crate::client::DurableClient;
use crate::{BackendError, ProcessBackend, RemoteConfig};
use async_trait::async_trait;
use chrono::Utc;
use dzl_core::{Bag, ProcessSpec, RunRecord, RunStatus, ScheduleSpec, TaskRecord, TaskStatus};
use dzl_storage::{ProcessStore, TaskFilter};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Backend that delegates run execution to a remote durable-workflow
/// service.
pub struct RemoteBackend {
    client: DurableClient,
    config: RemoteConfig,
    /// Local task storage (the remote service drives workflows, not tasks)
    tasks: Arc<ProcessStore>,
    registry: Mutex<HashMap<String, ProcessSpec>>,
}

impl RemoteBackend {
    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            client: DurableClient::new(config),
            config: config.clone(),
            tasks: Arc::new(ProcessStore::in_memory()),
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// The local task store, shared with the activity layer that creates
    /// task rows on the service's behalf.
    pub fn task_store(&self) -> &Arc<ProcessStore> {
        &self.tasks
    }

    /// Work queue for a run: the configured queue suffixed with the DSL
    /// version, so draining versions keep their own workers.
    fn queue_for(&self, dsl_version: &str) -> String {
        format!("{}-{}", self.config.task_queue, dsl_version)
    }

    fn parse_run(value: &Value) -> Result<RunRecord, BackendError> {
        serde_json::from_value(value.clone())
            .map_err(|e| BackendError::Protocol(format!("bad run record: {e}")))
    }

    fn parse_runs(response: &Value) -> Result<Vec<RunRecord>, BackendError> {
        response
            .get("runs")
            .and_then(Value::as_array)
            .map(|runs| runs.iter().map(Self::parse_run).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[async_trait]
impl ProcessBackend for RemoteBackend {
    async fn initialize(&self) -> Result<(), BackendError> {
        self.client.request("ping", json!({})).await?;
        tracing::info!(queue = %self.config.task_queue, "remote backend initialized");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), BackendError> {
        // Runs are durable on the service; nothing to suspend locally
        Ok(())
    }

    async fn register_process(&self, spec: ProcessSpec) -> Result<(), BackendError> {
        let payload = json!({
            "process_name": spec.name,
            "spec": serde_json::to_value(&spec)
                .map_err(|e| BackendError::Protocol(e.to_string()))?,
        });
        self.client.request("register_process", payload).await?;
        self.registry.lock().insert(spec.name.clone(), spec);
        Ok(())
    }

    async fn register_schedule(&self, spec: ScheduleSpec) -> Result<(), BackendError> {
        let payload = json!({
            "schedule_name": spec.name,
            "spec": serde_json::to_value(&spec)
                .map_err(|e| BackendError::Protocol(e.to_string()))?,
        });
        self.client.request("register_schedule", payload).await?;
        Ok(())
    }

    async fn start_process(
        &self,
        process_name: &str,
        inputs: Bag,
        idempotency_key: Option<String>,
        dsl_version: Option<String>,
    ) -> Result<String, BackendError> {
        let dsl_version = dsl_version.unwrap_or_else(|| "0.1".to_string());
        let payload = json!({
            "process_name": process_name,
            "inputs": Value::Object(inputs),
            "idempotency_key": idempotency_key,
            "dsl_version": dsl_version,
            "task_queue": self.queue_for(&dsl_version),
            "search_attributes": {"dsl_version": dsl_version},
        });
        let response = self.client.request("start_workflow", payload).await?;
        response
            .get("run_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BackendError::Protocol("start_workflow returned no run_id".to_string()))
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, BackendError> {
        let response = self
            .client
            .request("describe_run", json!({"run_id": run_id}))
            .await?;
        match response.get("run") {
            None | Some(Value::Null) => Ok(None),
            Some(run) => Ok(Some(Self::parse_run(run)?)),
        }
    }

    async fn list_runs(
        &self,
        process_name: Option<&str>,
        status: Option<RunStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RunRecord>, BackendError> {
        let response = self
            .client
            .request(
                "list_runs",
                json!({
                    "process_name": process_name,
                    "status": status,
                    "limit": limit,
                    "offset": offset,
                }),
            )
            .await?;
        Self::parse_runs(&response)
    }

    async fn cancel_process(&self, run_id: &str, reason: &str) -> Result<(), BackendError> {
        self.client
            .request("cancel_workflow", json!({"run_id": run_id, "reason": reason}))
            .await?;
        Ok(())
    }

    async fn suspend_process(&self, run_id: &str) -> Result<(), BackendError> {
        tracing::warn!(
            run_id,
            "suspend is not supported by the remote backend; send a pause signal instead",
        );
        Ok(())
    }

    async fn resume_process(&self, run_id: &str) -> Result<(), BackendError> {
        tracing::warn!(
            run_id,
            "resume is not supported by the remote backend; send a resume signal instead",
        );
        Ok(())
    }

    async fn signal_process(
        &self,
        run_id: &str,
        signal_name: &str,
        payload: Bag,
    ) -> Result<(), BackendError> {
        self.client
            .request(
                "signal_workflow",
                json!({
                    "run_id": run_id,
                    "signal_name": signal_name,
                    "payload": Value::Object(payload),
                }),
            )
            .await?;
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, BackendError> {
        Ok(self.tasks.get_task(task_id))
    }

    async fn list_tasks(
        &self,
        run_id: Option<&str>,
        assignee_id: Option<&str>,
        status: Option<TaskStatus>,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, BackendError> {
        Ok(self.tasks.list_tasks(&TaskFilter {
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
        let task = self
            .tasks
            .get_task(task_id)
            .ok_or_else(|| BackendError::Storage(dzl_storage::StoreError::TaskNotFound(task_id.to_string())))?;

        self.tasks.complete_task(
            task_id,
            outcome,
            outcome_data.clone(),
            completed_by,
            Utc::now(),
        )?;

        // Wake the waiting step immediately
        let mut payload = Bag::new();
        payload.insert("step_name".to_string(), Value::String(task.step_name));
        payload.insert("outcome".to_string(), Value::String(outcome.to_string()));
        payload.insert("outcome_data".to_string(), Value::Object(outcome_data));
        self.signal_process(&task.run_id, "task_completed", payload)
            .await?;
        Ok(())
    }

    async fn reassign_task(
        &self,
        task_id: &str,
        new_assignee_id: &str,
        reason: Option<&str>,
    ) -> Result<(), BackendError> {
        self.tasks
            .reassign_task(task_id, new_assignee_id, Utc::now())?;
        tracing::info!(
            task_id,
            assignee = new_assignee_id,
            reason = reason.unwrap_or(""),
            "task reassigned",
        );
        Ok(())
    }

    async fn list_runs_by_version(
        &self,
        dsl_version: &str,
        status: Option<RunStatus>,
        limit: usize,
    ) -> Result<Vec<RunRecord>, BackendError> {
        let response = self
            .client
            .request(
                "list_runs",
                json!({
                    "search_attributes": {"dsl_version": dsl_version},
                    "status": status,
                    "limit": limit,
                }),
            )
            .await?;
        Self::parse_runs(&response)
    }

    async fn count_active_runs_by_version(&self, dsl_version: &str) -> Result<u64, BackendError> {
        let response = self
            .client
            .request(
                "count_runs",
                json!({
                    "search_attributes": {"dsl_version": dsl_version},
                    "active_only": true,
                }),
            )
            .await?;
        Ok(response.get("count").and_then(Value::as_u64).unwrap_or(0))
    }
}

#[cfg(test)]
#[path = "remote_tests.rs"]
mod tests;
