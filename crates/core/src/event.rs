// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle events emitted by the run executor.
//!
//! Every event is delivered to the pluggable event handler as a
//! `(schema_name, payload)` pair and persisted in the events table.

use crate::context::Bag;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A process lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    ProcessStarted {
        run_id: String,
        process_name: String,
    },
    ProcessStepCompleted {
        run_id: String,
        step_name: String,
        process_name: String,
    },
    ProcessCompleted {
        run_id: String,
        process_name: String,
        outputs: Bag,
    },
    ProcessFailed {
        run_id: String,
        process_name: String,
        error: String,
    },
    ProcessCancelled {
        run_id: String,
        reason: String,
    },
    HumanTaskAssigned {
        run_id: String,
        task_id: String,
        step_name: String,
        surface: String,
    },
}

impl LifecycleEvent {
    /// Event schema name, used as the handler dispatch key.
    pub fn schema_name(&self) -> &'static str {
        match self {
            LifecycleEvent::ProcessStarted { .. } => "ProcessStarted",
            LifecycleEvent::ProcessStepCompleted { .. } => "ProcessStepCompleted",
            LifecycleEvent::ProcessCompleted { .. } => "ProcessCompleted",
            LifecycleEvent::ProcessFailed { .. } => "ProcessFailed",
            LifecycleEvent::ProcessCancelled { .. } => "ProcessCancelled",
            LifecycleEvent::HumanTaskAssigned { .. } => "HumanTaskAssigned",
        }
    }

    pub fn run_id(&self) -> &str {
        match self {
            LifecycleEvent::ProcessStarted { run_id, .. }
            | LifecycleEvent::ProcessStepCompleted { run_id, .. }
            | LifecycleEvent::ProcessCompleted { run_id, .. }
            | LifecycleEvent::ProcessFailed { run_id, .. }
            | LifecycleEvent::ProcessCancelled { run_id, .. }
            | LifecycleEvent::HumanTaskAssigned { run_id, .. } => run_id,
        }
    }

    /// Process name when the schema carries one.
    pub fn process_name(&self) -> Option<&str> {
        match self {
            LifecycleEvent::ProcessStarted { process_name, .. }
            | LifecycleEvent::ProcessStepCompleted { process_name, .. }
            | LifecycleEvent::ProcessCompleted { process_name, .. }
            | LifecycleEvent::ProcessFailed { process_name, .. } => Some(process_name),
            LifecycleEvent::ProcessCancelled { .. } | LifecycleEvent::HumanTaskAssigned { .. } => {
                None
            }
        }
    }

    /// Build the event payload: `schema`, `run_id`, `t_event`, plus the
    /// schema-specific fields.
    pub fn payload(&self, t_event: DateTime<Utc>) -> Bag {
        let mut data = Bag::new();
        data.insert("schema".to_string(), Value::String(self.schema_name().to_string()));
        data.insert("run_id".to_string(), Value::String(self.run_id().to_string()));
        data.insert("t_event".to_string(), Value::String(t_event.to_rfc3339()));

        match self {
            LifecycleEvent::ProcessStarted { process_name, .. } => {
                data.insert("process_name".to_string(), Value::String(process_name.clone()));
            }
            LifecycleEvent::ProcessStepCompleted {
                step_name,
                process_name,
                ..
            } => {
                data.insert("step_name".to_string(), Value::String(step_name.clone()));
                data.insert("process_name".to_string(), Value::String(process_name.clone()));
            }
            LifecycleEvent::ProcessCompleted {
                process_name,
                outputs,
                ..
            } => {
                data.insert("process_name".to_string(), Value::String(process_name.clone()));
                data.insert("outputs".to_string(), Value::Object(outputs.clone()));
            }
            LifecycleEvent::ProcessFailed {
                process_name,
                error,
                ..
            } => {
                data.insert("process_name".to_string(), Value::String(process_name.clone()));
                data.insert("error".to_string(), Value::String(error.clone()));
            }
            LifecycleEvent::ProcessCancelled { reason, .. } => {
                data.insert("reason".to_string(), Value::String(reason.clone()));
            }
            LifecycleEvent::HumanTaskAssigned {
                task_id,
                step_name,
                surface,
                ..
            } => {
                data.insert("task_id".to_string(), Value::String(task_id.clone()));
                data.insert("step_name".to_string(), Value::String(step_name.clone()));
                data.insert("surface".to_string(), Value::String(surface.clone()));
            }
        }

        data
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
