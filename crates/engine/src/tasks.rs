// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Human-task APIs exposed to callers.

use crate::{Engine, EngineError};
use dzl_core::{Bag, Clock, IdGen, TaskRecord};
use dzl_storage::TaskFilter;

impl<C: Clock, G: IdGen> Engine<C, G> {
    /// Get a human task by ID.
    pub fn get_task(&self, task_id: &str) -> Option<TaskRecord> {
        self.store.get_task(task_id)
    }

    /// List human tasks with optional filters.
    pub fn list_tasks(&self, filter: &TaskFilter) -> Vec<TaskRecord> {
        self.store.list_tasks(filter)
    }

    /// Complete a human task with the selected outcome.
    ///
    /// When the owning step's declared outcomes are known, the outcome must
    /// be one of them.
    pub fn complete_task(
        &self,
        task_id: &str,
        outcome: &str,
        outcome_data: Bag,
        completed_by: Option<&str>,
    ) -> Result<(), EngineError> {
        let task = self
            .store
            .get_task(task_id)
            .ok_or_else(|| EngineError::Storage(dzl_storage::StoreError::TaskNotFound(task_id.to_string())))?;

        if let Some(declared) = self.declared_outcomes(&task) {
            if !declared.is_empty() && !declared.iter().any(|name| name == outcome) {
                return Err(EngineError::InvalidOutcome {
                    task_id: task_id.to_string(),
                    outcome: outcome.to_string(),
                });
            }
        }

        self.store.complete_task(
            task_id,
            outcome,
            outcome_data,
            completed_by,
            self.clock.now_utc(),
        )?;
        tracing::info!(task_id, outcome, "task completed");
        Ok(())
    }

    /// Reassign a human task to another assignee.
    pub fn reassign_task(
        &self,
        task_id: &str,
        new_assignee_id: &str,
        reason: Option<&str>,
    ) -> Result<(), EngineError> {
        self.store
            .reassign_task(task_id, new_assignee_id, self.clock.now_utc())?;
        tracing::info!(
            task_id,
            assignee = new_assignee_id,
            reason = reason.unwrap_or(""),
            "task reassigned",
        );
        Ok(())
    }

    /// The outcomes declared by the step that created a task, when the
    /// owning process spec is registered.
    fn declared_outcomes(&self, task: &TaskRecord) -> Option<Vec<String>> {
        let run = self.store.get_run(&task.run_id)?;
        let spec = self.process_spec(&run.process_name)?;
        let step = spec.get_step(&task.step_name)?;
        let human_task = step.human_task.as_ref()?;
        Some(human_task.outcomes.iter().map(|o| o.name.clone()).collect())
    }
}
