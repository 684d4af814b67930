// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Human-task step: create, poll, escalate, apply outcome.

use crate::step::{sleep_cancellable, StepError};
use crate::{EffectContext, Engine};
use dzl_core::{
    Bag, Clock, Context, EffectAction, FieldAssignment, IdGen, LifecycleEvent, ProcessStepSpec,
    StepEffect, TaskRecord, TaskStatus,
};
use indexmap::IndexMap;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Stringified view of a resolved value for identifier fields.
fn resolve_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

impl<C: Clock, G: IdGen> Engine<C, G> {
    /// Execute a `human_task` step.
    ///
    /// Creates the task row, publishes `HumanTaskAssigned`, then polls until
    /// the task completes or `due_at` passes. Escalation fires at most once
    /// and does not end the wait.
    pub(crate) async fn human_task_step(
        &self,
        run_id: &str,
        step: &ProcessStepSpec,
        context: &Context,
        cancel: &CancellationToken,
    ) -> Result<Bag, StepError> {
        let Some(task_config) = step.human_task.as_ref() else {
            return Err(StepError::Fatal("No human_task configuration".to_string()));
        };

        // Resolve assignee
        let assignee_id = task_config
            .assignee_expression
            .as_deref()
            .and_then(|expr| resolve_to_string(context.resolve(expr)));

        // Derive the entity reference: the id lives at `<path>.id`, the
        // entity name is the last path segment
        let mut entity_id = String::new();
        let mut entity_name = String::new();
        if let Some(path) = task_config.entity_path.as_deref() {
            entity_id =
                resolve_to_string(context.resolve(&format!("{path}.id"))).unwrap_or_default();
            entity_name = path.rsplit('.').next().unwrap_or_default().to_string();
        }

        let task_id = self.id_gen.next();
        let now = self.clock.now_utc();
        let due_at = now + chrono::Duration::milliseconds((step.timeout_seconds * 1000.0) as i64);

        self.store
            .insert_task(TaskRecord {
                task_id: task_id.clone(),
                run_id: run_id.to_string(),
                step_name: step.name.clone(),
                surface_name: task_config.surface.clone(),
                entity_name,
                entity_id,
                assignee_id,
                assignee_role: task_config.assignee_role.clone(),
                status: TaskStatus::Pending,
                outcome: None,
                outcome_data: None,
                due_at,
                escalated_at: None,
                completed_at: None,
                completed_by: None,
                created_at: now,
            })
            .map_err(|e| StepError::Transient(e.to_string()))?;

        self.emit(LifecycleEvent::HumanTaskAssigned {
            run_id: run_id.to_string(),
            task_id: task_id.clone(),
            step_name: step.name.clone(),
            surface: task_config.surface.clone(),
        })
        .await;

        let escalation_seconds = task_config
            .escalation_timeout_seconds
            .unwrap_or(step.timeout_seconds);
        let escalation_time =
            now + chrono::Duration::milliseconds((escalation_seconds * 1000.0) as i64);

        // Poll for completion
        while self.clock.now_utc() < due_at {
            let Some(task) = self.store.get_task(&task_id) else {
                return Err(StepError::Fatal("Task not found".to_string()));
            };

            if task.status == TaskStatus::Completed {
                let outcome = task.outcome.unwrap_or_else(|| "completed".to_string());
                let outcome_data = task.outcome_data.unwrap_or_default();

                if let Some(outcome_config) = task_config
                    .outcomes
                    .iter()
                    .find(|o| o.name == outcome)
                {
                    if !outcome_config.sets.is_empty() {
                        self.apply_outcome_sets(&outcome_config.sets, context).await;
                    }
                }

                let mut outputs = Bag::new();
                outputs.insert("outcome".to_string(), Value::String(outcome));
                outputs.insert("task_id".to_string(), Value::String(task_id));
                for (key, value) in outcome_data {
                    outputs.insert(key, value);
                }
                return Ok(outputs);
            }

            if self.clock.now_utc() > escalation_time && task.escalated_at.is_none() {
                if let Err(e) = self.store.escalate_task(&task_id, self.clock.now_utc()) {
                    tracing::error!(task_id = %task_id, error = %e, "failed to escalate task");
                }
            }

            let remaining = (due_at - self.clock.now_utc())
                .to_std()
                .unwrap_or(Duration::ZERO);
            sleep_cancellable(self.config.poll_interval.min(remaining), cancel).await?;
        }

        Err(StepError::Fatal("Human task timed out".to_string()))
    }

    /// Apply an outcome's declared field assignments through the effect
    /// executor, grouped per entity. Skipped when no executor is registered.
    async fn apply_outcome_sets(&self, assignments: &[FieldAssignment], context: &Context) {
        let Some(executor) = self.registry.effect_executor() else {
            return;
        };

        let mut grouped: IndexMap<String, Vec<FieldAssignment>> = IndexMap::new();
        for assignment in assignments {
            if let Some((entity, _)) = assignment.field_path.split_once('.') {
                grouped
                    .entry(entity.to_string())
                    .or_default()
                    .push(assignment.clone());
            }
        }

        let effect_ctx = EffectContext {
            trigger_entity: context
                .get_variable("trigger_entity")
                .and_then(|v| v.as_object().cloned())
                .unwrap_or_default(),
            process_inputs: context.inputs.clone(),
            step_outputs: Bag::new(),
        };

        for (entity_name, assigns) in grouped {
            let entity_id = context.resolve(&format!("{entity_name}.id"));
            let Some(entity_id) = resolve_to_string(entity_id) else {
                continue;
            };
            let effect = StepEffect {
                action: EffectAction::Update,
                entity_name,
                where_clause: Some(format!("id = {entity_id}")),
                assignments: assigns,
            };
            executor(vec![effect], effect_ctx.clone()).await;
        }
    }
}

#[cfg(test)]
#[path = "human_tests.rs"]
mod tests;
