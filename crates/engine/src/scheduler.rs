// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background scheduler: cron/interval triggers and task escalation.

use crate::cron::cron_due;
use crate::{Engine, StartOptions};
use chrono::{DateTime, Utc};
use dzl_core::{Bag, Clock, IdGen, ScheduleSpec};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::task::JoinHandle;

impl<C: Clock, G: IdGen> Engine<C, G> {
    /// Spawn the scheduler loop: sleep an interval, then tick, until
    /// shutdown.
    pub(crate) fn spawn_scheduler(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(engine.config.scheduler_interval).await;
                if engine.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                engine.scheduler_tick().await;
            }
        })
    }

    /// One scheduler pass: fire due schedules, then escalate overdue tasks.
    ///
    /// Public so tests (and embedders with their own loops) can drive the
    /// scheduler deterministically. Errors are recorded per schedule and
    /// never abort the pass.
    pub async fn scheduler_tick(self: &Arc<Self>) {
        let now = self.clock.now_utc();

        let schedules: Vec<Arc<ScheduleSpec>> = self.schedules.lock().values().cloned().collect();
        for spec in schedules {
            if !self.schedule_due(&spec, now) {
                continue;
            }
            match self
                .start_process(&spec.name, Bag::new(), StartOptions::default())
                .await
            {
                Ok(run_id) => {
                    if let Err(e) = self.store.record_schedule_fire(&spec.name, &run_id, now) {
                        tracing::error!(schedule = %spec.name, error = %e, "failed to record schedule fire");
                    }
                }
                Err(e) => {
                    tracing::warn!(schedule = %spec.name, error = %e, "schedule start failed");
                    if let Err(e) = self
                        .store
                        .record_schedule_error(&spec.name, &e.to_string(), now)
                    {
                        tracing::error!(schedule = %spec.name, error = %e, "failed to record schedule error");
                    }
                }
            }
        }

        self.escalate_overdue_tasks(now);
    }

    /// Is a schedule due at `now`?
    fn schedule_due(&self, spec: &ScheduleSpec, now: DateTime<Utc>) -> bool {
        let Some(state) = self.store.schedule_state(&spec.name) else {
            return true;
        };
        let Some(last_run) = state.last_run_at else {
            return true;
        };

        if let Some(interval) = spec.interval_seconds {
            return (now - last_run).num_milliseconds() as f64 >= interval * 1000.0;
        }
        if let Some(cron) = spec.cron.as_deref() {
            return cron_due(cron, last_run, now);
        }
        true
    }

    /// Escalate every pending task past its deadline that was never
    /// escalated.
    fn escalate_overdue_tasks(&self, now: DateTime<Utc>) {
        for task in self.store.overdue_tasks(now) {
            match self.store.escalate_task(&task.task_id, now) {
                Ok(()) => tracing::info!(
                    task_id = %task.task_id,
                    run_id = %task.run_id,
                    step = %task.step_name,
                    "escalated overdue task",
                ),
                Err(e) => tracing::error!(
                    task_id = %task.task_id,
                    error = %e,
                    "failed to escalate task",
                ),
            }
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
