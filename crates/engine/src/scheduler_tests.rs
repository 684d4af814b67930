// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_helpers::fake_time_engine;
use chrono::TimeZone;
use dzl_core::{ProcessStepSpec, RunStatus, TaskRecord, TaskStatus};
use dzl_storage::RunFilter;
use std::time::Duration as StdDuration;

fn schedule(name: &str, cron: Option<&str>, interval_seconds: Option<f64>) -> ScheduleSpec {
    ScheduleSpec {
        name: name.to_string(),
        cron: cron.map(str::to_string),
        interval_seconds,
        overlap_policy: dzl_core::OverlapPolicy::Allow,
        steps: vec![ProcessStepSpec::service("work", "reporting")],
    }
}

async fn settle_runs(engine: &std::sync::Arc<crate::test_helpers::FakeTimeEngine>) {
    let deadline = tokio::time::Instant::now() + StdDuration::from_secs(5);
    loop {
        let unfinished = engine
            .list_runs(&RunFilter::default())
            .into_iter()
            .any(|r| !r.status.is_terminal());
        if !unfinished {
            return;
        }
        assert!(tokio::time::Instant::now() < deadline, "runs did not settle");
        tokio::time::sleep(StdDuration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn first_tick_fires_an_unstarted_schedule() {
    let (engine, _clock) = fake_time_engine();
    engine.register_schedule(schedule("nightly", None, Some(3600.0))).unwrap();

    engine.scheduler_tick().await;
    settle_runs(&engine).await;

    let runs = engine.list_runs(&RunFilter::default());
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].process_name, "nightly");
    assert_eq!(runs[0].status, RunStatus::Completed);

    let state = engine.store().schedule_state("nightly").unwrap();
    assert_eq!(state.run_count, 1);
    assert_eq!(state.last_run_id.as_deref(), Some(runs[0].run_id.as_str()));
    assert!(state.last_run_at.is_some());
}

#[tokio::test]
async fn interval_schedule_respects_the_gap() {
    let (engine, clock) = fake_time_engine();
    engine.register_schedule(schedule("hourly", None, Some(3600.0))).unwrap();

    engine.scheduler_tick().await;
    settle_runs(&engine).await;
    assert_eq!(engine.list_runs(&RunFilter::default()).len(), 1);

    // A tick shortly after must not fire again
    clock.advance(StdDuration::from_secs(60));
    engine.scheduler_tick().await;
    settle_runs(&engine).await;
    assert_eq!(engine.list_runs(&RunFilter::default()).len(), 1);

    // Once the interval has elapsed, the schedule fires again
    clock.advance(StdDuration::from_secs(3600));
    engine.scheduler_tick().await;
    settle_runs(&engine).await;
    assert_eq!(engine.list_runs(&RunFilter::default()).len(), 2);
    assert_eq!(engine.store().schedule_state("hourly").unwrap().run_count, 2);
}

#[tokio::test]
async fn cron_schedule_fires_once_per_matching_window() {
    let (engine, clock) = fake_time_engine();
    let start = chrono::Utc
        .with_ymd_and_hms(2025, 6, 2, 9, 0, 0)
        .single()
        .unwrap();
    clock.set_utc(start);

    engine.register_schedule(schedule("every_five", Some("*/5 * * * *"), None)).unwrap();

    // Seed last_run_at ten minutes before "now" so only the walk decides
    engine
        .store()
        .record_schedule_fire("every_five", "seed-run", start)
        .unwrap();
    clock.advance(StdDuration::from_secs(600));

    engine.scheduler_tick().await;
    settle_runs(&engine).await;
    let runs = engine.list_runs(&RunFilter::default());
    assert_eq!(runs.len(), 1, "one catch-up run for the window");
    assert_eq!(engine.store().schedule_state("every_five").unwrap().run_count, 2);

    // A second tick within the same minute window does not fire again
    engine.scheduler_tick().await;
    settle_runs(&engine).await;
    assert_eq!(engine.list_runs(&RunFilter::default()).len(), 1);
}

#[tokio::test]
async fn schedule_errors_are_recorded_and_do_not_stop_the_pass() {
    let (engine, _clock) = fake_time_engine();
    // Registered directly with no process behind it: start_process will fail
    engine
        .store()
        .register_schedule("broken", engine.clock().now_utc())
        .unwrap();
    engine
        .schedules
        .lock()
        .insert("broken".to_string(), std::sync::Arc::new(schedule("broken", None, Some(1.0))));
    engine.register_schedule(schedule("working", None, Some(3600.0))).unwrap();

    engine.scheduler_tick().await;
    settle_runs(&engine).await;

    let broken = engine.store().schedule_state("broken").unwrap();
    assert_eq!(broken.error_count, 1);
    assert!(broken.last_error.unwrap().contains("unknown process"));

    let working = engine.store().schedule_state("working").unwrap();
    assert_eq!(working.run_count, 1);
}

#[tokio::test]
async fn tick_escalates_overdue_tasks() {
    let (engine, clock) = fake_time_engine();
    let now = engine.clock().now_utc();
    engine
        .store()
        .insert_task(TaskRecord {
            task_id: "t-1".to_string(),
            run_id: "r-1".to_string(),
            step_name: "approve".to_string(),
            surface_name: "card".to_string(),
            entity_name: "expense".to_string(),
            entity_id: "e-1".to_string(),
            assignee_id: None,
            assignee_role: None,
            status: TaskStatus::Pending,
            outcome: None,
            outcome_data: None,
            due_at: now + chrono::Duration::seconds(30),
            escalated_at: None,
            completed_at: None,
            completed_by: None,
            created_at: now,
        })
        .unwrap();

    engine.scheduler_tick().await;
    assert_eq!(
        engine.store().get_task("t-1").unwrap().status,
        TaskStatus::Pending,
    );

    clock.advance(StdDuration::from_secs(60));
    engine.scheduler_tick().await;
    let task = engine.store().get_task("t-1").unwrap();
    assert_eq!(task.status, TaskStatus::Escalated);
    assert!(task.escalated_at.is_some());
}
