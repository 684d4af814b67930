// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios driving the engine through the lite backend.

use dzl_backend::{LiteBackend, LiteConfig, ProcessBackend};
use dzl_core::{
    Bag, Clock, FakeClock, InputMapping, ProcessSpec, ProcessStepSpec, RetryBackoff, RetryConfig,
    RunStatus, ScheduleSpec, SequentialIdGen, StepKind, SystemClock,
};
use dzl_engine::{
    DrainWatcher, DrainWatcherConfig, Engine, EngineConfig, HandlerError, StartOptions,
    VersionManager,
};
use chrono::TimeZone;
use dzl_storage::{ProcessStore, RunFilter};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn bag(value: serde_json::Value) -> Bag {
    match value {
        serde_json::Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

fn memory_backend() -> LiteBackend {
    LiteBackend::new(&LiteConfig {
        db_path: ":memory:".to_string(),
        poll_interval_seconds: 0.01,
        scheduler_interval_seconds: 3600.0,
    })
    .expect("in-memory backend")
}

async fn wait_terminal(backend: &LiteBackend, run_id: &str) -> dzl_core::RunRecord {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(run) = backend.get_run(run_id).await.unwrap() {
            if run.status.is_terminal() {
                return run;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "run {run_id} did not terminate",
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn wait_step(name: &str, signal: &str, timeout_seconds: f64) -> ProcessStepSpec {
    let mut step = ProcessStepSpec::new(name, StepKind::Wait);
    step.wait_for_signal = Some(signal.to_string());
    step.timeout_seconds = timeout_seconds;
    step
}

/// Scenario 1: three sequential service steps with input mappings.
#[tokio::test]
async fn happy_path_three_step_sequential() {
    let backend = memory_backend();
    let registry = backend.engine().registry();
    registry.service_fn("a", |_| async { Ok(bag(json!({"x": 7}))) });
    registry.service_fn("b", |_| async { Ok(bag(json!({"z": 9}))) });
    registry.service_fn("c", |_| async { Ok(bag(json!({"ok": true}))) });

    backend
        .register_process(ProcessSpec::new(
            "P",
            vec![
                ProcessStepSpec::service("s1", "a"),
                ProcessStepSpec::service("s2", "b")
                    .with_inputs(vec![InputMapping::new("s1.x", "y")]),
                ProcessStepSpec::service("s3", "c")
                    .with_inputs(vec![InputMapping::new("inputs.id", "i")]),
            ],
        ))
        .await
        .unwrap();

    let run_id = backend
        .start_process("P", bag(json!({"id": "42"})), None, None)
        .await
        .unwrap();
    let run = wait_terminal(&backend, &run_id).await;

    assert_eq!(run.status, RunStatus::Completed);
    let outputs = run.outputs.unwrap();
    assert_eq!(outputs["s1.x"], json!(7));
    assert_eq!(outputs["s2.z"], json!(9));
    assert_eq!(outputs["s3.ok"], json!(true));

    let events: Vec<(String, Bag)> = backend
        .engine()
        .store()
        .events_for_run(&run_id)
        .into_iter()
        .map(|e| (e.schema_name, e.event_data))
        .collect();
    let schemas: Vec<&str> = events.iter().map(|(s, _)| s.as_str()).collect();
    assert_eq!(
        schemas,
        vec![
            "ProcessStarted",
            "ProcessStepCompleted",
            "ProcessStepCompleted",
            "ProcessStepCompleted",
            "ProcessCompleted",
        ],
    );
    assert_eq!(events[1].1["step_name"], json!("s1"));
    assert_eq!(events[2].1["step_name"], json!("s2"));
    assert_eq!(events[3].1["step_name"], json!("s3"));
}

/// Scenario 2: a step whose handler always fails exhausts its retries with
/// exponential backoff.
#[tokio::test]
async fn retry_exhaustion() {
    let backend = memory_backend();
    backend
        .engine()
        .registry()
        .service_fn("always_fails", |_| async {
            Err::<Bag, _>(HandlerError::new("database exploded"))
        });

    backend
        .register_process(ProcessSpec::new(
            "R",
            vec![ProcessStepSpec::service("s1", "always_fails").with_retry(RetryConfig {
                max_attempts: 3,
                initial_interval_seconds: 1.0,
                max_interval_seconds: 60.0,
                backoff_coefficient: 2.0,
                backoff: RetryBackoff::Exponential,
            })],
        ))
        .await
        .unwrap();

    let started = tokio::time::Instant::now();
    let run_id = backend
        .start_process("R", Bag::new(), None, None)
        .await
        .unwrap();
    let run = wait_terminal(&backend, &run_id).await;
    let elapsed = started.elapsed();

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.unwrap().contains("database exploded"));

    let rows = backend.engine().store().step_executions(&run_id);
    let failed: Vec<u32> = rows
        .iter()
        .filter(|r| r.status == dzl_core::ExecutionStatus::Failed)
        .map(|r| r.attempt)
        .collect();
    assert_eq!(failed, vec![1, 2, 3]);

    // Backoff slept ~1s then ~2s between the three attempts
    assert!(elapsed >= Duration::from_secs(3), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(8), "elapsed {elapsed:?}");
}

/// Scenario 3: compensations run in reverse completion order, and a failing
/// compensation does not stop the rest.
#[tokio::test]
async fn saga_compensation() {
    let backend = memory_backend();
    let calls: Arc<call_log::Calls> = Arc::new(call_log::Calls::default());
    let registry = backend.engine().registry();
    for (service, fail) in [
        ("svc1", false),
        ("svc2", false),
        ("svc3", true),
        ("comp1", false),
        ("comp2", true),
    ] {
        let calls = Arc::clone(&calls);
        let name = service.to_string();
        registry.service_fn(service, move |_| {
            let calls = Arc::clone(&calls);
            let name = name.clone();
            async move {
                calls.push(&name);
                if fail {
                    Err(HandlerError::new(format!("{name} failed")))
                } else {
                    Ok(Bag::new())
                }
            }
        });
    }

    let mut spec = ProcessSpec::new(
        "S",
        vec![
            ProcessStepSpec::service("s1", "svc1").with_compensation("c1"),
            ProcessStepSpec::service("s2", "svc2").with_compensation("c2"),
            ProcessStepSpec::service("s3", "svc3"),
        ],
    );
    spec.compensations = vec![
        dzl_core::CompensationSpec {
            name: "c1".to_string(),
            service: Some("comp1".to_string()),
            inputs: vec![],
            timeout_seconds: 5.0,
        },
        dzl_core::CompensationSpec {
            name: "c2".to_string(),
            service: Some("comp2".to_string()),
            inputs: vec![],
            timeout_seconds: 5.0,
        },
    ];
    backend.register_process(spec).await.unwrap();

    let run_id = backend
        .start_process("S", Bag::new(), None, None)
        .await
        .unwrap();
    let run = wait_terminal(&backend, &run_id).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(calls.snapshot(), vec!["svc1", "svc2", "svc3", "comp2", "comp1"]);
}

/// Scenario 4: a wait step consumes a signal and completes; without the
/// signal it fails with the specific timeout message.
#[tokio::test]
async fn signal_wait_and_timeout_variant() {
    let backend = memory_backend();
    backend
        .register_process(ProcessSpec::new(
            "W",
            vec![wait_step("gate", "approve", 60.0)],
        ))
        .await
        .unwrap();

    let run_id = backend
        .start_process("W", Bag::new(), None, None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    backend
        .signal_process(&run_id, "approve", bag(json!({"by": "u1"})))
        .await
        .unwrap();

    let run = wait_terminal(&backend, &run_id).await;
    assert_eq!(run.status, RunStatus::Completed);
    let outputs = run.outputs.unwrap();
    assert_eq!(outputs["gate.signal"], json!("approve"));
    assert_eq!(outputs["gate.payload"]["by"], json!("u1"));

    // Variant: no signal within the timeout
    backend
        .register_process(ProcessSpec::new(
            "W2",
            vec![wait_step("gate", "approve", 0.3)],
        ))
        .await
        .unwrap();
    let run_id = backend
        .start_process("W2", Bag::new(), None, None)
        .await
        .unwrap();
    let run = wait_terminal(&backend, &run_id).await;
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run
        .error
        .unwrap()
        .contains("Timeout waiting for signal: approve"));
}

/// Scenario 5: a cron schedule fires exactly once per matching window.
#[tokio::test]
async fn cron_firing() {
    let clock = FakeClock::new();
    // Align the fake clock to a round ten-minute boundary
    clock.set_utc(
        chrono::Utc
            .with_ymd_and_hms(2025, 6, 2, 9, 10, 0)
            .single()
            .unwrap(),
    );
    let engine = Engine::new(
        Arc::new(ProcessStore::in_memory()),
        clock.clone(),
        SequentialIdGen::new("run"),
        EngineConfig {
            poll_interval: Duration::from_millis(10),
            scheduler_interval: Duration::from_secs(3600),
            default_dsl_version: "0.1".to_string(),
        },
    );
    engine.registry().service_fn("tick", |_| async { Ok(Bag::new()) });
    engine
        .register_schedule(ScheduleSpec {
            name: "S".to_string(),
            cron: Some("*/5 * * * *".to_string()),
            interval_seconds: None,
            overlap_policy: dzl_core::OverlapPolicy::Allow,
            steps: vec![ProcessStepSpec::service("work", "tick")],
        })
        .unwrap();

    // last_run_at = T - 10m
    let t_minus_10 = engine.clock().now_utc();
    engine
        .store()
        .record_schedule_fire("S", "seed", t_minus_10)
        .unwrap();
    clock.advance(Duration::from_secs(600));
    let t_now = engine.clock().now_utc();

    engine.scheduler_tick().await;

    let runs = engine.list_runs(&RunFilter::default());
    assert_eq!(runs.len(), 1, "exactly one new run started");

    let state = engine.store().schedule_state("S").unwrap();
    assert_eq!(state.last_run_at, Some(t_now));
    assert_eq!(state.run_count, 2, "seed + the catch-up fire");
    assert_eq!(
        state.last_run_id.as_deref(),
        Some(runs[0].run_id.as_str()),
    );

    // A second tick within the same minute window fires nothing extra
    engine.scheduler_tick().await;
    assert_eq!(engine.list_runs(&RunFilter::default()).len(), 1);

    engine.shutdown().await;
}

/// Scenario 6: draining a version completes its migration once every bound
/// run finishes.
#[tokio::test]
async fn version_drain() {
    let engine = Engine::new(
        Arc::new(ProcessStore::in_memory()),
        SystemClock,
        SequentialIdGen::new("run"),
        EngineConfig {
            poll_interval: Duration::from_millis(10),
            scheduler_interval: Duration::from_secs(3600),
            default_dsl_version: "0.1".to_string(),
        },
    );
    engine.register_process(ProcessSpec::new(
        "F",
        vec![wait_step("gate", "finish", 30.0)],
    ));

    let manager = VersionManager::new(Arc::clone(&engine));
    manager.deploy_version("V1", "hash-1", Bag::new()).unwrap();
    manager.deploy_version("V2", "hash-2", Bag::new()).unwrap();

    let mut frozen = Vec::new();
    for _ in 0..2 {
        let run_id = engine
            .start_process(
                "F",
                Bag::new(),
                StartOptions {
                    idempotency_key: None,
                    dsl_version: Some("V1".to_string()),
                },
            )
            .await
            .unwrap();
        frozen.push(run_id);
    }
    // Let both runs reach their wait step
    for run_id in &frozen {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if engine.get_run(run_id).map(|r| r.status) == Some(RunStatus::Waiting) {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    let migration = manager.start_migration("V1", "V2").unwrap();
    assert_eq!(migration.runs_remaining, 2);
    assert_eq!(
        manager.get_version("V1").unwrap().status,
        dzl_core::VersionStatus::Draining,
    );

    let watcher = DrainWatcher::new(manager.clone(), DrainWatcherConfig::default());
    assert!(watcher.check_once().is_empty(), "both runs still in flight");

    for run_id in &frozen {
        engine.signal_process(run_id, "finish", Bag::new()).unwrap();
    }
    for run_id in &frozen {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if engine
                .get_run(run_id)
                .map(|r| r.status.is_terminal())
                .unwrap_or(false)
            {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    assert_eq!(watcher.check_once(), vec![migration.id]);
    assert_eq!(
        manager.get_version("V1").unwrap().status,
        dzl_core::VersionStatus::Archived,
    );
    assert_eq!(
        manager.get_version("V2").unwrap().status,
        dzl_core::VersionStatus::Active,
    );
    assert_eq!(
        manager.check_migration_status(migration.id).unwrap().status,
        dzl_core::MigrationStatus::Completed,
    );

    engine.shutdown().await;
}

/// Tiny ordered call recorder shared across async handlers.
mod call_log {
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct Calls(Mutex<Vec<String>>);

    impl Calls {
        pub fn push(&self, name: &str) {
            if let Ok(mut calls) = self.0.lock() {
                calls.push(name.to_string());
            }
        }

        pub fn snapshot(&self) -> Vec<String> {
            self.0.lock().map(|calls| calls.clone()).unwrap_or_default()
        }
    }
}
