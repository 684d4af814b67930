// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for engine tests.

use crate::{Engine, EngineConfig, HandlerError};
use dzl_core::{Bag, FakeClock, RunRecord, SequentialIdGen, SystemClock};
use dzl_storage::ProcessStore;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub(crate) type TestEngine = Engine<SystemClock, SequentialIdGen>;
pub(crate) type FakeTimeEngine = Engine<FakeClock, SequentialIdGen>;

fn fast_config() -> EngineConfig {
    EngineConfig {
        poll_interval: Duration::from_millis(10),
        scheduler_interval: Duration::from_secs(3600),
        default_dsl_version: "0.1".to_string(),
    }
}

/// Engine over a fresh in-memory store with fast polling.
pub(crate) fn test_engine() -> Arc<TestEngine> {
    test_engine_with_store(Arc::new(ProcessStore::in_memory()))
}

pub(crate) fn test_engine_with_store(store: Arc<ProcessStore>) -> Arc<TestEngine> {
    Engine::new(store, SystemClock, SequentialIdGen::new("id"), fast_config())
}

/// Engine with a controllable clock (for scheduler and version tests).
pub(crate) fn fake_time_engine() -> (Arc<FakeTimeEngine>, FakeClock) {
    let clock = FakeClock::new();
    let engine = Engine::new(
        Arc::new(ProcessStore::in_memory()),
        clock.clone(),
        SequentialIdGen::new("id"),
        fast_config(),
    );
    (engine, clock)
}

pub(crate) fn bag(value: Value) -> Bag {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

/// Register a service that records its invocation and returns `output`.
pub(crate) fn recording_service(
    engine: &Arc<TestEngine>,
    name: &str,
    calls: &Arc<Mutex<Vec<String>>>,
    output: Value,
) {
    let calls = Arc::clone(calls);
    let name_owned = name.to_string();
    engine.registry().service_fn(name, move |_inputs| {
        let calls = Arc::clone(&calls);
        let name = name_owned.clone();
        let output = output.clone();
        async move {
            calls.lock().push(name);
            Ok(bag(output))
        }
    });
}

/// Register a service that records its invocation and always fails.
pub(crate) fn failing_service(
    engine: &Arc<TestEngine>,
    name: &str,
    calls: &Arc<Mutex<Vec<String>>>,
    message: &str,
) {
    let calls = Arc::clone(calls);
    let name_owned = name.to_string();
    let message = message.to_string();
    engine.registry().service_fn(name, move |_inputs| {
        let calls = Arc::clone(&calls);
        let name = name_owned.clone();
        let message = message.clone();
        async move {
            calls.lock().push(name);
            Err(HandlerError::new(message))
        }
    });
}

/// Poll the store until the run reaches a terminal status.
pub(crate) async fn wait_for_terminal(engine: &Arc<TestEngine>, run_id: &str) -> RunRecord {
    wait_for(engine, run_id, |run| run.status.is_terminal()).await
}

/// Poll the store until the run satisfies `predicate` (5s budget).
pub(crate) async fn wait_for(
    engine: &Arc<TestEngine>,
    run_id: &str,
    predicate: impl Fn(&RunRecord) -> bool,
) -> RunRecord {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(run) = engine.get_run(run_id) {
            if predicate(&run) {
                return run;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "run {run_id} did not reach expected state: {:?}",
                engine.get_run(run_id).map(|r| r.status),
            );
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
