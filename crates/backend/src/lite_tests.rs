// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use dzl_core::ProcessStepSpec;
use serde_json::json;

fn memory_config() -> LiteConfig {
    LiteConfig {
        db_path: ":memory:".to_string(),
        poll_interval_seconds: 0.01,
        scheduler_interval_seconds: 3600.0,
    }
}

fn bag(value: serde_json::Value) -> Bag {
    match value {
        serde_json::Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

async fn wait_terminal(backend: &dyn ProcessBackend, run_id: &str) -> RunRecord {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
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

#[tokio::test]
async fn backend_contract_round_trip() {
    let backend = LiteBackend::new(&memory_config()).unwrap();
    backend
        .engine()
        .registry()
        .service_fn("greet", |inputs| async move {
            let mut out = Bag::new();
            out.insert(
                "greeting".to_string(),
                json!(format!(
                    "hello {}",
                    inputs.get("name").and_then(|v| v.as_str()).unwrap_or("?"),
                )),
            );
            Ok(out)
        });

    // Drive everything through the trait object, as callers do
    let backend: Box<dyn ProcessBackend> = Box::new(backend);
    backend.initialize().await.unwrap();
    backend
        .register_process(ProcessSpec::new(
            "hello",
            vec![ProcessStepSpec::service("s1", "greet")
                .with_inputs(vec![dzl_core::InputMapping::new("inputs.name", "name")])],
        ))
        .await
        .unwrap();

    let run_id = backend
        .start_process("hello", bag(json!({"name": "ada"})), None, Some("v7".to_string()))
        .await
        .unwrap();

    let run = wait_terminal(backend.as_ref(), &run_id).await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.dsl_version, "v7");
    assert_eq!(run.outputs.unwrap()["s1.greeting"], json!("hello ada"));

    assert_eq!(
        backend.count_active_runs_by_version("v7").await.unwrap(),
        0,
    );
    assert_eq!(
        backend
            .list_runs_by_version("v7", None, 10)
            .await
            .unwrap()
            .len(),
        1,
    );

    backend.shutdown().await.unwrap();
}

#[tokio::test]
async fn file_backed_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = LiteConfig {
        db_path: dir
            .path()
            .join("processes.db")
            .to_string_lossy()
            .into_owned(),
        poll_interval_seconds: 0.01,
        scheduler_interval_seconds: 3600.0,
    };

    let spec = ProcessSpec::new("flow", vec![{
        let mut step = ProcessStepSpec::new("hold", dzl_core::StepKind::Wait);
        step.wait_for_signal = Some("go".to_string());
        step.timeout_seconds = 30.0;
        step
    }]);

    let run_id;
    {
        let backend = LiteBackend::new(&config).unwrap();
        backend.initialize().await.unwrap();
        backend.register_process(spec.clone()).await.unwrap();
        run_id = backend
            .start_process("flow", Bag::new(), None, None)
            .await
            .unwrap();

        // Wait until the run blocks on its signal, then shut down
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let run = backend.get_run(&run_id).await.unwrap().unwrap();
            if run.status == RunStatus::Waiting {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        backend.shutdown().await.unwrap();
    }

    // A fresh backend over the same journal resumes the suspended run
    let backend = LiteBackend::new(&config).unwrap();
    backend.register_process(spec).await.unwrap();
    backend.initialize().await.unwrap();
    backend
        .signal_process(&run_id, "go", Bag::new())
        .await
        .unwrap();

    let run = wait_terminal(&backend, &run_id).await;
    assert_eq!(run.status, RunStatus::Completed);
    backend.shutdown().await.unwrap();
}
