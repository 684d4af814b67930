// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn payload_always_carries_schema_run_id_and_time() {
    let event = LifecycleEvent::ProcessStarted {
        run_id: "r-1".to_string(),
        process_name: "order_flow".to_string(),
    };
    let at = Utc::now();
    let payload = event.payload(at);

    assert_eq!(payload["schema"], json!("ProcessStarted"));
    assert_eq!(payload["run_id"], json!("r-1"));
    assert_eq!(payload["t_event"], json!(at.to_rfc3339()));
    assert_eq!(payload["process_name"], json!("order_flow"));
}

#[test]
fn completed_payload_includes_outputs() {
    let mut outputs = Bag::new();
    outputs.insert("charge.ok".to_string(), json!(true));
    let event = LifecycleEvent::ProcessCompleted {
        run_id: "r-2".to_string(),
        process_name: "order_flow".to_string(),
        outputs,
    };

    let payload = event.payload(Utc::now());
    assert_eq!(payload["outputs"]["charge.ok"], json!(true));
}

#[test]
fn cancelled_carries_reason_but_no_process_name() {
    let event = LifecycleEvent::ProcessCancelled {
        run_id: "r-3".to_string(),
        reason: "operator request".to_string(),
    };

    assert_eq!(event.schema_name(), "ProcessCancelled");
    assert!(event.process_name().is_none());
    let payload = event.payload(Utc::now());
    assert_eq!(payload["reason"], json!("operator request"));
    assert!(!payload.contains_key("process_name"));
}

#[test]
fn human_task_assigned_payload() {
    let event = LifecycleEvent::HumanTaskAssigned {
        run_id: "r-4".to_string(),
        task_id: "t-1".to_string(),
        step_name: "approve".to_string(),
        surface: "approval_card".to_string(),
    };

    let payload = event.payload(Utc::now());
    assert_eq!(payload["task_id"], json!("t-1"));
    assert_eq!(payload["step_name"], json!("approve"));
    assert_eq!(payload["surface"], json!("approval_card"));
}
