// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn minimal_step_deserializes_with_defaults() {
    let step: ProcessStepSpec =
        serde_json::from_str(r#"{"name": "charge", "kind": "service", "service": "billing"}"#)
            .unwrap();

    assert_eq!(step.name, "charge");
    assert_eq!(step.kind, StepKind::Service);
    assert_eq!(step.service.as_deref(), Some("billing"));
    assert_eq!(step.timeout_seconds, 300.0);
    assert!(step.retry.is_none());
    assert!(step.inputs.is_empty());
    assert_eq!(step.parallel_policy, ParallelPolicy::FailFast);
}

#[test]
fn retry_defaults_are_single_attempt_exponential() {
    let retry = RetryConfig::default();
    assert_eq!(retry.max_attempts, 1);
    assert_eq!(retry.initial_interval_seconds, 1.0);
    assert_eq!(retry.max_interval_seconds, 60.0);
    assert_eq!(retry.backoff_coefficient, 2.0);
    assert_eq!(retry.backoff, RetryBackoff::Exponential);
}

#[test]
fn partial_retry_fills_in_defaults() {
    let retry: RetryConfig =
        serde_json::from_str(r#"{"max_attempts": 3, "backoff": "linear"}"#).unwrap();
    assert_eq!(retry.max_attempts, 3);
    assert_eq!(retry.backoff, RetryBackoff::Linear);
    assert_eq!(retry.initial_interval_seconds, 1.0);
}

#[test]
fn process_spec_lookups() {
    let spec = ProcessSpec::new(
        "order_flow",
        vec![
            ProcessStepSpec::service("validate", "orders"),
            ProcessStepSpec::service("charge", "billing").with_compensation("refund"),
        ],
    );

    assert_eq!(spec.version, "v1");
    assert_eq!(spec.step_index("charge"), Some(1));
    assert!(spec.get_step("missing").is_none());
    assert_eq!(
        spec.get_step("charge").and_then(|s| s.compensate_with.as_deref()),
        Some("refund"),
    );
}

#[test]
fn step_effect_where_clause_round_trips() {
    let effect: StepEffect = serde_json::from_str(
        r#"{"action": "update", "entity_name": "Order", "where": "id = 1"}"#,
    )
    .unwrap();
    assert_eq!(effect.action, EffectAction::Update);
    assert_eq!(effect.where_clause.as_deref(), Some("id = 1"));

    let json = serde_json::to_value(&effect).unwrap();
    assert_eq!(json["where"], "id = 1");
}

#[test]
fn schedule_derives_a_process_spec() {
    let schedule = ScheduleSpec {
        name: "nightly_report".to_string(),
        cron: Some("0 2 * * *".to_string()),
        interval_seconds: None,
        overlap_policy: OverlapPolicy::Skip,
        steps: vec![ProcessStepSpec::service("report", "reporting")],
    };

    let spec = schedule.to_process_spec();
    assert_eq!(spec.name, "nightly_report");
    assert_eq!(spec.overlap_policy, OverlapPolicy::Skip);
    assert_eq!(spec.steps.len(), 1);
}

#[test]
fn overlap_policy_wire_names() {
    assert_eq!(
        serde_json::to_value(OverlapPolicy::CancelPrevious).unwrap(),
        serde_json::json!("cancel_previous"),
    );
    assert_eq!(
        serde_json::from_str::<OverlapPolicy>(r#""skip""#).unwrap(),
        OverlapPolicy::Skip,
    );
}

#[test]
fn step_kind_audit_names() {
    assert_eq!(StepKind::HumanTask.as_str(), "human_task");
    assert_eq!(StepKind::Service.to_string(), "service");
}
