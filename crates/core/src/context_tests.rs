// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;
use yare::parameterized;

fn bag(value: serde_json::Value) -> Bag {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

fn sample() -> Context {
    let mut ctx = Context::new(
        bag(json!({
            "order_id": "123",
            "amount": 1500,
            "customer": {"name": "Ada", "tags": ["vip", "beta"]},
        })),
        Utc::now(),
    );
    ctx.update_step(
        "validate_order",
        bag(json!({"is_valid": true, "score": 0.8})),
    );
    ctx.set_variable("counter", json!(5));
    ctx
}

#[test]
fn resolves_input_paths() {
    let ctx = sample();
    assert_eq!(ctx.resolve("inputs.order_id"), json!("123"));
    assert_eq!(ctx.resolve("inputs.customer.name"), json!("Ada"));
}

#[test]
fn resolves_step_outputs_and_vars() {
    let ctx = sample();
    assert_eq!(ctx.resolve("validate_order.is_valid"), json!(true));
    assert_eq!(ctx.resolve("vars.counter"), json!(5));
}

#[test]
fn resolves_sequence_indices() {
    let ctx = sample();
    assert_eq!(ctx.resolve("inputs.customer.tags.0"), json!("vip"));
    assert_eq!(ctx.resolve("inputs.customer.tags.1"), json!("beta"));
    // Out of bounds and non-numeric index yield null, not an error
    assert_eq!(ctx.resolve("inputs.customer.tags.9"), Value::Null);
    assert_eq!(ctx.resolve("inputs.customer.tags.first"), Value::Null);
}

#[test]
fn unknown_root_is_a_literal() {
    let ctx = sample();
    assert_eq!(ctx.resolve("nope.field"), json!("nope.field"));
    assert_eq!(ctx.resolve("just_a_word"), json!("just_a_word"));
}

#[test]
fn missing_path_yields_null() {
    let ctx = sample();
    assert_eq!(ctx.resolve("inputs.missing"), Value::Null);
    assert_eq!(ctx.resolve("inputs.order_id.deeper"), Value::Null);
}

#[test]
fn interpolation_replaces_every_occurrence() {
    let ctx = sample();
    assert_eq!(
        ctx.resolve("order ${inputs.order_id} for ${inputs.customer.name}"),
        json!("order 123 for Ada"),
    );
    // Nil interpolates to empty string
    assert_eq!(ctx.resolve("x${inputs.missing}y"), json!("xy"));
    // Non-string values are stringified
    assert_eq!(ctx.resolve("n=${vars.counter}"), json!("n=5"));
}

#[parameterized(
    eq_true = { "validate_order.is_valid == true", true },
    eq_false = { "validate_order.is_valid == false", false },
    ne = { "inputs.order_id != \"999\"", true },
    gt = { "inputs.amount > 1000", true },
    gt_false = { "inputs.amount > 2000", false },
    ge = { "inputs.amount >= 1500", true },
    le = { "inputs.amount <= 1500", true },
    lt = { "vars.counter < 10", true },
    float_right = { "validate_order.score > 0.5", true },
    quoted_string = { "inputs.order_id == \"123\"", true },
    single_quoted = { "inputs.order_id == '123'", true },
    null_literal = { "inputs.missing == null", true },
    none_literal = { "inputs.missing == none", true },
    truthy = { "validate_order.is_valid", true },
    truthy_missing = { "inputs.missing", false },
)]
fn conditions(expr: &str, expected: bool) {
    let ctx = sample();
    assert_eq!(ctx.evaluate_condition(expr), expected, "{}", expr);
}

#[test]
fn incompatible_comparison_is_false() {
    let ctx = sample();
    // String vs number ordering has no answer
    assert!(!ctx.evaluate_condition("inputs.order_id > 100"));
    assert!(!ctx.evaluate_condition("inputs.customer > 1"));
}

#[test]
fn numeric_equality_coerces_int_and_float() {
    let ctx = sample();
    assert!(ctx.evaluate_condition("inputs.amount == 1500.0"));
}

#[test]
fn right_operand_falls_back_to_resolution() {
    let ctx = sample();
    assert!(ctx.evaluate_condition("inputs.order_id == inputs.order_id"));
    // Unknown right-hand root resolves to the literal string
    assert!(ctx.evaluate_condition("inputs.order_id != some_literal"));
}

#[test]
fn build_step_inputs_maps_sources_to_targets() {
    let ctx = sample();
    let inputs = ctx.build_step_inputs(&[
        InputMapping::new("inputs.order_id", "id"),
        InputMapping::new("validate_order.is_valid", "ok"),
        InputMapping::new("inputs.missing", "gone"),
    ]);
    assert_eq!(inputs.get("id"), Some(&json!("123")));
    assert_eq!(inputs.get("ok"), Some(&json!(true)));
    assert_eq!(inputs.get("gone"), Some(&Value::Null));
}

#[test]
fn outputs_flatten_as_step_dot_field() {
    let mut ctx = sample();
    ctx.update_step("notify", bag(json!({"sent": true})));
    let outputs = ctx.outputs();
    assert_eq!(outputs.get("validate_order.is_valid"), Some(&json!(true)));
    assert_eq!(outputs.get("notify.sent"), Some(&json!(true)));
}

#[test]
fn bag_round_trip_is_identity() {
    let mut ctx = sample();
    ctx.set_current_step(Some("validate_order"));
    let restored = Context::from_bag(ctx.to_bag(), Utc::now());

    assert_eq!(restored.inputs, ctx.inputs);
    assert_eq!(restored.step_outputs, ctx.step_outputs);
    assert_eq!(restored.variables, ctx.variables);
    assert_eq!(restored.current_step, ctx.current_step);
    assert_eq!(restored.started_at, ctx.started_at);
}

#[test]
fn from_bag_with_garbage_falls_back_to_empty() {
    let now = Utc::now();
    let restored = Context::from_bag(bag(json!({"started_at": 42})), now);
    assert!(restored.inputs.is_empty());
    assert_eq!(restored.started_at, now);
}

#[parameterized(
    null = { json!(null), false },
    bool_true = { json!(true), true },
    zero = { json!(0), false },
    nonzero = { json!(3), true },
    zero_float = { json!(0.0), false },
    empty_string = { json!(""), false },
    string = { json!("x"), true },
    empty_list = { json!([]), false },
    list = { json!([1]), true },
    empty_map = { json!({}), false },
)]
fn truthiness(value: serde_json::Value, expected: bool) {
    assert_eq!(is_truthy(&value), expected);
}
