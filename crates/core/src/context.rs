// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process execution context and expression resolution.
//!
//! The context accumulates step outputs during a run and resolves the small
//! expression sub-language used for input mappings (`inputs.order_id`,
//! `validate.is_valid`, `vars.counter`), string interpolation (`${…}`), and
//! conditional branching (`inputs.amount > 1000`).

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

use crate::spec::InputMapping;

/// An untyped key/value bag, the unit of data flowing between steps.
pub type Bag = serde_json::Map<String, Value>;

/// Interpolation pattern for `${expression}` placeholders
// Allow expect here as the regex is compile-time verified to be valid
#[allow(clippy::expect_used)]
static INTERP_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("constant regex pattern is valid"));

/// Comparison operators recognized in conditions, in scan order.
///
/// Two-character operators come first so `>=` is not misread as `>`.
const OPERATORS: &[&str] = &["==", "!=", ">=", "<=", ">", "<"];

/// Execution context for a process run.
///
/// Tracks the initial inputs, the outputs of each completed step (in
/// completion order), user variables, and the currently executing step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    #[serde(default)]
    pub inputs: Bag,
    #[serde(default)]
    pub step_outputs: IndexMap<String, Bag>,
    #[serde(default)]
    pub variables: Bag,
    #[serde(default)]
    pub current_step: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl Context {
    pub fn new(inputs: Bag, started_at: DateTime<Utc>) -> Self {
        Self {
            inputs,
            step_outputs: IndexMap::new(),
            variables: Bag::new(),
            current_step: None,
            started_at,
        }
    }

    /// Record output from a completed step.
    pub fn update_step(&mut self, step_name: &str, output: Bag) {
        self.step_outputs.insert(step_name.to_string(), output);
    }

    /// Update the currently executing step.
    pub fn set_current_step(&mut self, step_name: Option<&str>) {
        self.current_step = step_name.map(str::to_string);
    }

    /// Set a context variable.
    pub fn set_variable(&mut self, name: &str, value: Value) {
        self.variables.insert(name.to_string(), value);
    }

    /// Get a context variable.
    pub fn get_variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Resolve an expression to a value.
    ///
    /// Supported forms:
    /// - `inputs.<path>` — process input
    /// - `vars.<path>` — context variable
    /// - `<step_name>.<path>` — that step's recorded output
    /// - `"${expr}"` anywhere in a string — interpolation
    /// - anything else — returned verbatim as a literal string
    ///
    /// Resolution never fails: an unknown root yields the expression itself
    /// and a path that runs off the data yields `Value::Null`.
    pub fn resolve(&self, expression: &str) -> Value {
        if expression.contains("${") {
            return Value::String(self.interpolate(expression));
        }

        let mut parts = expression.split('.');
        let root = parts.next().unwrap_or_default();
        let path: Vec<&str> = parts.collect();
        if path.is_empty() {
            // Literal value
            return Value::String(expression.to_string());
        }

        let bag = match root {
            "inputs" => &self.inputs,
            "vars" => &self.variables,
            step => match self.step_outputs.get(step) {
                Some(outputs) => outputs,
                // Unknown root, return as literal
                None => return Value::String(expression.to_string()),
            },
        };

        navigate(bag.get(path[0]), &path[1..])
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Interpolate `${…}` expressions in a template string.
    ///
    /// Every placeholder is resolved and stringified; nil becomes the
    /// empty string.
    pub fn interpolate(&self, template: &str) -> String {
        INTERP_PATTERN
            .replace_all(template, |caps: &regex::Captures| {
                stringify(&self.resolve(&caps[1]))
            })
            .into_owned()
    }

    /// Evaluate a boolean condition expression.
    ///
    /// Recognizes `==`, `!=`, `>=`, `<=`, `>`, `<` (first match wins). The
    /// left operand is resolved; the right operand is parsed as a literal
    /// first and only resolved as a fallback. A condition without an
    /// operator is a truthiness check on the resolved value. Comparisons
    /// across incompatible types are false.
    pub fn evaluate_condition(&self, condition: &str) -> bool {
        let condition = condition.trim();

        for op in OPERATORS {
            if let Some(idx) = condition.find(op) {
                let left = self.resolve(condition[..idx].trim());
                let right = self.parse_literal(condition[idx + op.len()..].trim());
                return compare(&left, &right, op);
            }
        }

        is_truthy(&self.resolve(condition))
    }

    /// Parse a literal value from a condition's right-hand side.
    fn parse_literal(&self, raw: &str) -> Value {
        let raw = raw.trim();
        let lowered = raw.to_ascii_lowercase();

        match lowered.as_str() {
            "true" => return Value::Bool(true),
            "false" => return Value::Bool(false),
            "null" | "none" => return Value::Null,
            _ => {}
        }

        if raw.len() >= 2
            && ((raw.starts_with('"') && raw.ends_with('"'))
                || (raw.starts_with('\'') && raw.ends_with('\'')))
        {
            return Value::String(raw[1..raw.len() - 1].to_string());
        }

        if let Ok(n) = raw.parse::<i64>() {
            return Value::Number(n.into());
        }
        if let Ok(f) = raw.parse::<f64>() {
            if let Some(n) = serde_json::Number::from_f64(f) {
                return Value::Number(n);
            }
        }

        // Otherwise, resolve as expression
        self.resolve(raw)
    }

    /// Build step inputs from `(source, target)` mappings.
    pub fn build_step_inputs(&self, mappings: &[InputMapping]) -> Bag {
        let mut result = Bag::new();
        for mapping in mappings {
            result.insert(mapping.target.clone(), self.resolve(&mapping.source));
        }
        result
    }

    /// The accumulated outputs: every step output flattened to
    /// `step_name.field = value`.
    pub fn outputs(&self) -> Bag {
        let mut result = Bag::new();
        for (step_name, outputs) in &self.step_outputs {
            for (key, value) in outputs {
                result.insert(format!("{}.{}", step_name, key), value.clone());
            }
        }
        result
    }

    /// Export the context as a serializable bag.
    pub fn to_bag(&self) -> Bag {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Bag::new(),
        }
    }

    /// Restore a context from a bag, falling back to an empty context at
    /// `now` when the bag does not parse.
    pub fn from_bag(bag: Bag, now: DateTime<Utc>) -> Self {
        serde_json::from_value(Value::Object(bag)).unwrap_or_else(|_| Self::new(Bag::new(), now))
    }
}

/// Navigate a dotted path through nested maps and sequences.
///
/// A segment that parses as a non-negative integer indexes into sequences.
/// Out-of-bounds or type mismatch yields `None`, never an error.
fn navigate<'a>(mut current: Option<&'a Value>, path: &[&str]) -> Option<&'a Value> {
    for part in path {
        current = match current? {
            Value::Object(map) => map.get(*part),
            Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
    }
    current
}

/// Stringify a value for interpolation (nil becomes empty).
fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Truthiness: null, false, zero, empty string/list/map are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn compare(left: &Value, right: &Value, op: &str) -> bool {
    match op {
        "==" => values_equal(left, right),
        "!=" => !values_equal(left, right),
        _ => match ordering(left, right) {
            Some(ord) => match op {
                ">" => ord.is_gt(),
                "<" => ord.is_lt(),
                ">=" => ord.is_ge(),
                "<=" => ord.is_le(),
                _ => false,
            },
            None => false,
        },
    }
}

/// Equality with numeric coercion (`1 == 1.0`).
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}

/// Ordering is defined for number pairs and string pairs only.
fn ordering(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
