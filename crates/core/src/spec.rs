// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process, step, and schedule definitions.
//!
//! These types are produced by the DSL compiler and consumed read-only by
//! the engine. Serde defaults mirror the compiler's omission rules so a
//! minimal JSON spec deserializes into a runnable definition.

use serde::{Deserialize, Serialize};

/// The closed set of step kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Service,
    Send,
    Wait,
    HumanTask,
    Subprocess,
    Parallel,
    Condition,
}

impl StepKind {
    /// Wire name, used in audit rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Service => "service",
            StepKind::Send => "send",
            StepKind::Wait => "wait",
            StepKind::HumanTask => "human_task",
            StepKind::Subprocess => "subprocess",
            StepKind::Parallel => "parallel",
            StepKind::Condition => "condition",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Behavior when a process is started while a previous instance is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    #[default]
    Allow,
    Skip,
    CancelPrevious,
}

/// Behavior when a sibling inside a parallel step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelPolicy {
    #[default]
    FailFast,
    WaitAll,
}

/// Backoff strategy between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBackoff {
    Fixed,
    Linear,
    #[default]
    Exponential,
}

/// Retry policy for a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_interval")]
    pub initial_interval_seconds: f64,
    #[serde(default = "default_max_interval")]
    pub max_interval_seconds: f64,
    #[serde(default = "default_backoff_coefficient")]
    pub backoff_coefficient: f64,
    #[serde(default)]
    pub backoff: RetryBackoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_interval_seconds: default_initial_interval(),
            max_interval_seconds: default_max_interval(),
            backoff_coefficient: default_backoff_coefficient(),
            backoff: RetryBackoff::default(),
        }
    }
}

fn default_max_attempts() -> u32 {
    1
}

fn default_initial_interval() -> f64 {
    1.0
}

fn default_max_interval() -> f64 {
    60.0
}

fn default_backoff_coefficient() -> f64 {
    2.0
}

fn default_timeout() -> f64 {
    300.0
}

fn default_process_version() -> String {
    "v1".to_string()
}

/// A `(source expression, target field)` input mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputMapping {
    pub source: String,
    pub target: String,
}

impl InputMapping {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// A field assignment applied by a human-task outcome or a step effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldAssignment {
    /// `Entity.field` path
    pub field_path: String,
    /// Value expression, resolved against the run context
    pub value: String,
}

/// Entity mutation performed by the effect executor after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectAction {
    Create,
    Update,
    Delete,
}

/// A declarative side-effect attached to a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepEffect {
    pub action: EffectAction,
    pub entity_name: String,
    #[serde(default, rename = "where")]
    pub where_clause: Option<String>,
    #[serde(default)]
    pub assignments: Vec<FieldAssignment>,
}

/// One selectable outcome of a human task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeSpec {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub sets: Vec<FieldAssignment>,
}

/// Configuration of a human-task step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanTaskSpec {
    /// Surface identifier, opaque to the engine
    pub surface: String,
    #[serde(default)]
    pub entity_path: Option<String>,
    #[serde(default)]
    pub assignee_expression: Option<String>,
    #[serde(default)]
    pub assignee_role: Option<String>,
    #[serde(default)]
    pub escalation_timeout_seconds: Option<f64>,
    #[serde(default)]
    pub outcomes: Vec<OutcomeSpec>,
}

/// One step of a process definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStepSpec {
    pub name: String,
    pub kind: StepKind,
    #[serde(default)]
    pub inputs: Vec<InputMapping>,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: f64,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub wait_duration_seconds: Option<f64>,
    #[serde(default)]
    pub wait_for_signal: Option<String>,
    #[serde(default)]
    pub human_task: Option<HumanTaskSpec>,
    #[serde(default)]
    pub subprocess: Option<String>,
    #[serde(default)]
    pub parallel_steps: Vec<ProcessStepSpec>,
    #[serde(default)]
    pub parallel_policy: ParallelPolicy,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub on_true: Option<String>,
    #[serde(default)]
    pub on_false: Option<String>,
    #[serde(default)]
    pub on_success: Option<String>,
    #[serde(default)]
    pub compensate_with: Option<String>,
    #[serde(default)]
    pub effects: Vec<StepEffect>,
}

impl ProcessStepSpec {
    /// A bare step of the given kind with default timeout and no retry.
    pub fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            kind,
            inputs: Vec::new(),
            timeout_seconds: default_timeout(),
            retry: None,
            service: None,
            channel: None,
            message: None,
            wait_duration_seconds: None,
            wait_for_signal: None,
            human_task: None,
            subprocess: None,
            parallel_steps: Vec::new(),
            parallel_policy: ParallelPolicy::default(),
            condition: None,
            on_true: None,
            on_false: None,
            on_success: None,
            compensate_with: None,
            effects: Vec::new(),
        }
    }

    /// Shorthand for a service-call step.
    pub fn service(name: impl Into<String>, service: impl Into<String>) -> Self {
        let mut step = Self::new(name, StepKind::Service);
        step.service = Some(service.into());
        step
    }

    pub fn with_inputs(mut self, inputs: Vec<InputMapping>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_compensation(mut self, compensation: impl Into<String>) -> Self {
        self.compensate_with = Some(compensation.into());
        self
    }
}

/// Undo handler for a step, invoked during saga compensation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationSpec {
    pub name: String,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub inputs: Vec<InputMapping>,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: f64,
}

/// A complete process definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub name: String,
    #[serde(default = "default_process_version")]
    pub version: String,
    #[serde(default)]
    pub steps: Vec<ProcessStepSpec>,
    #[serde(default)]
    pub compensations: Vec<CompensationSpec>,
    #[serde(default)]
    pub overlap_policy: OverlapPolicy,
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>, steps: Vec<ProcessStepSpec>) -> Self {
        Self {
            name: name.into(),
            version: default_process_version(),
            steps,
            compensations: Vec::new(),
            overlap_policy: OverlapPolicy::default(),
        }
    }

    /// Look up a step by name.
    pub fn get_step(&self, name: &str) -> Option<&ProcessStepSpec> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Index of a step by name.
    pub fn step_index(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name == name)
    }

    /// Look up a compensation by name.
    pub fn get_compensation(&self, name: &str) -> Option<&CompensationSpec> {
        self.compensations.iter().find(|c| c.name == name)
    }
}

/// A cron- or interval-triggered rule that starts a run periodically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub name: String,
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub interval_seconds: Option<f64>,
    #[serde(default)]
    pub overlap_policy: OverlapPolicy,
    #[serde(default)]
    pub steps: Vec<ProcessStepSpec>,
}

impl ScheduleSpec {
    /// The process definition a schedule fire executes.
    pub fn to_process_spec(&self) -> ProcessSpec {
        ProcessSpec {
            name: self.name.clone(),
            version: default_process_version(),
            steps: self.steps.clone(),
            compensations: Vec::new(),
            overlap_policy: self.overlap_policy,
        }
    }
}

#[cfg(test)]
#[path = "spec_tests.rs"]
mod tests;
