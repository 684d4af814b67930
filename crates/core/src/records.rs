// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signal, audit, schedule, and event records.

use crate::context::Bag;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::spec::StepKind;

/// An asynchronous message targeted at a run.
///
/// Consumed at most once by a waiting `wait` step matching `signal_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRecord {
    pub signal_id: String,
    pub run_id: String,
    pub signal_name: String,
    pub payload: Bag,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
}

impl SignalRecord {
    pub fn new(
        signal_id: impl Into<String>,
        run_id: impl Into<String>,
        signal_name: impl Into<String>,
        payload: Bag,
    ) -> Self {
        Self {
            signal_id: signal_id.into(),
            run_id: run_id.into(),
            signal_name: signal_name.into(),
            payload,
            processed: false,
            processed_at: None,
        }
    }
}

/// Outcome of a single step attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    Failed,
}

/// Immutable audit record of one step attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecutionRecord {
    pub execution_id: String,
    pub run_id: String,
    pub step_name: String,
    pub step_kind: StepKind,
    /// 1-based attempt number
    pub attempt: u32,
    pub status: ExecutionStatus,
    pub outputs: Option<Bag>,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Per-schedule bookkeeping for the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleState {
    pub schedule_name: String,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_id: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleState {
    pub fn new(schedule_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            schedule_name: schedule_name.into(),
            last_run_at: None,
            last_run_id: None,
            next_run_at: None,
            run_count: 0,
            error_count: 0,
            last_error: None,
            updated_at: now,
        }
    }
}

/// A persisted lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: String,
    pub run_id: String,
    pub process_name: String,
    pub schema_name: String,
    pub event_data: Bag,
    pub created_at: DateTime<Utc>,
}
