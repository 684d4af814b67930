// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    pending = { TaskStatus::Pending, false },
    assigned = { TaskStatus::Assigned, false },
    in_progress = { TaskStatus::InProgress, false },
    completed = { TaskStatus::Completed, true },
    escalated = { TaskStatus::Escalated, false },
    expired = { TaskStatus::Expired, true },
    cancelled = { TaskStatus::Cancelled, true },
)]
fn terminal_statuses(status: TaskStatus, terminal: bool) {
    assert_eq!(status.is_terminal(), terminal);
}

#[test]
fn wire_names() {
    assert_eq!(TaskStatus::InProgress.to_string(), "in_progress");
    assert_eq!(
        serde_json::from_str::<TaskStatus>(r#""escalated""#).unwrap(),
        TaskStatus::Escalated,
    );
}
