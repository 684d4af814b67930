// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::state::ProcessState;
use dzl_core::{Bag, RunRecord};
use std::io::Write as _;

fn op(id: &str) -> StoreOp {
    StoreOp::RunInserted {
        run: RunRecord::new(id, "p", "0.1", Bag::new(), None, chrono::Utc::now()),
    }
}

fn run_ids(ops: &[StoreOp]) -> Vec<String> {
    let mut state = ProcessState::default();
    for op in ops {
        state.apply(op);
    }
    let mut ids: Vec<String> = state.runs.keys().cloned().collect();
    ids.sort();
    ids
}

#[test]
fn append_then_reopen_replays_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("process.wal");

    {
        let (mut wal, ops) = Wal::open(&path).unwrap();
        assert!(ops.is_empty());
        assert_eq!(wal.append(&op("r-1")).unwrap(), 1);
        assert_eq!(wal.append(&op("r-2")).unwrap(), 2);
    }

    let (wal, ops) = Wal::open(&path).unwrap();
    assert_eq!(ops.len(), 2);
    assert_eq!(run_ids(&ops), vec!["r-1", "r-2"]);
    assert_eq!(wal.next_seq(), 3);
}

#[test]
fn corrupt_tail_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("process.wal");

    {
        let (mut wal, _) = Wal::open(&path).unwrap();
        wal.append(&op("r-1")).unwrap();
    }

    // Simulate a torn write at the end of the file
    {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        file.write_all(b"{\"seq\":2,\"op\":{\"RunIns").unwrap();
    }

    let (wal, ops) = Wal::open(&path).unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(run_ids(&ops), vec!["r-1"]);
    // Sequence continues past the valid prefix
    assert_eq!(wal.next_seq(), 2);
}

#[test]
fn rewrite_collapses_log_and_keeps_seq_monotone() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("process.wal");

    let (mut wal, _) = Wal::open(&path).unwrap();
    wal.append(&op("r-1")).unwrap();
    wal.append(&op("r-2")).unwrap();

    let mut state = ProcessState::default();
    state.apply(&op("r-1"));
    state.apply(&op("r-2"));
    wal.rewrite(&StoreOp::Snapshot {
        state: Box::new(state),
    })
    .unwrap();
    wal.append(&op("r-3")).unwrap();
    drop(wal);

    let (_, ops) = Wal::open(&path).unwrap();
    assert_eq!(ops.len(), 2, "snapshot + one append");
    assert_eq!(run_ids(&ops), vec!["r-1", "r-2", "r-3"]);
}

#[test]
fn blank_lines_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("process.wal");

    {
        let (mut wal, _) = Wal::open(&path).unwrap();
        wal.append(&op("r-1")).unwrap();
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        file.write_all(b"\n\n").unwrap();
        wal.append(&op("r-2")).unwrap();
    }

    let (_, ops) = Wal::open(&path).unwrap();
    assert_eq!(run_ids(&ops), vec!["r-1", "r-2"]);
}
