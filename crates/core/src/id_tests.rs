// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn uuid_ids_are_unique() {
    let idgen = UuidIdGen;
    let a = idgen.next();
    let b = idgen.next();
    assert_ne!(a, b);
    assert_eq!(a.len(), 36);
}

#[test]
fn sequential_ids_count_up() {
    let idgen = SequentialIdGen::new("run");
    assert_eq!(idgen.next(), "run-1");
    assert_eq!(idgen.next(), "run-2");

    // Clones share the counter
    let clone = idgen.clone();
    assert_eq!(clone.next(), "run-3");
    assert_eq!(idgen.next(), "run-4");
}

#[test]
fn short_id_truncates() {
    assert_eq!("abcdef".short(4), "abcd");
    assert_eq!("ab".short(4), "ab");
    assert_eq!("".short(4), "");
}
