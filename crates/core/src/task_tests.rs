// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn debug_redacts_secret() {
    let identity = TaskIdentity::new(42, "super-secret-token");
    let debug = format!("{identity:?}");
    assert!(!debug.contains("super-secret-token"));
    assert!(debug.contains("42"));
}

#[test]
fn display_shows_only_task_id() {
    let identity = TaskIdentity::new(7, "token");
    assert_eq!(identity.to_string(), "task 7");
}

#[test]
fn serde_roundtrip_keeps_secret() {
    // The wire needs the secret; only Debug/Display hide it.
    let identity = TaskIdentity::new(1, "tok");
    let json = serde_json::to_string(&identity).unwrap();
    let parsed: TaskIdentity = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, identity);
}
