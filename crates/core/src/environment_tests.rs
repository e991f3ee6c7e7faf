// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;

use proptest::prelude::*;

use super::*;

fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// ---------------------------------------------------------------------------
// Single-text expansion
// ---------------------------------------------------------------------------

#[yare::parameterized(
    braced = { "${GREETING} world", "hello world" },
    bare = { "$GREETING world", "hello world" },
    percent = { "%GREETING% world", "hello world" },
    adjacent = { "${GREETING}${GREETING}", "hellohello" },
    unknown_empty = { "a${MISSING}b", "ab" },
    with_default = { "a${MISSING:fallback}b", "afallbackb" },
    default_unused = { "${GREETING:fallback}", "hello" },
    lone_dollar = { "cost: 5$", "cost: 5$" },
    dollar_digit = { "$5", "$5" },
    unterminated = { "${GREETING", "${GREETING" },
)]
fn expand_single(input: &str, expected: &str) {
    let env = env(&[("GREETING", "hello")]);
    assert_eq!(expand_text(input, &env), expected);
}

#[test]
fn build_env_wins_over_os() {
    let env = env(&[("PATH", "custom")]);
    assert_eq!(expand_text("${PATH}", &env), "custom");
}

#[test]
fn os_env_wins_with_os_first() {
    let build = env(&[("PATH", "custom")]);
    let os_path = std::env::var("PATH").unwrap();
    assert_eq!(expand_text_os_first("${PATH}", &build), os_path);
}

#[test]
fn falls_back_to_os_environment() {
    // PATH is always present in the test process environment.
    let expanded = expand_text("${PATH}", &HashMap::new());
    assert!(!expanded.is_empty());
    assert_ne!(expanded, "${PATH}");
}

// ---------------------------------------------------------------------------
// Recursive expansion
// ---------------------------------------------------------------------------

#[test]
fn expands_chains() {
    let input = env(&[
        ("A", "a"),
        ("B", "${A}b"),
        ("C", "${B}c"),
        ("D", "${C}d"),
    ]);
    let result = expand_recursively(&input);
    assert_eq!(result.get("D").map(String::as_str), Some("abcd"));
}

#[test]
fn self_reference_reaches_fixed_point() {
    let input = env(&[("LOOP", "${LOOP}")]);
    let result = expand_recursively(&input);
    // `${LOOP}` expands to its own current value and stays put.
    assert_eq!(result.get("LOOP").map(String::as_str), Some("${LOOP}"));
    assert_eq!(expand_recursively(&result), result);
}

#[test]
fn mutual_reference_terminates() {
    let input = env(&[("A", "x${B}"), ("B", "y${A}")]);
    // Growth is capped by the pass budget; the call must return.
    let _ = expand_recursively(&input);
}

proptest! {
    /// Expanding twice yields the same map as expanding once, for maps
    /// whose references point at plain-valued keys.
    #[test]
    fn expansion_is_idempotent(
        plain in proptest::collection::hash_map("[A-Z]{1,8}", "[a-z0-9]{0,12}", 0..6),
        refs in proptest::collection::vec("[A-Z]{1,8}", 0..4),
    ) {
        let mut input: HashMap<String, String> = plain.clone();
        for (i, target) in refs.iter().enumerate() {
            input.insert(format!("REF{i}"), format!("pre-${{{target}}}-post"));
        }

        let once = expand_recursively(&input);
        let twice = expand_recursively(&once);
        prop_assert_eq!(once, twice);
    }
}

// ---------------------------------------------------------------------------
// Host defaults
// ---------------------------------------------------------------------------

#[test]
fn cirrus_os_always_reflects_host() {
    let result = with_host_defaults(env(&[("CIRRUS_OS", "plan9")]), &WorkingDirConfig::default());
    assert_eq!(
        result.get("CIRRUS_OS").map(String::as_str),
        Some(std::env::consts::OS)
    );
}

#[test]
fn explicit_working_dir_is_kept() {
    let result = with_host_defaults(
        env(&[(WORKING_DIR_VAR, "/explicit")]),
        &WorkingDirConfig {
            pre_created_dir: Some("/pre-created"),
            ..WorkingDirConfig::default()
        },
    );
    assert_eq!(
        result.get(WORKING_DIR_VAR).map(String::as_str),
        Some("/explicit")
    );
}

#[test]
fn pre_created_dir_fills_missing_working_dir() {
    let result = with_host_defaults(
        HashMap::new(),
        &WorkingDirConfig {
            pre_created_dir: Some("/pre-created"),
            ..WorkingDirConfig::default()
        },
    );
    assert_eq!(
        result.get(WORKING_DIR_VAR).map(String::as_str),
        Some("/pre-created")
    );
}

#[test]
fn missing_working_dir_gets_a_default() {
    let result = with_host_defaults(HashMap::new(), &WorkingDirConfig::default());
    let dir = result.get(WORKING_DIR_VAR).unwrap();
    assert!(!dir.is_empty());
}

#[test]
fn working_dir_references_expand() {
    let result = with_host_defaults(
        env(&[
            (WORKING_DIR_VAR, "/builds/${CIRRUS_OS}"),
        ]),
        &WorkingDirConfig::default(),
    );
    let expected = format!("/builds/{}", std::env::consts::OS);
    assert_eq!(result.get(WORKING_DIR_VAR), Some(&expected));
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

#[test]
fn merge_later_maps_win() {
    let base = env(&[("A", "1"), ("B", "1")]);
    let overlay = env(&[("B", "2"), ("C", "3")]);
    let merged = merge(&[&base, &overlay]);
    assert_eq!(merged.get("A").map(String::as_str), Some("1"));
    assert_eq!(merged.get("B").map(String::as_str), Some("2"));
    assert_eq!(merged.get("C").map(String::as_str), Some("3"));
}
