// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    plain = { "echo hello world", &["echo", "hello", "world"] },
    collapsed_spaces = { "a   b\t c", &["a", "b", "c"] },
    single_quotes = { "echo 'hello world'", &["echo", "hello world"] },
    double_quotes = { r#"echo "hello world""#, &["echo", "hello world"] },
    escaped_quote_inside = { r#"echo "say \"hi\"""#, &["echo", r#"say "hi""#] },
    backslash_space = { r"echo hello\ world", &["echo", "hello world"] },
    empty_quoted_word = { "echo ''", &["echo", ""] },
    mixed = { r#"run --flag='a b' "c d""#, &["run", "--flag=a b", "c d"] },
)]
fn splits(line: &str, expected: &[&str]) {
    assert_eq!(split_args(line).unwrap(), expected);
}

#[test]
fn empty_line_yields_no_words() {
    assert!(split_args("").unwrap().is_empty());
    assert!(split_args("   ").unwrap().is_empty());
}

#[yare::parameterized(
    single = { "echo 'oops" },
    double = { r#"echo "oops"# },
)]
fn unterminated_quote_is_an_error(line: &str) {
    assert!(matches!(
        split_args(line),
        Err(ProcessError::UnterminatedQuote)
    ));
}
