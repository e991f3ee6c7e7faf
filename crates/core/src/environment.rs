// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Build environment construction and variable expansion.
//!
//! The environment is a plain `HashMap<String, String>` owned by the
//! coordinator for the duration of one build. Values may reference other
//! variables as `${NAME}`, `$NAME` or `%NAME%`, with `${NAME:default}`
//! supplying a fallback. Expansion is re-run whenever new variables are
//! introduced mid-build (e.g. from the env side-channel file).

use std::collections::HashMap;
use std::path::Path;

use crate::WORKING_DIR_VAR;

/// Upper bound on recursive expansion passes. Self-referential chains are
/// left unexpanded once the budget is exhausted.
const MAX_EXPANSION_PASSES: usize = 10;

/// Expand variable references in `text`, consulting the build environment
/// first and falling back to the process environment.
pub fn expand_text(text: &str, env: &HashMap<String, String>) -> String {
    expand_with(text, &|name| {
        env.get(name)
            .cloned()
            .or_else(|| std::env::var(name).ok())
    })
}

/// Expand variable references in `text`, consulting the process environment
/// first and falling back to the build environment.
///
/// Recursive expansion uses this order so host-level values win over
/// half-expanded build values, matching step scripts' view of the world.
pub fn expand_text_os_first(text: &str, env: &HashMap<String, String>) -> String {
    expand_with(text, &|name| {
        std::env::var(name).ok().or_else(|| env.get(name).cloned())
    })
}

/// Expand every value in the map against the map itself until a fixed point
/// is reached, bounded by [`MAX_EXPANSION_PASSES`].
///
/// Idempotent: expanding an already-expanded map yields the same map.
pub fn expand_recursively(env: &HashMap<String, String>) -> HashMap<String, String> {
    let mut result: HashMap<String, String> = env
        .iter()
        .map(|(key, value)| (key.clone(), expand_text_os_first(value, env)))
        .collect();

    for _ in 0..MAX_EXPANSION_PASSES {
        let mut changed = false;
        let keys: Vec<String> = result.keys().cloned().collect();

        for key in keys {
            let Some(value) = result.get(&key).cloned() else {
                continue;
            };
            let expanded = expand_text_os_first(&value, &result);
            if expanded != value {
                changed = true;
                result.insert(key, expanded);
            }
        }

        if !changed {
            break;
        }
    }

    result
}

/// Parameters for resolving the working directory default.
#[derive(Debug, Clone, Default)]
pub struct WorkingDirConfig<'a> {
    pub task_id: i64,
    /// True when execution resumes from a named instruction: a pre-existing
    /// default directory must then be reused rather than replaced.
    pub resuming: bool,
    /// Directory created ahead of time by a persistent worker, used unless
    /// the task environment overrides it.
    pub pre_created_dir: Option<&'a str>,
}

/// Seed the server-provided environment with host-derived defaults and
/// expand it recursively.
///
/// `OS` is only set when neither the response nor the host defines it;
/// `CIRRUS_OS` always reflects the host. The working directory resolution
/// ladder: explicit value > pre-created directory > the shared default
/// path (when absent, or when resuming) > a fresh unique temp directory.
pub fn with_host_defaults(
    mut env: HashMap<String, String>,
    config: &WorkingDirConfig<'_>,
) -> HashMap<String, String> {
    if !env.contains_key("OS") && std::env::var_os("OS").is_none() {
        env.insert("OS".to_string(), std::env::consts::OS.to_string());
    }
    env.insert("CIRRUS_OS".to_string(), std::env::consts::OS.to_string());

    if !env.contains_key(WORKING_DIR_VAR) {
        if let Some(pre_created) = config.pre_created_dir.filter(|dir| !dir.is_empty()) {
            env.insert(WORKING_DIR_VAR.to_string(), pre_created.to_string());
        } else {
            env.insert(
                WORKING_DIR_VAR.to_string(),
                default_working_dir(config.task_id, config.resuming),
            );
        }
    }

    expand_recursively(&env)
}

fn default_working_dir(task_id: i64, resuming: bool) -> String {
    let shared_default = std::env::temp_dir().join("mason-build");

    if !Path::new(&shared_default).exists() || resuming {
        return shared_default.display().to_string();
    }

    // The shared default is occupied by another attempt: carve out a
    // task-unique directory instead.
    tempfile::Builder::new()
        .prefix(&format!("mason-task-{task_id}-"))
        .tempdir_in(std::env::temp_dir())
        .map(|dir| dir.keep().display().to_string())
        .unwrap_or_else(|_| shared_default.display().to_string())
}

fn expand_with(text: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    let text = rewrite_percent_refs(text);
    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();

    while let Some(dollar) = rest.find('$') {
        out.push_str(&rest[..dollar]);
        rest = &rest[dollar + 1..];

        if let Some(inner) = rest.strip_prefix('{') {
            match inner.find('}') {
                Some(close) => {
                    let (name, default) = match inner[..close].split_once(':') {
                        Some((name, default)) => (name, default),
                        None => (&inner[..close], ""),
                    };
                    out.push_str(&lookup(name).unwrap_or_else(|| default.to_string()));
                    rest = &inner[close + 1..];
                }
                None => {
                    // Unterminated brace: keep the text as written.
                    out.push('$');
                }
            }
        } else {
            let name_len = ident_len(rest);
            if name_len > 0 {
                out.push_str(&lookup(&rest[..name_len]).unwrap_or_default());
                rest = &rest[name_len..];
            } else {
                out.push('$');
            }
        }
    }

    out.push_str(rest);
    out
}

/// Rewrite `%NAME%` references into `${NAME}` so a single scanner handles
/// both syntaxes.
fn rewrite_percent_refs(text: &str) -> String {
    #[allow(clippy::expect_used)]
    static PERCENT_REF: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
        regex::Regex::new(r"%(\w+)%").expect("static pattern")
    });
    PERCENT_REF.replace_all(text, "$${$1}").into_owned()
}

fn ident_len(text: &str) -> usize {
    let mut len = 0;
    for (i, ch) in text.char_indices() {
        let valid = if i == 0 {
            ch.is_ascii_alphabetic() || ch == '_'
        } else {
            ch.is_ascii_alphanumeric() || ch == '_'
        };
        if !valid {
            break;
        }
        len = i + ch.len_utf8();
    }
    len
}

/// Merge environment maps; later maps win on key collisions.
pub fn merge(maps: &[&HashMap<String, String>]) -> HashMap<String, String> {
    let mut result = HashMap::new();
    for map in maps {
        for (key, value) in map.iter() {
            result.insert(key.clone(), value.clone());
        }
    }
    result
}

#[cfg(test)]
#[path = "environment_tests.rs"]
mod tests;
