// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Script materialization and command construction.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use mason_core::{expand_text, SHELL_VAR, WORKING_DIR_VAR};

use crate::{split_args, ProcessError};

/// Shell used when nothing better is available.
const FALLBACK_SHELL: &str = "/bin/sh";

/// Sentinel shell name requesting argv execution without a script file,
/// for minimal environments that ship no shell at all.
const DIRECT_SHELL: &str = "direct";

/// A materialized temp script, removed when dropped.
///
/// The session holds this for the lifetime of the child process so the
/// interpreter never loses the file from under itself.
#[derive(Debug)]
pub struct ScriptFile {
    inner: tempfile::NamedTempFile,
}

impl ScriptFile {
    pub fn path(&self) -> &Path {
        self.inner.path()
    }
}

/// Build the command for a batch of script lines.
///
/// Returns the configured command and, unless `direct` mode was selected,
/// the script file that must outlive the child.
pub(crate) fn build_command(
    lines: &[String],
    env: &HashMap<String, String>,
) -> Result<(tokio::process::Command, Option<ScriptFile>), ProcessError> {
    let shell = select_shell(env);

    let (mut command, script) = if shell == DIRECT_SHELL {
        (direct_command(lines, env)?, None)
    } else {
        let script = materialize_script(&shell, lines)?;
        let mut command = tokio::process::Command::new(&shell);
        command.arg(script.path());
        (command, Some(script))
    };

    apply_environment(&mut command, env, &shell);

    if let Some(working_dir) = env.get(WORKING_DIR_VAR) {
        let working_dir = PathBuf::from(working_dir);
        std::fs::create_dir_all(&working_dir)?;
        command.current_dir(working_dir);
    }

    // The child gets its own process group so a deadline kill can take the
    // whole tree down without touching the agent.
    #[cfg(unix)]
    command.process_group(0);

    Ok((command, script))
}

fn select_shell(env: &HashMap<String, String>) -> String {
    if let Some(custom) = env.get(SHELL_VAR) {
        return custom.clone();
    }
    find_in_path("bash").unwrap_or_else(|| FALLBACK_SHELL.to_string())
}

fn direct_command(
    lines: &[String],
    env: &HashMap<String, String>,
) -> Result<tokio::process::Command, ProcessError> {
    let line = lines.first().ok_or(ProcessError::EmptyDirectCommand)?;
    let argv = split_args(&expand_text(line, env))?;
    let (program, args) = argv.split_first().ok_or(ProcessError::EmptyDirectCommand)?;

    let mut command = tokio::process::Command::new(program);
    command.args(args);
    Ok(command)
}

fn materialize_script(shell: &str, lines: &[String]) -> Result<ScriptFile, ProcessError> {
    let mut file = tempfile::Builder::new()
        .prefix("scripts-")
        .suffix(".sh")
        .tempfile()
        .map_err(ProcessError::ScriptFile)?;

    writeln!(file, "#!{shell}").map_err(ProcessError::ScriptFile)?;
    writeln!(file, "set -e").map_err(ProcessError::ScriptFile)?;
    if shell.contains("bash") {
        writeln!(file, "set -o pipefail").map_err(ProcessError::ScriptFile)?;
    }
    writeln!(file, "set -o verbose").map_err(ProcessError::ScriptFile)?;
    for line in lines {
        writeln!(file, "{line}").map_err(ProcessError::ScriptFile)?;
    }
    file.flush().map_err(ProcessError::ScriptFile)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o777))
            .map_err(ProcessError::ScriptFile)?;
    }

    Ok(ScriptFile { inner: file })
}

fn apply_environment(
    command: &mut tokio::process::Command,
    env: &HashMap<String, String>,
    _shell: &str,
) {
    // Full host environment overlaid with the build environment.
    command.envs(env);

    // A custom shell should be what interactive tooling inside the script
    // sees as $SHELL, unless the task set SHELL itself.
    if let Some(custom) = env.get(SHELL_VAR) {
        if custom != DIRECT_SHELL && !env.contains_key("SHELL") && std::env::var_os("SHELL").is_none()
        {
            command.env("SHELL", custom);
        }
    }
}

fn find_in_path(program: &str) -> Option<String> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        let candidate = dir.join(program);
        if is_executable(&candidate) {
            return Some(candidate.display().to_string());
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
#[path = "script_tests.rs"]
mod tests;
