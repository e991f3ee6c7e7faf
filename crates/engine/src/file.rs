// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `CreateFile` instruction: materialize a file from an environment
//! variable.

use std::collections::HashMap;
use std::path::Path;

use mason_core::{expand_text, ENCRYPTED_PREFIX};
use mason_logstream::LogSink;

/// Write the value of `from_env_var` to `destination_path`.
///
/// A missing variable or one that was never decrypted skips the write but
/// still counts as success: the task asked for a file the server chose
/// not to provide.
pub(crate) fn create_file(
    sink: &LogSink,
    destination_path: &str,
    from_env_var: &str,
    env: &HashMap<String, String>,
) -> bool {
    let Some(content) = env.get(from_env_var) else {
        sink.write_line(&format!(
            "Environment variable {from_env_var} is not set! Skipping file creation..."
        ));
        return true;
    };

    if content.starts_with(ENCRYPTED_PREFIX) {
        sink.write_line(&format!(
            "Environment variable {from_env_var} wasn't decrypted! Skipping file creation..."
        ));
        return true;
    }

    let file_path = expand_text(destination_path, env);
    if let Some(parent) = Path::new(&file_path).parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            sink.write_line(&format!("Failed to create directory for {file_path}: {e}!"));
            return false;
        }
    }

    match std::fs::write(&file_path, content) {
        Ok(()) => {
            sink.write_line(&format!("Created file {file_path}!"));
            true
        }
        Err(e) => {
            sink.write_line(&format!("Failed to write file {file_path}: {e}!"));
            false
        }
    }
}
