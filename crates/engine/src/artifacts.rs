// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `UploadArtifacts` instruction.
//!
//! Paths are glob-expanded underneath the working directory and each
//! matching file is streamed to the control plane. Archive paths stay
//! relative, so anything resolving outside the working directory is a
//! validation failure.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use mason_core::{expand_text, TaskIdentity, WORKING_DIR_VAR};
use mason_logstream::LogSink;
use mason_wire::ControlPlane;

pub(crate) async fn upload_artifacts(
    control: &Arc<dyn ControlPlane>,
    task: &TaskIdentity,
    artifact_name: &str,
    patterns: &[String],
    env: &HashMap<String, String>,
    sink: &LogSink,
) -> bool {
    let working_dir = env.get(WORKING_DIR_VAR).cloned().unwrap_or_default();
    let working_dir = Path::new(&working_dir);

    let mut uploaded = 0usize;
    for pattern in patterns {
        let expanded = expand_text(pattern, env);
        let absolute = if Path::new(&expanded).is_absolute() {
            expanded.clone()
        } else {
            working_dir.join(&expanded).display().to_string()
        };

        let paths = match glob::glob(&absolute) {
            Ok(paths) => paths,
            Err(e) => {
                sink.write_line(&format!("Failed to list artifacts {pattern}: {e}!"));
                return false;
            }
        };

        for path in paths.flatten() {
            if !path.is_file() {
                continue;
            }

            let Ok(relative) = path.strip_prefix(working_dir) else {
                sink.write_line(&format!(
                    "Artifact {} is outside of the working directory {}!",
                    path.display(),
                    working_dir.display()
                ));
                return false;
            };

            let data = match tokio::fs::read(&path).await {
                Ok(data) => data,
                Err(e) => {
                    sink.write_line(&format!("Failed to read artifact {}: {e}!", path.display()));
                    return false;
                }
            };

            let relative = relative.to_string_lossy();
            if let Err(e) = control
                .upload_artifact(task, artifact_name, &relative, &data)
                .await
            {
                sink.write_line(&format!("Failed to upload artifact {relative}: {e}!"));
                return false;
            }
            uploaded += 1;
        }
    }

    sink.write_line(&format!("Uploaded {uploaded} artifact files for {artifact_name}."));
    true
}
