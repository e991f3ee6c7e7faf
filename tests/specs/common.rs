// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared harness for whole-build specs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mason_core::{ExecutionBehavior, Instruction, InstructionKind, TaskIdentity};
use mason_engine::{BuildConfig, BuildError, Executor, RetryConfig};
use mason_wire::fake::{FakeBlobStore, FakeControlPlane};
use mason_wire::InstructionsResponse;
use tokio_util::sync::CancellationToken;

pub const SERVER_SECRET: &str = "spec-server-secret";

pub struct SpecBuild {
    pub control: FakeControlPlane,
    pub blobs: FakeBlobStore,
    pub working_dir: PathBuf,
    _dir: tempfile::TempDir,
}

impl SpecBuild {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self::with_response(instructions, HashMap::new(), Vec::new())
    }

    pub fn with_response(
        instructions: Vec<Instruction>,
        mut environment: HashMap<String, String>,
        secrets_to_mask: Vec<String>,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let working_dir = dir.path().join("build");
        std::fs::create_dir_all(&working_dir).unwrap();
        environment.insert(
            "CIRRUS_WORKING_DIR".to_string(),
            working_dir.display().to_string(),
        );

        let control = FakeControlPlane::with_instructions(InstructionsResponse {
            instructions,
            environment,
            timeout_secs: 300,
            failed_at_least_once: false,
            secrets_to_mask,
            server_secret: SERVER_SECRET.to_string(),
        });

        Self {
            control,
            blobs: FakeBlobStore::new(),
            working_dir,
            _dir: dir,
        }
    }

    /// Share the blob store of an earlier build, as two attempts on the
    /// same cluster would.
    pub fn sharing_blobs(mut self, other: &SpecBuild) -> Self {
        self.blobs = other.blobs.clone();
        self
    }

    pub fn config(&self) -> BuildConfig {
        let mut config = BuildConfig::new(TaskIdentity::new(7, "client-token"), SERVER_SECRET);
        config.fetch_retry = RetryConfig::unlimited(Duration::from_millis(1));
        config.report_retry = RetryConfig::limited(2, Duration::from_millis(1));
        config
    }

    pub async fn run(&self) -> Result<(), BuildError> {
        self.run_with(self.config()).await
    }

    pub async fn run_with(&self, config: BuildConfig) -> Result<(), BuildError> {
        let executor = Executor::new(
            config,
            Arc::new(self.control.clone()),
            Arc::new(self.blobs.clone()),
        );
        executor.run_build(CancellationToken::new()).await
    }

    pub fn streamed(&self, command: &str) -> String {
        String::from_utf8_lossy(&self.control.streamed_log(command)).into_owned()
    }

    pub fn saved(&self, command: &str) -> String {
        String::from_utf8_lossy(&self.control.saved_log(command)).into_owned()
    }

    pub fn reported_names(&self) -> Vec<String> {
        self.control
            .step_reports()
            .iter()
            .map(|report| report.name.clone())
            .collect()
    }
}

pub fn script(name: &str, lines: &[&str]) -> Instruction {
    Instruction {
        name: name.to_string(),
        behavior: ExecutionBehavior::OnSuccess,
        kind: InstructionKind::RunScript {
            lines: lines.iter().map(|line| line.to_string()).collect(),
        },
    }
}

pub fn always(name: &str, lines: &[&str]) -> Instruction {
    Instruction {
        behavior: ExecutionBehavior::Always,
        ..script(name, lines)
    }
}

pub fn populate_cache(name: &str, folder: &str, populate_lines: &[&str]) -> Instruction {
    Instruction {
        name: name.to_string(),
        behavior: ExecutionBehavior::OnSuccess,
        kind: InstructionKind::PopulateCache {
            cache_name: name.to_string(),
            folder: folder.to_string(),
            fingerprint_lines: Vec::new(),
            populate_lines: populate_lines.iter().map(|line| line.to_string()).collect(),
            reupload_on_changes: false,
        },
    }
}

pub fn upload_cache(name: &str, cache_name: &str) -> Instruction {
    Instruction {
        name: name.to_string(),
        behavior: ExecutionBehavior::Always,
        kind: InstructionKind::UploadCache {
            cache_name: cache_name.to_string(),
        },
    }
}
