// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The build coordinator: one `run_build` per agent process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mason_cache::{CacheRegistry, PopulateRequest};
use mason_core::{
    bounded, expand_recursively, merge, should_run, with_host_defaults, EnvFile, Instruction,
    InstructionKind, StepOutcome, StepResult, TaskIdentity, WorkingDirConfig, ENV_FILE_VAR,
    WORKING_DIR_VAR,
};
use mason_logstream::LogSink;
use mason_process::{ProcessError, ShellSession};
use mason_wire::{BlobStore, ControlPlane};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::background::BackgroundTask;
use crate::retry::{retry, RetryConfig, RetryError};
use crate::{artifacts, clone, file};

/// Per-build configuration handed to the agent on the command line.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub task: TaskIdentity,
    /// Shared secret the server must echo back; a mismatch means the
    /// instruction list was meant for a different task instance.
    pub server_secret: String,
    /// Resume execution from this instruction name (inclusive), if set.
    pub command_from: String,
    /// Stop execution at this instruction name (exclusive), if set.
    pub command_to: String,
    /// Working directory prepared by a persistent worker, if any.
    pub pre_created_working_dir: Option<String>,
    pub fetch_retry: RetryConfig,
    pub report_retry: RetryConfig,
}

impl BuildConfig {
    pub fn new(task: TaskIdentity, server_secret: impl Into<String>) -> Self {
        Self {
            task,
            server_secret: server_secret.into(),
            command_from: String::new(),
            command_to: String::new(),
            pre_created_working_dir: None,
            fetch_retry: RetryConfig::unlimited(Duration::from_secs(5)),
            report_retry: RetryConfig::limited(2, Duration::from_secs(10)),
        }
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    /// Fatal: the response was intended for a different task instance.
    #[error("server secret mismatch")]
    ServerSecretMismatch,

    /// The build was cancelled before instructions could be fetched.
    #[error("cancelled before instructions were fetched")]
    Cancelled,

    /// The fetch retry budget ran out (only with a bounded fetch config).
    #[error("could not fetch instructions")]
    InstructionsUnavailable,
}

/// Drives one build attempt. Owns the execution environment, the cache
/// registry and the background-task set for the build's lifetime.
pub struct Executor {
    config: BuildConfig,
    control: Arc<dyn ControlPlane>,
    blobs: Arc<dyn BlobStore>,
    env: HashMap<String, String>,
    secrets: Vec<String>,
    background: Vec<BackgroundTask>,
    caches: CacheRegistry,
    outcomes: Vec<StepOutcome>,
}

enum StepFlow {
    Continue(StepResult),
    /// An `Exit` instruction: unwind without reporting a result for it.
    Exit,
}

impl Executor {
    pub fn new(
        config: BuildConfig,
        control: Arc<dyn ControlPlane>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            config,
            control,
            blobs,
            env: HashMap::new(),
            secrets: Vec::new(),
            background: Vec::new(),
            caches: CacheRegistry::new(),
            outcomes: Vec::new(),
        }
    }

    /// Run the build to completion. Blocks for the build's lifetime.
    pub async fn run_build(mut self, cancel: CancellationToken) -> Result<(), BuildError> {
        tracing::info!(task = %self.config.task, "getting initial instructions");

        let response = {
            let control = Arc::clone(&self.control);
            let task = self.config.task.clone();
            let resume_from = self.config.command_from.clone();
            match retry(&self.config.fetch_retry, &cancel, |attempt| {
                let control = Arc::clone(&control);
                let task = task.clone();
                let resume_from = resume_from.clone();
                async move {
                    control
                        .fetch_instructions(&task, &resume_from, attempt > 0)
                        .await
                        .map_err(|e| {
                            tracing::warn!(error = %e, "failed to get initial instructions");
                            e
                        })
                }
            })
            .await
            {
                Ok(response) => response,
                Err(RetryError::Cancelled) => return Err(BuildError::Cancelled),
                Err(RetryError::Exhausted(_)) => return Err(BuildError::InstructionsUnavailable),
            }
        };

        if response.server_secret != self.config.server_secret {
            let _ = self
                .control
                .report_warning(
                    &self.config.task,
                    "Server secret mismatch: refusing instruction list meant for another task!",
                )
                .await;
            return Err(BuildError::ServerSecretMismatch);
        }

        self.env = with_host_defaults(
            response.environment.clone(),
            &WorkingDirConfig {
                task_id: self.config.task.task_id,
                resuming: !self.config.command_from.is_empty(),
                pre_created_dir: self.config.pre_created_working_dir.as_deref(),
            },
        );
        self.secrets = response.secrets_to_mask.clone();

        if let Some(working_dir) = self.env.get(WORKING_DIR_VAR) {
            if let Err(e) = std::fs::create_dir_all(working_dir) {
                tracing::warn!(dir = %working_dir, error = %e, "failed to create working directory");
            }
            if let Err(e) = std::env::set_current_dir(working_dir) {
                tracing::warn!(dir = %working_dir, error = %e, "failed to change working directory");
            }
        }

        // Everything below runs under the server-supplied budget deadline.
        let build_cancel = cancel.child_token();
        let deadline_guard = tokio::spawn({
            let deadline_cancel = build_cancel.clone();
            let budget = Duration::from_secs(response.timeout_secs);
            async move {
                tokio::time::sleep(budget).await;
                tracing::warn!("build deadline elapsed");
                deadline_cancel.cancel();
            }
        });

        let instructions = bounded(
            &response.instructions,
            &self.config.command_from,
            &self.config.command_to,
        )
        .to_vec();

        let mut failed_at_least_once = response.failed_at_least_once;

        for instruction in &instructions {
            if !should_run(instruction.behavior, failed_at_least_once) {
                tracing::debug!(name = %instruction.name, "skipping instruction");
                continue;
            }

            tracing::info!(name = %instruction.name, "executing instruction");
            let result = match self.perform_step(&build_cancel, instruction).await {
                StepFlow::Continue(result) => result,
                StepFlow::Exit => break,
            };

            if !result.success {
                failed_at_least_once = true;
            }
            tracing::info!(
                name = %instruction.name,
                success = result.success,
                duration_ms = result.duration.as_millis() as u64,
                "instruction finished"
            );

            let outcome = StepOutcome::new(&instruction.name, &result);
            self.outcomes.push(outcome.clone());
            self.report_step(&cancel, outcome).await;
        }

        tracing::info!(
            count = self.background.len(),
            "background commands to clean up"
        );
        for task in std::mem::take(&mut self.background) {
            task.drain().await;
        }

        self.report_finished(&cancel).await;
        deadline_guard.abort();
        Ok(())
    }

    /// Report one step result with bounded retries; a lost report never
    /// aborts the build.
    async fn report_step(&self, cancel: &CancellationToken, outcome: StepOutcome) {
        let control = Arc::clone(&self.control);
        let task = self.config.task.clone();
        let result = retry(&self.config.report_retry, cancel, |_| {
            let control = Arc::clone(&control);
            let task = task.clone();
            let outcome = outcome.clone();
            async move { control.report_step(&task, &outcome).await }
        })
        .await;

        if result.is_err() {
            tracing::warn!(name = %outcome.name, "failed to report step result");
        }
    }

    async fn report_finished(&self, cancel: &CancellationToken) {
        let control = Arc::clone(&self.control);
        let task = self.config.task.clone();
        let outcomes = self.outcomes.clone();
        let attempts = self.caches.attempts();
        let result = retry(&self.config.report_retry, cancel, |_| {
            let control = Arc::clone(&control);
            let task = task.clone();
            let outcomes = outcomes.clone();
            let attempts = attempts.clone();
            async move {
                control
                    .report_finished(&task, &outcomes, &attempts)
                    .await
            }
        })
        .await;

        if result.is_err() {
            tracing::warn!("failed to report that the agent has finished");
        }
    }

    async fn perform_step(
        &mut self,
        cancel: &CancellationToken,
        instruction: &Instruction,
    ) -> StepFlow {
        let start = Instant::now();

        let sink = match LogSink::open(
            Arc::clone(&self.control),
            self.config.task.clone(),
            &instruction.name,
            self.secrets.clone(),
        )
        .await
        {
            Ok(sink) => sink,
            Err(e) => {
                let message = format!(
                    "Failed to initialize command {} log upload: {e}",
                    instruction.name
                );
                tracing::error!("{message}");
                let _ = self.control.report_warning(&self.config.task, &message).await;
                return StepFlow::Continue(StepResult::failed(start.elapsed()));
            }
        };

        let env_file = match EnvFile::create() {
            Ok(env_file) => env_file,
            Err(e) => {
                sink.write_line(&format!("Failed to initialize env side-channel file: {e}"));
                sink.finalize().await;
                return StepFlow::Continue(StepResult::failed(start.elapsed()));
            }
        };
        self.env.insert(
            ENV_FILE_VAR.to_string(),
            env_file.path().display().to_string(),
        );

        let mut signaled_to_exit = false;
        let mut registered_background = false;

        let mut success = match &instruction.kind {
            InstructionKind::Exit => {
                sink.finalize().await;
                return StepFlow::Exit;
            }

            InstructionKind::Clone => clone::clone_repository(cancel, &sink, &self.env).await,

            InstructionKind::CreateFile {
                destination_path,
                from_env_var,
            } => file::create_file(&sink, destination_path, from_env_var, &self.env),

            InstructionKind::RunScript { lines } => {
                match ShellSession::spawn(lines, &self.env, sink.handler()) {
                    Ok(mut session) => match session.wait(cancel).await {
                        Ok(status) => {
                            signaled_to_exit = status.signaled();
                            status.success()
                        }
                        // A deadline kill is not a signal exit for
                        // reporting purposes.
                        Err(ProcessError::TimedOut) => false,
                        Err(e) => {
                            sink.write_line(&format!("Shell session error: {e}"));
                            false
                        }
                    },
                    Err(_) => false,
                }
            }

            InstructionKind::RunBackgroundScript { lines } => {
                match ShellSession::spawn(lines, &self.env, sink.handler()) {
                    Ok(session) => {
                        self.background.push(BackgroundTask {
                            name: instruction.name.clone(),
                            session,
                            sink: sink.clone(),
                        });
                        registered_background = true;
                        tracing::info!(
                            count = self.background.len(),
                            name = %instruction.name,
                            "started background command"
                        );
                        true
                    }
                    Err(e) => {
                        sink.write_line(&format!("Failed to create command line: {e}"));
                        false
                    }
                }
            }

            InstructionKind::PopulateCache {
                cache_name,
                folder,
                fingerprint_lines,
                populate_lines,
                reupload_on_changes,
            } => {
                let request = PopulateRequest {
                    cache_name,
                    folder,
                    fingerprint_lines,
                    populate_lines,
                    reupload_on_changes: *reupload_on_changes,
                };
                match self
                    .caches
                    .populate(self.blobs.as_ref(), request, &self.env, &sink.handler(), cancel)
                    .await
                {
                    Ok(()) => true,
                    Err(e) => {
                        sink.write_line(&format!("{e}"));
                        false
                    }
                }
            }

            InstructionKind::UploadCache { cache_name } => {
                match self
                    .caches
                    .upload(self.blobs.as_ref(), cache_name, &sink.handler())
                    .await
                {
                    Ok(()) => true,
                    Err(e) => {
                        sink.write_line(&format!("{e}"));
                        false
                    }
                }
            }

            InstructionKind::UploadArtifacts {
                artifact_name,
                paths,
            } => {
                artifacts::upload_artifacts(
                    &self.control,
                    &self.config.task,
                    artifact_name,
                    paths,
                    &self.env,
                    &sink,
                )
                .await
            }

            InstructionKind::Unknown => {
                sink.write_line("Unsupported instruction!");
                tracing::warn!(name = %instruction.name, "unsupported instruction");
                false
            }
        };

        // Accommodate variables the step handed to later steps through the
        // side-channel file, then re-expand since they may be unexpanded.
        match env_file.consume() {
            Ok(vars) if !vars.is_empty() => {
                self.env = merge(&[&self.env, &vars]);
                self.env = expand_recursively(&self.env);
            }
            Ok(_) => {}
            Err(e) => {
                sink.write_line(&format!("Failed to collect env side-channel results: {e}"));
                success = false;
            }
        }

        if !registered_background {
            sink.finalize().await;
        }

        StepFlow::Continue(StepResult {
            success,
            signaled_to_exit,
            duration: start.elapsed(),
        })
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
