// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use mason_core::{StepOutcome, TaskIdentity};
use serde::{Deserialize, Serialize};

use super::CacheAttempt;

/// Agent-to-control-plane request.
///
/// `OpenLogStream`, `SaveLogs`, `CachePut` and `UploadArtifact` are
/// followed by raw byte frames on the same connection, terminated by an
/// empty frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Fetch the instruction list for this attempt.
    FetchInstructions {
        task: TaskIdentity,
        /// Name of the instruction execution resumes from, if any.
        #[serde(default)]
        resume_from: String,
        local_timestamp: i64,
        /// True on any retry of this call, for server-side bookkeeping.
        #[serde(default)]
        is_retry: bool,
    },

    /// Report one finished step.
    ReportStep {
        task: TaskIdentity,
        outcome: StepOutcome,
        local_timestamp: i64,
    },

    /// Report that the agent is done with the build.
    ReportFinished {
        task: TaskIdentity,
        outcomes: Vec<StepOutcome>,
        cache_attempts: Vec<CacheAttempt>,
    },

    /// Best-effort diagnostic for the control plane.
    ReportWarning { task: TaskIdentity, message: String },

    /// Open a live log stream for a command.
    OpenLogStream {
        task: TaskIdentity,
        command_name: String,
    },

    /// Open a one-shot log snapshot upload for a command.
    SaveLogs {
        task: TaskIdentity,
        command_name: String,
    },

    /// Upload one artifact file.
    UploadArtifact {
        task: TaskIdentity,
        artifact_name: String,
        /// Path relative to the working directory.
        path: String,
    },

    /// Fetch a cache blob by key.
    CacheGet { key: String },

    /// Publish a cache blob under a key.
    CachePut { key: String },

    /// Ask whether a cache blob exists.
    CacheProbe { key: String },
}
