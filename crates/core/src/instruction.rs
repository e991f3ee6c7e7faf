// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Build instructions and execution-behavior gating.

use serde::{Deserialize, Serialize};

/// When an instruction runs relative to earlier failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionBehavior {
    /// Run unless a prior instruction failed (the default).
    #[default]
    OnSuccess,
    /// Run only after a prior instruction failed.
    OnFailure,
    /// Run regardless of prior failures.
    Always,
}

/// One build step, as received from the control plane.
///
/// Instructions arrive as an ordered, immutable sequence per build attempt.
/// Names are unique within a sequence and are used for log correlation and
/// for range-bounded replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub name: String,
    #[serde(default)]
    pub behavior: ExecutionBehavior,
    pub kind: InstructionKind,
}

/// The payload of an instruction.
///
/// A closed sum: the coordinator matches exhaustively and treats anything
/// it cannot dispatch as a failed step, never a crash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstructionKind {
    /// Terminate execution without running further instructions.
    Exit,

    /// Check out the repository into the working directory.
    Clone,

    /// Materialize a file from an environment variable value.
    CreateFile {
        destination_path: String,
        from_env_var: String,
    },

    /// Run script lines to completion, blocking the coordinator.
    RunScript { lines: Vec<String> },

    /// Spawn script lines and leave them running until build end.
    RunBackgroundScript { lines: Vec<String> },

    /// Fingerprint a cache, restore it from the blob store or populate it.
    PopulateCache {
        cache_name: String,
        folder: String,
        #[serde(default)]
        fingerprint_lines: Vec<String>,
        #[serde(default)]
        populate_lines: Vec<String>,
        #[serde(default)]
        reupload_on_changes: bool,
    },

    /// Upload a previously populated cache if it changed.
    UploadCache { cache_name: String },

    /// Upload build artifacts matching the given paths.
    UploadArtifacts {
        artifact_name: String,
        paths: Vec<String>,
    },

    /// Anything this agent version does not understand. Dispatching it
    /// fails the step, not the process, so newer control planes can ship
    /// instructions older agents skip past.
    #[serde(other)]
    Unknown,
}

/// Skip semantics: whether an instruction should run given the running
/// `failed_at_least_once` flag.
pub fn should_run(behavior: ExecutionBehavior, failed_at_least_once: bool) -> bool {
    match behavior {
        ExecutionBehavior::OnSuccess => !failed_at_least_once,
        ExecutionBehavior::OnFailure => failed_at_least_once,
        ExecutionBehavior::Always => true,
    }
}

/// Bound a slice of uniquely named instructions to the half-open range
/// `[index(from), index(to))`.
///
/// An empty or unresolved name leaves the corresponding bound at the full
/// range. This is what lets a resumed attempt continue from a named
/// instruction without re-running completed steps.
pub fn bounded<'a>(instructions: &'a [Instruction], from: &str, to: &str) -> &'a [Instruction] {
    let mut left = 0;
    let mut right = instructions.len();

    for (i, instruction) in instructions.iter().enumerate() {
        if !from.is_empty() && instruction.name == from {
            left = i;
        }
        if !to.is_empty() && instruction.name == to {
            right = i;
        }
    }

    // A `to` that resolves before `from` yields an empty range.
    if left > right {
        right = left;
    }

    &instructions[left..right]
}

#[cfg(test)]
#[path = "instruction_tests.rs"]
mod tests;
