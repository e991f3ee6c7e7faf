// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-instruction execution results.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Outcome of one dispatched instruction.
///
/// Created at step start, finalized at step end, reported immediately and
/// then discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub success: bool,
    /// True when the underlying process was terminated by a signal.
    /// A deadline kill is reported as `TimedOut`, not as signaled.
    pub signaled_to_exit: bool,
    pub duration: Duration,
}

impl StepResult {
    pub fn failed(duration: Duration) -> Self {
        Self {
            success: false,
            signaled_to_exit: false,
            duration,
        }
    }
}

/// A named step result, collected for the final aggregate report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub name: String,
    pub success: bool,
    pub duration_secs: u64,
    pub signaled_to_exit: bool,
}

impl StepOutcome {
    pub fn new(name: &str, result: &StepResult) -> Self {
        Self {
            name: name.to_string(),
            success: result.success,
            duration_secs: result.duration.as_secs(),
            signaled_to_exit: result.signaled_to_exit,
        }
    }
}
