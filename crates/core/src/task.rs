// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task identity: the credentials authenticating one build attempt.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The (task id, secret token) pair presented to the control plane on
/// every call for one build attempt.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskIdentity {
    pub task_id: i64,
    pub secret: String,
}

impl TaskIdentity {
    pub fn new(task_id: i64, secret: impl Into<String>) -> Self {
        Self {
            task_id,
            secret: secret.into(),
        }
    }
}

// The secret must never reach logs.
impl fmt::Debug for TaskIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskIdentity")
            .field("task_id", &self.task_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl fmt::Display for TaskIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {}", self.task_id)
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
