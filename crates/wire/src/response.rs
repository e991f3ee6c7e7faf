// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

use super::InstructionsResponse;

/// Control-plane-to-agent response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Generic success.
    Ok,

    /// Instruction list for this attempt.
    Instructions { payload: Box<InstructionsResponse> },

    /// Cache blob found; raw byte frames follow.
    CacheHit,

    /// Cache blob absent.
    CacheMiss,

    /// Probe result.
    CacheExists { present: bool },

    /// The request was rejected.
    Error { message: String },
}

#[cfg(test)]
#[path = "response_tests.rs"]
mod tests;
