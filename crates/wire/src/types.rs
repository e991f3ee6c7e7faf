// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;

use mason_core::Instruction;
use serde::{Deserialize, Serialize};

/// Everything the control plane hands the agent for one build attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstructionsResponse {
    pub instructions: Vec<Instruction>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    pub timeout_secs: u64,
    #[serde(default)]
    pub failed_at_least_once: bool,
    #[serde(default)]
    pub secrets_to_mask: Vec<String>,
    /// Shared secret proving the response targets this task instance.
    pub server_secret: String,
}

/// One cache retrieval attempt, reported with the final aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheAttempt {
    pub name: String,
    pub hit: bool,
    /// True when a populate script had to rebuild the content.
    pub populated: bool,
    pub duration_ms: u64,
    pub size_bytes: u64,
}
