// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

/// Errors from spawning and supervising build script processes.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to create script file: {0}")]
    ScriptFile(#[source] std::io::Error),

    #[error("failed to start command: {0}")]
    Spawn(#[source] std::io::Error),

    /// The execution deadline elapsed and the process tree was killed.
    /// Distinct from a process that exited on a signal of its own accord.
    #[error("timed out")]
    TimedOut,

    #[error("direct instruction line is empty")]
    EmptyDirectCommand,

    #[error("unterminated quote in direct instruction line")]
    UnterminatedQuote,

    #[error("process-tree control is unsupported on this platform")]
    Unsupported,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
