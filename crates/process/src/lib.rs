// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! mason-process: cross-platform process execution for build scripts.
//!
//! Script lines are concatenated into a generated shell script (or, in
//! `direct` mode, argv-split and executed without one), spawned in their
//! own process group, and supervised with deadline-based whole-tree
//! termination.

mod args;
mod error;
mod script;
mod session;

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub use args::split_args;
pub use error::ProcessError;
pub use script::ScriptFile;
pub use session::{OutputHandler, ProcessStatus, ShellSession};

/// Run script lines to completion, buffering all output in memory.
///
/// Used for short helper scripts such as cache fingerprints.
pub async fn run_and_capture(
    lines: &[String],
    env: &HashMap<String, String>,
    cancel: &CancellationToken,
) -> Result<(ProcessStatus, Vec<u8>), ProcessError> {
    let buffer = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let handler: OutputHandler = {
        let buffer = Arc::clone(&buffer);
        Arc::new(move |bytes: &[u8]| buffer.lock().extend_from_slice(bytes))
    };

    let mut session = ShellSession::spawn(lines, env, handler)?;
    let status = session.wait(cancel).await?;
    let output = std::mem::take(&mut *buffer.lock());
    Ok((status, output))
}
