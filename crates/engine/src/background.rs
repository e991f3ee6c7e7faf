// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bookkeeping for background script instructions.

use mason_logstream::LogSink;
use mason_process::ShellSession;

/// A `RunBackgroundScript` instruction that returned before completion.
///
/// The coordinator owns the set; after the last foreground instruction
/// every entry is force-killed and its log sink finalized, success or not.
pub(crate) struct BackgroundTask {
    pub(crate) name: String,
    pub(crate) session: ShellSession,
    pub(crate) sink: LogSink,
}

impl BackgroundTask {
    /// Kill the process tree and flush the logs. Kill failures are noted
    /// in the log but never abort the build.
    pub(crate) async fn drain(mut self) {
        tracing::info!(name = %self.name, "cleaning up background command");
        if let Err(e) = self.session.kill().await {
            self.sink
                .write_line(&format!("Failed to stop background script {}: {e}!", self.name));
        }
        self.sink.finalize().await;
    }
}
