// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-instruction log sink and its drainer task.

use std::io::{Read, Seek, Write};
use std::sync::Arc;

use mason_core::TaskIdentity;
use mason_wire::{ClientError, ControlPlane, LogStream};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// What a masked secret is replaced with before any byte leaves the agent.
pub const MASK_PLACEHOLDER: &str = "HIDDEN-BY-MASON";

/// Spill replay read buffer.
const REPLAY_CHUNK: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum LogStreamError {
    #[error("failed to open log stream: {0}")]
    Open(#[from] ClientError),

    #[error("failed to create log spill file: {0}")]
    Spill(#[source] std::io::Error),
}

/// Open → Closing → Closed. The sender is dropped on the Open → Closing
/// transition, which is what lets the drainer run dry and finish.
enum SinkState {
    Open(mpsc::UnboundedSender<Vec<u8>>),
    Closing,
    Closed,
}

struct SinkShared {
    command_name: String,
    state: RwLock<SinkState>,
    done: Mutex<Option<oneshot::Receiver<()>>>,
}

/// An append-only, ordered byte stream identified by
/// `(task identity, command name)`.
///
/// Cheap to clone; all clones feed the same channel.
#[derive(Clone)]
pub struct LogSink {
    shared: Arc<SinkShared>,
}

impl LogSink {
    /// Open the live stream and start the drainer.
    ///
    /// Failing to open the initial stream is an error the caller turns
    /// into a failed step; everything after this point is best-effort.
    pub async fn open(
        control: Arc<dyn ControlPlane>,
        task: TaskIdentity,
        command_name: &str,
        secrets: Vec<String>,
    ) -> Result<Self, LogStreamError> {
        let stream = control.open_log_stream(&task, command_name).await?;

        let spill = tempfile::Builder::new()
            .prefix(&format!("{command_name}-log-"))
            .tempfile()
            .map_err(LogStreamError::Spill)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();

        let drainer = Drainer {
            control,
            task,
            command_name: command_name.to_string(),
            secrets,
            stream,
            spill,
            rx,
        };
        tokio::spawn(drainer.run(done_tx));

        Ok(Self {
            shared: Arc::new(SinkShared {
                command_name: command_name.to_string(),
                state: RwLock::new(SinkState::Open(tx)),
                done: Mutex::new(Some(done_rx)),
            }),
        })
    }

    /// Enqueue bytes for delivery. Never blocks on network I/O; an empty
    /// write is a no-op and a write after finalize has begun is dropped.
    pub fn write(&self, bytes: &[u8]) -> usize {
        if bytes.is_empty() {
            return 0;
        }
        if let SinkState::Open(tx) = &*self.shared.state.read() {
            let _ = tx.send(bytes.to_vec());
        }
        bytes.len()
    }

    /// Convenience for coordinator progress messages.
    pub fn write_line(&self, message: &str) {
        self.write(format!("{message}\n").as_bytes());
    }

    /// An adapter matching the process subsystem's output-handler shape.
    pub fn handler(&self) -> Arc<dyn Fn(&[u8]) + Send + Sync> {
        let sink = self.clone();
        Arc::new(move |bytes: &[u8]| {
            sink.write(bytes);
        })
    }

    /// Block until every buffered byte is flushed, the live stream is
    /// closed, and the spill file has been replayed through the save call.
    /// Calling finalize twice is a no-op.
    pub async fn finalize(&self) {
        {
            let mut state = self.shared.state.write();
            match *state {
                SinkState::Open(_) => *state = SinkState::Closing,
                SinkState::Closing | SinkState::Closed => return,
            }
            // Dropping the sender (the old Open value) closes the channel.
        }

        let done = self.shared.done.lock().take();
        if let Some(done) = done {
            let _ = done.await;
        }

        *self.shared.state.write() = SinkState::Closed;
        tracing::debug!(command = %self.shared.command_name, "log sink finalized");
    }
}

struct Drainer {
    control: Arc<dyn ControlPlane>,
    task: TaskIdentity,
    command_name: String,
    secrets: Vec<String>,
    stream: Box<dyn LogStream>,
    spill: tempfile::NamedTempFile,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl Drainer {
    async fn run(mut self, done: oneshot::Sender<()>) {
        loop {
            // Block for the next chunk, then coalesce everything already
            // queued into one frame to keep stream overhead down.
            let Some(first) = self.rx.recv().await else {
                break;
            };
            let mut batch = first;
            while let Ok(next) = self.rx.try_recv() {
                batch.extend_from_slice(&next);
            }

            let masked = mask_secrets(batch, &self.secrets);

            if let Err(e) = self.spill.write_all(&masked) {
                tracing::warn!(command = %self.command_name, error = %e, "spill write failed");
            }

            self.deliver(&masked).await;
        }

        if let Err(e) = self.stream.close().await {
            tracing::debug!(command = %self.command_name, error = %e, "live stream close failed");
        }

        match self.replay_spill().await {
            Ok(()) => tracing::debug!(command = %self.command_name, "uploaded stored logs"),
            Err(e) => {
                tracing::warn!(command = %self.command_name, error = %e, "failed to upload stored logs");
            }
        }

        // Dropping the spill NamedTempFile removes it.
        let _ = done.send(());
    }

    /// Send one masked chunk, reopening the stream and resending once if
    /// the remote side dropped it. Chunks that still fail stay in the
    /// spill file and reach the server through the replay.
    async fn deliver(&mut self, chunk: &[u8]) {
        if self.stream.send(chunk).await.is_ok() {
            return;
        }

        tracing::debug!(command = %self.command_name, "live stream dropped, reopening");
        match self
            .control
            .open_log_stream(&self.task, &self.command_name)
            .await
        {
            Ok(stream) => {
                self.stream = stream;
                if let Err(e) = self.stream.send(chunk).await {
                    tracing::warn!(command = %self.command_name, error = %e, "resend after reopen failed");
                }
            }
            Err(e) => {
                tracing::warn!(command = %self.command_name, error = %e, "failed to reopen log stream");
            }
        }
    }

    async fn replay_spill(&mut self) -> Result<(), ClientError> {
        let mut save = self
            .control
            .open_log_save(&self.task, &self.command_name)
            .await?;

        let file = self.spill.as_file_mut();
        if let Err(e) = file.seek(std::io::SeekFrom::Start(0)) {
            tracing::warn!(command = %self.command_name, error = %e, "spill seek failed");
            return save.close().await;
        }

        let mut buffer = vec![0u8; REPLAY_CHUNK];
        loop {
            let n = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(command = %self.command_name, error = %e, "spill read failed");
                    break;
                }
            };
            save.send(&buffer[..n]).await?;
        }

        save.close().await
    }
}

/// Replace every occurrence of every secret with the placeholder.
fn mask_secrets(bytes: Vec<u8>, secrets: &[String]) -> Vec<u8> {
    let mut result = bytes;
    for secret in secrets {
        if secret.is_empty() {
            continue;
        }
        result = replace_all(&result, secret.as_bytes(), MASK_PLACEHOLDER.as_bytes());
    }
    result
}

fn replace_all(haystack: &[u8], needle: &[u8], replacement: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(haystack.len());
    let mut rest = haystack;
    while let Some(pos) = find(rest, needle) {
        result.extend_from_slice(&rest[..pos]);
        result.extend_from_slice(replacement);
        rest = &rest[pos + needle.len()..];
    }
    result.extend_from_slice(rest);
    result
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
#[path = "sink_tests.rs"]
mod tests;
