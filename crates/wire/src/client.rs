// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The narrow contract the engine has with the control plane.

use async_trait::async_trait;
use mason_core::{StepOutcome, TaskIdentity};
use thiserror::Error;

use super::{CacheAttempt, InstructionsResponse, ProtocolError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("rejected by control plane: {message}")]
    Rejected { message: String },

    #[error("log stream closed by the remote side")]
    StreamClosed,
}

/// Unary control-plane calls plus log stream construction.
///
/// Implementations must be safe to call from multiple tasks; every method
/// is one self-contained exchange.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn fetch_instructions(
        &self,
        task: &TaskIdentity,
        resume_from: &str,
        is_retry: bool,
    ) -> Result<InstructionsResponse, ClientError>;

    async fn report_step(
        &self,
        task: &TaskIdentity,
        outcome: &StepOutcome,
    ) -> Result<(), ClientError>;

    async fn report_finished(
        &self,
        task: &TaskIdentity,
        outcomes: &[StepOutcome],
        cache_attempts: &[CacheAttempt],
    ) -> Result<(), ClientError>;

    /// Best-effort diagnostic; implementations should not retry.
    async fn report_warning(&self, task: &TaskIdentity, message: &str) -> Result<(), ClientError>;

    /// Open the live log channel for `(task, command_name)`.
    async fn open_log_stream(
        &self,
        task: &TaskIdentity,
        command_name: &str,
    ) -> Result<Box<dyn LogStream>, ClientError>;

    /// Open the one-shot snapshot channel used as the durability backstop.
    async fn open_log_save(
        &self,
        task: &TaskIdentity,
        command_name: &str,
    ) -> Result<Box<dyn LogStream>, ClientError>;

    /// Upload a single artifact file.
    async fn upload_artifact(
        &self,
        task: &TaskIdentity,
        artifact_name: &str,
        relative_path: &str,
        data: &[u8],
    ) -> Result<(), ClientError>;
}

/// An ordered byte-chunk channel to the control plane.
#[async_trait]
pub trait LogStream: Send {
    async fn send(&mut self, chunk: &[u8]) -> Result<(), ClientError>;

    /// Terminate the stream and wait for the server acknowledgement.
    async fn close(&mut self) -> Result<(), ClientError>;
}
