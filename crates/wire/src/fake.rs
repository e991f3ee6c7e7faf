// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory fakes for the control-plane and blob-store seams.
//!
//! Used by this crate's tests and, behind the `test-support` feature, by
//! downstream crates. Failures are programmable so reconnect and retry
//! paths can be driven deterministically.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use mason_core::{StepOutcome, TaskIdentity};
use parking_lot::Mutex;

use crate::{
    BlobError, BlobStore, CacheAttempt, ClientError, ControlPlane, InstructionsResponse, LogStream,
};

/// One artifact file captured by [`FakeControlPlane`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeArtifact {
    pub artifact_name: String,
    pub path: String,
    pub data: Vec<u8>,
}

#[derive(Default)]
struct ControlPlaneState {
    instructions: InstructionsResponse,
    fetch_calls: u32,
    fetch_failures_remaining: u32,
    step_reports: Vec<StepOutcome>,
    step_report_failures_remaining: u32,
    finished_reports: Vec<(Vec<StepOutcome>, Vec<CacheAttempt>)>,
    finished_failures_remaining: u32,
    warnings: Vec<String>,
    streamed: HashMap<String, Vec<u8>>,
    saved: HashMap<String, Vec<u8>>,
    artifacts: Vec<FakeArtifact>,
    live_send_failures_remaining: u32,
    opened_streams: u32,
}

/// Scripted control plane backed by in-memory state.
#[derive(Clone, Default)]
pub struct FakeControlPlane {
    state: Arc<Mutex<ControlPlaneState>>,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instructions(response: InstructionsResponse) -> Self {
        let fake = Self::default();
        fake.state.lock().instructions = response;
        fake
    }

    /// Fail the next `n` fetch_instructions calls before succeeding.
    pub fn fail_next_fetches(&self, n: u32) {
        self.state.lock().fetch_failures_remaining = n;
    }

    /// Fail the next `n` report_step calls.
    pub fn fail_next_step_reports(&self, n: u32) {
        self.state.lock().step_report_failures_remaining = n;
    }

    /// Fail the next `n` report_finished calls.
    pub fn fail_next_finished_reports(&self, n: u32) {
        self.state.lock().finished_failures_remaining = n;
    }

    /// Fail the next `n` sends across all live log streams.
    pub fn fail_next_live_sends(&self, n: u32) {
        self.state.lock().live_send_failures_remaining = n;
    }

    pub fn fetch_calls(&self) -> u32 {
        self.state.lock().fetch_calls
    }

    pub fn step_reports(&self) -> Vec<StepOutcome> {
        self.state.lock().step_reports.clone()
    }

    pub fn finished_reports(&self) -> Vec<(Vec<StepOutcome>, Vec<CacheAttempt>)> {
        self.state.lock().finished_reports.clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.state.lock().warnings.clone()
    }

    /// Bytes delivered over live streams for a command, across reconnects.
    pub fn streamed_log(&self, command_name: &str) -> Vec<u8> {
        self.state
            .lock()
            .streamed
            .get(command_name)
            .cloned()
            .unwrap_or_default()
    }

    /// Bytes delivered through the snapshot save call for a command.
    pub fn saved_log(&self, command_name: &str) -> Vec<u8> {
        self.state
            .lock()
            .saved
            .get(command_name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn artifacts(&self) -> Vec<FakeArtifact> {
        self.state.lock().artifacts.clone()
    }

    pub fn opened_streams(&self) -> u32 {
        self.state.lock().opened_streams
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn fetch_instructions(
        &self,
        _task: &TaskIdentity,
        _resume_from: &str,
        _is_retry: bool,
    ) -> Result<InstructionsResponse, ClientError> {
        let mut state = self.state.lock();
        state.fetch_calls += 1;
        if state.fetch_failures_remaining > 0 {
            state.fetch_failures_remaining -= 1;
            return Err(ClientError::StreamClosed);
        }
        Ok(state.instructions.clone())
    }

    async fn report_step(
        &self,
        _task: &TaskIdentity,
        outcome: &StepOutcome,
    ) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        if state.step_report_failures_remaining > 0 {
            state.step_report_failures_remaining -= 1;
            return Err(ClientError::StreamClosed);
        }
        state.step_reports.push(outcome.clone());
        Ok(())
    }

    async fn report_finished(
        &self,
        _task: &TaskIdentity,
        outcomes: &[StepOutcome],
        cache_attempts: &[CacheAttempt],
    ) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        if state.finished_failures_remaining > 0 {
            state.finished_failures_remaining -= 1;
            return Err(ClientError::StreamClosed);
        }
        state
            .finished_reports
            .push((outcomes.to_vec(), cache_attempts.to_vec()));
        Ok(())
    }

    async fn report_warning(&self, _task: &TaskIdentity, message: &str) -> Result<(), ClientError> {
        self.state.lock().warnings.push(message.to_string());
        Ok(())
    }

    async fn open_log_stream(
        &self,
        _task: &TaskIdentity,
        command_name: &str,
    ) -> Result<Box<dyn LogStream>, ClientError> {
        self.state.lock().opened_streams += 1;
        Ok(Box::new(FakeLogStream {
            state: Arc::clone(&self.state),
            command_name: command_name.to_string(),
            live: true,
        }))
    }

    async fn open_log_save(
        &self,
        _task: &TaskIdentity,
        command_name: &str,
    ) -> Result<Box<dyn LogStream>, ClientError> {
        Ok(Box::new(FakeLogStream {
            state: Arc::clone(&self.state),
            command_name: command_name.to_string(),
            live: false,
        }))
    }

    async fn upload_artifact(
        &self,
        _task: &TaskIdentity,
        artifact_name: &str,
        relative_path: &str,
        data: &[u8],
    ) -> Result<(), ClientError> {
        self.state.lock().artifacts.push(FakeArtifact {
            artifact_name: artifact_name.to_string(),
            path: relative_path.to_string(),
            data: data.to_vec(),
        });
        Ok(())
    }
}

struct FakeLogStream {
    state: Arc<Mutex<ControlPlaneState>>,
    command_name: String,
    live: bool,
}

#[async_trait]
impl LogStream for FakeLogStream {
    async fn send(&mut self, chunk: &[u8]) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        if self.live && state.live_send_failures_remaining > 0 {
            state.live_send_failures_remaining -= 1;
            return Err(ClientError::StreamClosed);
        }
        let sink = if self.live {
            state.streamed.entry(self.command_name.clone())
        } else {
            state.saved.entry(self.command_name.clone())
        };
        sink.or_default().extend_from_slice(chunk);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        Ok(())
    }
}

#[derive(Default)]
struct BlobState {
    blobs: HashMap<String, Vec<u8>>,
    timeout_keys: HashSet<String>,
    corrupt_reads_remaining: HashMap<String, u32>,
    get_keys: Vec<String>,
    put_keys: Vec<String>,
    exists_keys: Vec<String>,
}

/// In-memory blob store with programmable timeouts and corruption.
#[derive(Clone, Default)]
pub struct FakeBlobStore {
    state: Arc<Mutex<BlobState>>,
}

impl FakeBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, data: Vec<u8>) {
        self.state.lock().blobs.insert(key.to_string(), data);
    }

    /// Make every operation on `key` time out.
    pub fn time_out(&self, key: &str) {
        self.state.lock().timeout_keys.insert(key.to_string());
    }

    /// Serve garbage for the next `n` reads of `key`.
    pub fn corrupt_next_reads(&self, key: &str, n: u32) {
        self.state
            .lock()
            .corrupt_reads_remaining
            .insert(key.to_string(), n);
    }

    pub fn contents(&self, key: &str) -> Option<Vec<u8>> {
        self.state.lock().blobs.get(key).cloned()
    }

    pub fn get_keys(&self) -> Vec<String> {
        self.state.lock().get_keys.clone()
    }

    pub fn put_keys(&self) -> Vec<String> {
        self.state.lock().put_keys.clone()
    }

    pub fn exists_keys(&self) -> Vec<String> {
        self.state.lock().exists_keys.clone()
    }

    /// Total operations of any kind, for asserting nothing was attempted.
    pub fn total_calls(&self) -> usize {
        let state = self.state.lock();
        state.get_keys.len() + state.put_keys.len() + state.exists_keys.len()
    }
}

#[async_trait]
impl BlobStore for FakeBlobStore {
    async fn get(&self, key: &str, dest: &Path) -> Result<bool, BlobError> {
        let data = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.get_keys.push(key.to_string());
            if state.timeout_keys.contains(key) {
                return Err(BlobError::Timeout);
            }
            match state.corrupt_reads_remaining.get_mut(key) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(b"not an archive".to_vec())
                }
                _ => state.blobs.get(key).cloned(),
            }
        };

        match data {
            Some(bytes) => {
                tokio::fs::write(dest, bytes).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn put(&self, key: &str, src: &Path) -> Result<(), BlobError> {
        let data = tokio::fs::read(src).await?;
        let mut state = self.state.lock();
        state.put_keys.push(key.to_string());
        if state.timeout_keys.contains(key) {
            return Err(BlobError::Timeout);
        }
        state.blobs.insert(key.to_string(), data);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        let mut state = self.state.lock();
        state.exists_keys.push(key.to_string());
        if state.timeout_keys.contains(key) {
            return Err(BlobError::Timeout);
        }
        Ok(state.blobs.contains_key(key))
    }
}
