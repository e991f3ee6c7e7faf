// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Framed-TCP implementations of the control-plane and blob-store seams.
//!
//! Unary calls use one connection per exchange; log streams and blob
//! transfers hold a dedicated connection for their lifetime.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use mason_core::{StepOutcome, TaskIdentity};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{
    decode, encode, read_message, write_message, BlobError, BlobStore, CacheAttempt, ClientError,
    ControlPlane, InstructionsResponse, LogStream, ProtocolError, Request, Response,
};

/// Read/write chunk size for blob transfers.
const TRANSFER_CHUNK: usize = 1024 * 1024;

/// Default per-operation deadline for blob calls.
const DEFAULT_BLOB_TIMEOUT: Duration = Duration::from_secs(300);

pub struct TcpControlPlane {
    addr: String,
}

impl TcpControlPlane {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    async fn call(&self, request: &Request) -> Result<Response, ClientError> {
        let mut stream = connect(&self.addr).await?;
        write_message(&mut stream, &encode(request)?).await?;
        let response: Response = decode(&read_message(&mut stream).await?)?;
        match response {
            Response::Error { message } => Err(ClientError::Rejected { message }),
            other => Ok(other),
        }
    }

    async fn open_byte_channel(&self, header: &Request) -> Result<Box<dyn LogStream>, ClientError> {
        let mut stream = connect(&self.addr).await?;
        write_message(&mut stream, &encode(header)?).await?;
        match decode(&read_message(&mut stream).await?)? {
            Response::Ok => Ok(Box::new(TcpLogStream { stream })),
            Response::Error { message } => Err(ClientError::Rejected { message }),
            other => Err(unexpected(&other)),
        }
    }
}

#[async_trait]
impl ControlPlane for TcpControlPlane {
    async fn fetch_instructions(
        &self,
        task: &TaskIdentity,
        resume_from: &str,
        is_retry: bool,
    ) -> Result<InstructionsResponse, ClientError> {
        let response = self
            .call(&Request::FetchInstructions {
                task: task.clone(),
                resume_from: resume_from.to_string(),
                local_timestamp: unix_timestamp(),
                is_retry,
            })
            .await?;
        match response {
            Response::Instructions { payload } => Ok(*payload),
            other => Err(unexpected(&other)),
        }
    }

    async fn report_step(
        &self,
        task: &TaskIdentity,
        outcome: &StepOutcome,
    ) -> Result<(), ClientError> {
        expect_ok(
            self.call(&Request::ReportStep {
                task: task.clone(),
                outcome: outcome.clone(),
                local_timestamp: unix_timestamp(),
            })
            .await?,
        )
    }

    async fn report_finished(
        &self,
        task: &TaskIdentity,
        outcomes: &[StepOutcome],
        cache_attempts: &[CacheAttempt],
    ) -> Result<(), ClientError> {
        expect_ok(
            self.call(&Request::ReportFinished {
                task: task.clone(),
                outcomes: outcomes.to_vec(),
                cache_attempts: cache_attempts.to_vec(),
            })
            .await?,
        )
    }

    async fn report_warning(&self, task: &TaskIdentity, message: &str) -> Result<(), ClientError> {
        expect_ok(
            self.call(&Request::ReportWarning {
                task: task.clone(),
                message: message.to_string(),
            })
            .await?,
        )
    }

    async fn open_log_stream(
        &self,
        task: &TaskIdentity,
        command_name: &str,
    ) -> Result<Box<dyn LogStream>, ClientError> {
        self.open_byte_channel(&Request::OpenLogStream {
            task: task.clone(),
            command_name: command_name.to_string(),
        })
        .await
    }

    async fn open_log_save(
        &self,
        task: &TaskIdentity,
        command_name: &str,
    ) -> Result<Box<dyn LogStream>, ClientError> {
        self.open_byte_channel(&Request::SaveLogs {
            task: task.clone(),
            command_name: command_name.to_string(),
        })
        .await
    }

    async fn upload_artifact(
        &self,
        task: &TaskIdentity,
        artifact_name: &str,
        relative_path: &str,
        data: &[u8],
    ) -> Result<(), ClientError> {
        let mut stream = connect(&self.addr).await?;
        let header = Request::UploadArtifact {
            task: task.clone(),
            artifact_name: artifact_name.to_string(),
            path: relative_path.to_string(),
        };
        write_message(&mut stream, &encode(&header)?).await?;
        for chunk in data.chunks(TRANSFER_CHUNK) {
            write_message(&mut stream, chunk).await?;
        }
        write_message(&mut stream, &[]).await?;
        match decode(&read_message(&mut stream).await?)? {
            Response::Ok => Ok(()),
            Response::Error { message } => Err(ClientError::Rejected { message }),
            other => Err(unexpected(&other)),
        }
    }
}

struct TcpLogStream {
    stream: TcpStream,
}

#[async_trait]
impl LogStream for TcpLogStream {
    async fn send(&mut self, chunk: &[u8]) -> Result<(), ClientError> {
        // An empty frame would terminate the stream; callers never send
        // empty chunks, but guard anyway.
        if chunk.is_empty() {
            return Ok(());
        }
        write_message(&mut self.stream, chunk)
            .await
            .map_err(|_| ClientError::StreamClosed)
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        write_message(&mut self.stream, &[])
            .await
            .map_err(|_| ClientError::StreamClosed)?;
        match decode(&read_message(&mut self.stream).await?)? {
            Response::Ok => Ok(()),
            Response::Error { message } => Err(ClientError::Rejected { message }),
            other => Err(unexpected(&other)),
        }
    }
}

pub struct TcpBlobStore {
    addr: String,
    op_timeout: Duration,
}

impl TcpBlobStore {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            op_timeout: DEFAULT_BLOB_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    async fn get_inner(&self, key: &str, dest: &Path) -> Result<bool, BlobError> {
        let mut stream = connect(&self.addr).await.map_err(client_to_blob)?;
        let header = Request::CacheGet {
            key: key.to_string(),
        };
        write_message(&mut stream, &encode(&header)?).await?;
        match decode(&read_message(&mut stream).await?)? {
            Response::CacheHit => {}
            Response::CacheMiss => return Ok(false),
            Response::Error { message } => return Err(BlobError::Rejected { message }),
            other => {
                return Err(BlobError::Rejected {
                    message: format!("unexpected response: {other:?}"),
                })
            }
        }

        let mut file = tokio::fs::File::create(dest).await?;
        loop {
            let frame = read_message(&mut stream).await?;
            if frame.is_empty() {
                break;
            }
            file.write_all(&frame).await?;
        }
        file.flush().await?;
        Ok(true)
    }

    async fn put_inner(&self, key: &str, src: &Path) -> Result<(), BlobError> {
        let mut stream = connect(&self.addr).await.map_err(client_to_blob)?;
        let header = Request::CachePut {
            key: key.to_string(),
        };
        write_message(&mut stream, &encode(&header)?).await?;

        let mut file = tokio::fs::File::open(src).await?;
        let mut buffer = vec![0u8; TRANSFER_CHUNK];
        loop {
            let n = file.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            write_message(&mut stream, &buffer[..n]).await?;
        }
        write_message(&mut stream, &[]).await?;

        match decode(&read_message(&mut stream).await?)? {
            Response::Ok => Ok(()),
            Response::Error { message } => Err(BlobError::Rejected { message }),
            other => Err(BlobError::Rejected {
                message: format!("unexpected response: {other:?}"),
            }),
        }
    }

    async fn exists_inner(&self, key: &str) -> Result<bool, BlobError> {
        let mut stream = connect(&self.addr).await.map_err(client_to_blob)?;
        let header = Request::CacheProbe {
            key: key.to_string(),
        };
        write_message(&mut stream, &encode(&header)?).await?;
        match decode(&read_message(&mut stream).await?)? {
            Response::CacheExists { present } => Ok(present),
            Response::Error { message } => Err(BlobError::Rejected { message }),
            other => Err(BlobError::Rejected {
                message: format!("unexpected response: {other:?}"),
            }),
        }
    }
}

#[async_trait]
impl BlobStore for TcpBlobStore {
    async fn get(&self, key: &str, dest: &Path) -> Result<bool, BlobError> {
        tokio::time::timeout(self.op_timeout, self.get_inner(key, dest))
            .await
            .map_err(|_| BlobError::Timeout)?
    }

    async fn put(&self, key: &str, src: &Path) -> Result<(), BlobError> {
        tokio::time::timeout(self.op_timeout, self.put_inner(key, src))
            .await
            .map_err(|_| BlobError::Timeout)?
    }

    async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        tokio::time::timeout(self.op_timeout, self.exists_inner(key))
            .await
            .map_err(|_| BlobError::Timeout)?
    }
}

async fn connect(addr: &str) -> Result<TcpStream, ClientError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(ProtocolError::from)?;
    Ok(stream)
}

fn unix_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

fn expect_ok(response: Response) -> Result<(), ClientError> {
    match response {
        Response::Ok => Ok(()),
        other => Err(unexpected(&other)),
    }
}

fn unexpected(response: &Response) -> ClientError {
    ClientError::Rejected {
        message: format!("unexpected response: {response:?}"),
    }
}

fn client_to_blob(err: ClientError) -> BlobError {
    match err {
        ClientError::Protocol(protocol) => BlobError::Protocol(protocol),
        other => BlobError::Rejected {
            message: other.to_string(),
        },
    }
}
