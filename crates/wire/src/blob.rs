// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The narrow contract the cache engine has with the blob store.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use super::ProtocolError;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("blob store timed out")]
    Timeout,

    #[error("rejected by blob store: {message}")]
    Rejected { message: String },
}

impl BlobError {
    /// A timeout means the store is merely slow, not that the blob is
    /// absent; the cache engine treats the two differently.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Content-addressed blob storage keyed by cache fingerprint.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch a blob into `dest`. Returns `false` when the key is absent.
    async fn get(&self, key: &str, dest: &Path) -> Result<bool, BlobError>;

    /// Publish the file at `src` under `key`. Idempotent: entries are
    /// content-addressed, so duplicate publishes are wasted work, not
    /// errors.
    async fn put(&self, key: &str, src: &Path) -> Result<(), BlobError>;

    async fn exists(&self, key: &str) -> Result<bool, BlobError>;
}
