// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-step environment side-channel file.
//!
//! Each step gets a fresh empty file whose path is exported as
//! `CIRRUS_ENV`; scripts append `KEY=VALUE` lines to hand variables to
//! later steps. The coordinator consumes the file after the step and
//! merges the variables into the build environment.

use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvFileError {
    #[error("env file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("env file line is not KEY=VALUE: {line:?}")]
    MalformedLine { line: String },
}

/// A temp file scripts write `KEY=VALUE` lines into.
#[derive(Debug)]
pub struct EnvFile {
    path: PathBuf,
}

impl EnvFile {
    pub fn create() -> Result<Self, EnvFileError> {
        let path = std::env::temp_dir().join(format!("mason-env-{}", uuid::Uuid::new_v4()));
        fs::File::create(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse the accumulated `KEY=VALUE` lines. Blank lines are ignored;
    /// anything else without a `=` is an error.
    pub fn consume(&self) -> Result<HashMap<String, String>, EnvFileError> {
        let reader = BufReader::new(fs::File::open(&self.path)?);
        let mut result = HashMap::new();

        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            match line.split_once('=') {
                Some((key, value)) => {
                    result.insert(key.to_string(), value.to_string());
                }
                None => return Err(EnvFileError::MalformedLine { line }),
            }
        }

        Ok(result)
    }
}

impl Drop for EnvFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(path = %self.path.display(), error = %e, "failed to remove env file");
            }
        }
    }
}

#[cfg(test)]
#[path = "env_file_tests.rs"]
mod tests;
