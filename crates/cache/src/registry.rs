// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-build cache registry.

use std::collections::HashMap;
use std::path::PathBuf;

use mason_wire::CacheAttempt;

use crate::{CacheError, DirHasher};

/// Archives at or above this size are skipped, not failed.
pub(crate) const MAX_ARCHIVE_SIZE: u64 = 2 * 1000 * 1000 * 1000;

/// Everything remembered about one populated cache between the populate
/// and upload steps.
#[derive(Debug)]
pub(crate) struct CacheRecord {
    pub(crate) key: String,
    pub(crate) base_folder: PathBuf,
    pub(crate) folders: Vec<PathBuf>,
    pub(crate) glob: Option<String>,
    /// Hashes captured right after the cache was restored; empty when the
    /// content came from a populate script.
    pub(crate) baseline: DirHasher,
    pub(crate) skip_upload: bool,
    pub(crate) available_remotely: bool,
}

/// All cache records and retrieval statistics for one build.
///
/// Owned by the coordinator; nothing here is global, so multiple builds
/// can coexist in one process (and in one test binary).
#[derive(Debug, Default)]
pub struct CacheRegistry {
    pub(crate) records: HashMap<String, CacheRecord>,
    pub(crate) attempts: Vec<CacheAttempt>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retrieval statistics for the final aggregate report.
    pub fn attempts(&self) -> Vec<CacheAttempt> {
        self.attempts.clone()
    }
}

/// Expand a cache folder glob into concrete paths.
pub(crate) fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>, CacheError> {
    let paths = glob::glob(pattern)
        .map_err(|source| CacheError::BadGlob {
            glob: pattern.to_string(),
            source,
        })?
        .flatten()
        .collect();
    Ok(paths)
}

/// True when every folder is absent or has no entries.
pub(crate) fn all_dirs_empty(folders: &[PathBuf]) -> bool {
    folders.iter().all(|folder| {
        std::fs::read_dir(folder)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true)
    })
}

pub(crate) fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} bytes")
    } else if bytes < 1024 * 1024 {
        format!("{}Kb", bytes / 1024)
    } else {
        format!("{}Mb", bytes / 1024 / 1024)
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
