// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

/// Errors that fail a cache step.
///
/// Degradable conditions (archive corruption on restore, oversize
/// archives, lost uploads) are handled inside the engine and never
/// surface here.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to execute fingerprint script for {name} cache")]
    FingerprintFailed { name: String },

    #[error("failed to execute populate script for {name} cache")]
    PopulateFailed { name: String },

    #[error("cache folder glob {glob:?} points above the working directory {working_dir:?}")]
    PathEscapesWorkingDir { glob: String, working_dir: String },

    #[error("cannot expand cache folder glob {glob:?}: {source}")]
    BadGlob {
        glob: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("no cache record found for {name}")]
    MissingRecord { name: String },

    #[error("failed to archive cache folders: {0}")]
    Archive(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
