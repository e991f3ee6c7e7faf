// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cache fingerprinting and the download/populate phase.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use mason_core::{expand_text, WORKING_DIR_VAR};
use mason_process::{OutputHandler, ShellSession};
use mason_wire::{BlobStore, CacheAttempt};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::hasher::hex;
use crate::registry::{expand_glob, CacheRecord};
use crate::{unarchive, CacheError, CacheRegistry, DirHasher};

/// One `PopulateCache` instruction, unpacked.
#[derive(Debug, Clone, Copy)]
pub struct PopulateRequest<'a> {
    pub cache_name: &'a str,
    pub folder: &'a str,
    pub fingerprint_lines: &'a [String],
    pub populate_lines: &'a [String],
    pub reupload_on_changes: bool,
}

/// What the blob store gave us for a key.
enum DownloadOutcome {
    /// Content restored into the target folder.
    Restored,
    /// Definitive miss; the remote has nothing under this key.
    Miss,
    /// Nothing restored, but the remote does hold the key (a corrupt
    /// archive counts: re-uploading the same fingerprint would not help).
    MissRemoteHas,
    /// The store was too slow to answer. Populating would waste work the
    /// remote copy already did, so the populate script is skipped.
    TimedOut,
}

impl CacheRegistry {
    /// Fingerprint the cache, restore it from the blob store or run the
    /// populate script, and remember the result for the later upload step.
    pub async fn populate(
        &mut self,
        blobs: &dyn BlobStore,
        request: PopulateRequest<'_>,
        env: &HashMap<String, String>,
        log: &OutputHandler,
        cancel: &CancellationToken,
    ) -> Result<(), CacheError> {
        let name = request.cache_name;
        let key = self
            .fingerprint(name, request.fingerprint_lines, env, log, cancel)
            .await?;

        // Folder resolution and the glob sanity check happen before any
        // network traffic: a glob escaping the working directory would
        // produce unportable archive paths.
        let working_dir = env.get(WORKING_DIR_VAR).cloned().unwrap_or_default();
        let folder = expand_text(request.folder, env);
        let folder = absolutize(&folder, &working_dir);

        let (base_folder, glob_pattern) = if looks_like_glob(&folder) {
            let glob_str = folder.to_string_lossy().into_owned();
            if !is_under(&folder, Path::new(&working_dir)) {
                return Err(CacheError::PathEscapesWorkingDir {
                    glob: glob_str,
                    working_dir,
                });
            }
            (PathBuf::from(&working_dir), Some(glob_str))
        } else {
            (folder.clone(), None)
        };

        let fetch_start = Instant::now();
        let (outcome, downloaded_bytes) = self
            .try_restore(blobs, name, &key, &base_folder, log)
            .await;
        let fetch_duration = fetch_start.elapsed();

        let folders = match &glob_pattern {
            Some(pattern) => expand_glob(pattern)?,
            None => vec![folder.clone()],
        };

        let mut baseline = DirHasher::new();
        if matches!(outcome, DownloadOutcome::Restored) {
            for folder in &folders {
                if let Err(e) = baseline.add_folder(&base_folder, folder) {
                    log_line(
                        log,
                        &format!("Failed to calculate hash of {}! {e}", folder.display()),
                    );
                }
            }
        }

        let mut ran_populate = false;
        match outcome {
            DownloadOutcome::Miss | DownloadOutcome::MissRemoteHas => {
                if request.populate_lines.is_empty() {
                    log_line(log, &format!("Cache miss for {key}! No script to populate with."));
                } else {
                    log_line(log, &format!("Cache miss for {key}! Populating..."));
                    self.run_populate(name, request.populate_lines, env, log, cancel)
                        .await?;
                    ran_populate = true;
                }
            }
            DownloadOutcome::TimedOut => {
                log_line(
                    log,
                    &format!("Blob store timed out for {key}; skipping populate since the remote copy exists."),
                );
            }
            DownloadOutcome::Restored => {}
        }

        let available_remotely = !matches!(outcome, DownloadOutcome::Miss);

        self.attempts.push(CacheAttempt {
            name: name.to_string(),
            hit: matches!(outcome, DownloadOutcome::Restored),
            populated: ran_populate,
            duration_ms: fetch_duration.as_millis() as u64,
            size_bytes: downloaded_bytes,
        });

        self.records.insert(
            name.to_string(),
            CacheRecord {
                key,
                base_folder,
                folders,
                glob: glob_pattern,
                baseline,
                skip_upload: available_remotely && !request.reupload_on_changes,
                available_remotely,
            },
        );

        Ok(())
    }

    /// Key = `{name}-{sha256}` over fingerprint-script output, or over
    /// task name + shard index when no script is given. Identical inputs
    /// must yield identical keys across machines.
    async fn fingerprint(
        &self,
        name: &str,
        lines: &[String],
        env: &HashMap<String, String>,
        log: &OutputHandler,
        cancel: &CancellationToken,
    ) -> Result<String, CacheError> {
        let mut hasher = Sha256::new();

        if lines.is_empty() {
            hasher.update(env.get("CIRRUS_TASK_NAME").map(String::as_str).unwrap_or(""));
            hasher.update(env.get("CI_NODE_INDEX").map(String::as_str).unwrap_or(""));
        } else {
            let captured = Arc::new(parking_lot::Mutex::new(Vec::new()));
            let handler: OutputHandler = {
                let captured = Arc::clone(&captured);
                let log = Arc::clone(log);
                Arc::new(move |bytes: &[u8]| {
                    captured.lock().extend_from_slice(bytes);
                    log(bytes);
                })
            };

            let failed = CacheError::FingerprintFailed {
                name: name.to_string(),
            };
            let mut session =
                ShellSession::spawn(lines, env, handler).map_err(|_| failed)?;
            let status = session.wait(cancel).await.map_err(|_| CacheError::FingerprintFailed {
                name: name.to_string(),
            })?;
            if !status.success() {
                return Err(CacheError::FingerprintFailed {
                    name: name.to_string(),
                });
            }
            hasher.update(&*captured.lock());
        }

        Ok(format!("{name}-{}", hex(&hasher.finalize())))
    }

    async fn run_populate(
        &self,
        name: &str,
        lines: &[String],
        env: &HashMap<String, String>,
        log: &OutputHandler,
        cancel: &CancellationToken,
    ) -> Result<(), CacheError> {
        let failed = || CacheError::PopulateFailed {
            name: name.to_string(),
        };
        let mut session = ShellSession::spawn(lines, env, Arc::clone(log)).map_err(|_| failed())?;
        let status = session.wait(cancel).await.map_err(|_| failed())?;
        if !status.success() {
            return Err(failed());
        }
        Ok(())
    }

    /// Fetch and unarchive by key, retrying the whole fetch once when the
    /// archive turns out corrupt.
    async fn try_restore(
        &self,
        blobs: &dyn BlobStore,
        name: &str,
        key: &str,
        target: &Path,
        log: &OutputHandler,
    ) -> (DownloadOutcome, u64) {
        let (first, bytes) = match self.fetch(blobs, name, key, log).await {
            Ok(Some(file)) => {
                let bytes = file_size(file.path());
                (file, bytes)
            }
            Ok(None) => return (DownloadOutcome::Miss, 0),
            Err(outcome) => return (outcome, 0),
        };

        log_line(log, &format!("Cache hit for {key}!"));
        let unarchive_start = Instant::now();
        match unarchive(first.path(), target) {
            Ok(()) => {
                let elapsed = unarchive_start.elapsed();
                if elapsed.as_secs() > 10 {
                    log_line(
                        log,
                        &format!(
                            "Unarchived {name} cache entry in {:.1} seconds!",
                            elapsed.as_secs_f64()
                        ),
                    );
                }
                (DownloadOutcome::Restored, bytes)
            }
            Err(e) => {
                log_line(
                    log,
                    &format!("Failed to unarchive {name} cache because of {e}! Retrying..."),
                );
                let _ = std::fs::remove_dir_all(target);

                let second = match self.fetch(blobs, name, key, log).await {
                    Ok(Some(file)) => file,
                    // A miss on retry still means the remote holds the key.
                    Ok(None) => return (DownloadOutcome::MissRemoteHas, 0),
                    Err(outcome) => return (outcome, 0),
                };
                match unarchive(second.path(), target) {
                    Ok(()) => (DownloadOutcome::Restored, file_size(second.path())),
                    Err(e) => {
                        log_line(
                            log,
                            &format!("Failed again to unarchive {name} cache because of {e}!"),
                        );
                        log_line(
                            log,
                            &format!(
                                "Treating this failure as a cache miss but won't try to re-upload! Cleaning up {}...",
                                target.display()
                            ),
                        );
                        let _ = std::fs::remove_dir_all(target);
                        (DownloadOutcome::MissRemoteHas, 0)
                    }
                }
            }
        }
    }

    async fn fetch(
        &self,
        blobs: &dyn BlobStore,
        name: &str,
        key: &str,
        log: &OutputHandler,
    ) -> Result<Option<tempfile::NamedTempFile>, DownloadOutcome> {
        let file = match tempfile::Builder::new().prefix(name).tempfile() {
            Ok(file) => file,
            Err(e) => {
                log_line(log, &format!("Cache miss for {name}! {e}"));
                return Err(DownloadOutcome::Miss);
            }
        };

        let start = Instant::now();
        match blobs.get(key, file.path()).await {
            Ok(true) => {
                let bytes = file_size(file.path());
                log_line(
                    log,
                    &format!(
                        "Downloaded {} in {:.1}s.",
                        crate::registry::format_bytes(bytes),
                        start.elapsed().as_secs_f64()
                    ),
                );
                Ok(Some(file))
            }
            Ok(false) => Ok(None),
            Err(e) if e.is_timeout() => {
                log_line(log, &format!("Failed to fetch archive for {name} cache: {e}!"));
                Err(DownloadOutcome::TimedOut)
            }
            Err(e) => {
                log_line(log, &format!("Failed to fetch archive for {name} cache: {e}!"));
                Err(DownloadOutcome::Miss)
            }
        }
    }
}

fn absolutize(folder: &str, working_dir: &str) -> PathBuf {
    let path = PathBuf::from(folder);
    if path.is_absolute() || working_dir.is_empty() {
        path
    } else {
        Path::new(working_dir).join(path)
    }
}

fn looks_like_glob(path: &Path) -> bool {
    path.to_string_lossy().contains('*')
}

fn is_under(path: &Path, root: &Path) -> bool {
    !root.as_os_str().is_empty() && path.starts_with(root)
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

pub(crate) fn log_line(log: &OutputHandler, message: &str) {
    log(format!("{message}\n").as_bytes());
}
