// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cache change detection and the upload phase.

use mason_process::OutputHandler;
use mason_wire::BlobStore;

use crate::populate::log_line;
use crate::registry::{all_dirs_empty, expand_glob, format_bytes, MAX_ARCHIVE_SIZE};
use crate::{archive, CacheError, CacheRegistry, DirHasher};

impl CacheRegistry {
    /// Re-hash a populated cache and publish it when it changed.
    ///
    /// Oversized archives, keys another task already published, and lost
    /// uploads all degrade to a successful no-op; only a missing record,
    /// a bad glob or an archiving failure fail the step.
    pub async fn upload(
        &mut self,
        blobs: &dyn BlobStore,
        cache_name: &str,
        log: &OutputHandler,
    ) -> Result<(), CacheError> {
        let record = self
            .records
            .get_mut(cache_name)
            .ok_or_else(|| CacheError::MissingRecord {
                name: cache_name.to_string(),
            })?;

        if record.skip_upload {
            log_line(log, &format!("Skipping change detection for {cache_name} cache!"));
            return Ok(());
        }

        // Re-expand the glob: folders created after the populate step
        // belong in the archive too.
        if let Some(pattern) = &record.glob {
            record.folders = expand_glob(pattern)?;
        }

        let folder_list = record
            .folders
            .iter()
            .map(|folder| folder.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");

        if all_dirs_empty(&record.folders) {
            log_line(
                log,
                &format!("All cache folders ({folder_list}) are empty! Skipping uploading..."),
            );
            return Ok(());
        }

        let mut current = DirHasher::new();
        for folder in &record.folders {
            if let Err(e) = current.add_folder(&record.base_folder, folder) {
                log_line(
                    log,
                    &format!("Failed to calculate hash of {}! {e}", folder.display()),
                );
                log_line(log, "Skipping uploading of cache!");
                return Ok(());
            }
        }

        log_line(
            log,
            &format!(
                "SHA for cache folders ({folder_list}) is '{}'",
                current.digest()
            ),
        );

        if current.digest() == record.baseline.digest() {
            log_line(log, &format!("Cache {cache_name} hasn't changed! Skipping uploading..."));
            return Ok(());
        }

        if !record.baseline.is_empty() {
            log_line(log, &format!("Cache {cache_name} has changed!"));
            log_line(
                log,
                &format!("List of changes for cache folders ({folder_list}):"),
            );
            for entry in record.baseline.diff(&current) {
                log_line(log, &format!("{}: {}", entry.kind, entry.path));
            }
        }

        let archive_file = tempfile::Builder::new()
            .prefix("cache-upload-")
            .tempfile()
            .map_err(CacheError::Archive)?;
        archive(&record.base_folder, &record.folders, archive_file.path())?;

        let bytes_to_upload = std::fs::metadata(archive_file.path())
            .map(|meta| meta.len())
            .map_err(CacheError::Archive)?;

        if bytes_to_upload >= MAX_ARCHIVE_SIZE {
            log_line(log, &format!("Cache {cache_name} is too big! Skipping caching..."));
            return Ok(());
        }

        log_line(
            log,
            &format!("{cache_name} cache size is {}.", format_bytes(bytes_to_upload)),
        );

        if !record.available_remotely {
            // Another concurrent task may have published the same key;
            // entries are content-addressed, so re-uploading is pure waste.
            if let Ok(true) = blobs.exists(&record.key).await {
                log_line(
                    log,
                    &format!(
                        "Some other task has already uploaded cache entry {}! Skipping upload...",
                        record.key
                    ),
                );
                return Ok(());
            }
        }

        log_line(log, &format!("Uploading cache {cache_name}..."));
        if let Err(e) = blobs.put(&record.key, archive_file.path()).await {
            log_line(log, &format!("Failed to upload cache '{cache_name}': {e}!"));
            log_line(log, "Ignoring the error...");
        }

        Ok(())
    }
}
