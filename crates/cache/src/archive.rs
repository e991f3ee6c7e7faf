// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cache archives: tar streams, zstd-compressed.
//!
//! Entries are stored relative to the base folder so an archive restores
//! identically regardless of where the working directory lives. Headers
//! carry epoch timestamps so identical content produces identical bytes.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::CacheError;

const ZSTD_LEVEL: i32 = 3;

/// Archive `folders` (all under `base`) into the file at `dest`.
pub fn archive(base: &Path, folders: &[PathBuf], dest: &Path) -> Result<(), CacheError> {
    let out = File::create(dest).map_err(CacheError::Archive)?;
    let encoder = zstd::Encoder::new(BufWriter::new(out), ZSTD_LEVEL)
        .map_err(CacheError::Archive)?
        .auto_finish();
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    for folder in folders {
        if !folder.exists() {
            continue;
        }
        append_tree(&mut builder, base, folder)?;
    }

    builder.finish().map_err(CacheError::Archive)?;
    Ok(())
}

/// Unpack the archive at `src` into the `dest` directory.
pub fn unarchive(src: &Path, dest: &Path) -> Result<(), CacheError> {
    std::fs::create_dir_all(dest).map_err(CacheError::Archive)?;
    let file = File::open(src).map_err(CacheError::Archive)?;
    let decoder = zstd::Decoder::new(BufReader::new(file)).map_err(CacheError::Archive)?;
    let mut reader = tar::Archive::new(decoder);
    reader.unpack(dest).map_err(CacheError::Archive)?;
    Ok(())
}

fn append_tree<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    base: &Path,
    folder: &Path,
) -> Result<(), CacheError> {
    for entry in walkdir::WalkDir::new(folder).sort_by_file_name() {
        let entry = entry.map_err(|e| CacheError::Archive(std::io::Error::other(e)))?;
        let path = entry.path();
        let relative = match path.strip_prefix(base) {
            Ok(relative) if !relative.as_os_str().is_empty() => relative,
            _ => continue,
        };

        let metadata = entry.metadata().map_err(|e| {
            CacheError::Archive(std::io::Error::other(e))
        })?;

        if entry.path_is_symlink() {
            append_symlink(builder, base, path, relative)?;
        } else if metadata.is_dir() {
            let mut header = deterministic_header(&metadata);
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            builder
                .append_data(&mut header, relative, std::io::empty())
                .map_err(CacheError::Archive)?;
        } else {
            let mut header = deterministic_header(&metadata);
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(metadata.len());
            let file = File::open(path).map_err(CacheError::Archive)?;
            builder
                .append_data(&mut header, relative, BufReader::new(file))
                .map_err(CacheError::Archive)?;
        }
    }
    Ok(())
}

fn append_symlink<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    base: &Path,
    path: &Path,
    relative: &Path,
) -> Result<(), CacheError> {
    let mut target = std::fs::read_link(path).map_err(CacheError::Archive)?;
    // Absolute targets are re-pointed relative to the base folder so the
    // archive stays portable.
    if target.is_absolute() {
        if let Ok(stripped) = target.strip_prefix(base) {
            target = stripped.to_path_buf();
        }
    }

    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Symlink);
    header.set_size(0);
    header.set_mode(0o777);
    header.set_mtime(0);
    builder
        .append_link(&mut header, relative, &target)
        .map_err(CacheError::Archive)?;
    Ok(())
}

fn deterministic_header(metadata: &std::fs::Metadata) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_metadata_in_mode(metadata, tar::HeaderMode::Deterministic);
    header.set_mtime(0);
    header
}

#[cfg(test)]
#[path = "archive_tests.rs"]
mod tests;
