// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recursive directory hashing for cache change detection.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

const READ_BUFFER: usize = 64 * 1024;

/// How a path changed between two hashers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    Created,
    Modified,
    Deleted,
}

impl fmt::Display for DiffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Modified => write!(f, "modified"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub kind: DiffKind,
    pub path: String,
}

/// Per-file content hashes over one or more folders, plus a single
/// comparable whole-tree digest.
///
/// Files are keyed by their path relative to the base folder and walked
/// in stable lexical order, so two hashers over identical content always
/// agree. Symlinks are hashed by target path, not dereferenced content.
#[derive(Debug, Clone, Default)]
pub struct DirHasher {
    files: BTreeMap<String, [u8; 32]>,
}

impl DirHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash every file under `folder`, keyed relative to `base`.
    /// A missing folder contributes nothing.
    pub fn add_folder(&mut self, base: &Path, folder: &Path) -> std::io::Result<()> {
        if !folder.exists() {
            return Ok(());
        }

        for entry in walkdir::WalkDir::new(folder).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::other)?;
            if entry.file_type().is_dir() {
                continue;
            }

            let path = entry.path();
            let file_hash = if entry.path_is_symlink() {
                hash_symlink(path)?
            } else {
                hash_file(path)?
            };

            let relative = path
                .strip_prefix(base)
                .unwrap_or(path)
                .to_string_lossy()
                .into_owned();
            self.files.insert(relative, file_hash);
        }

        Ok(())
    }

    /// Whole-tree digest: the hash of every per-file digest concatenated
    /// in key order.
    pub fn digest(&self) -> String {
        let mut tree = Sha256::new();
        for file_hash in self.files.values() {
            tree.update(file_hash);
        }
        hex(&tree.finalize())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Classify every path difference between `self` (older) and `newer`.
    pub fn diff(&self, newer: &Self) -> Vec<DiffEntry> {
        let mut entries = Vec::new();

        for (path, old_hash) in &self.files {
            match newer.files.get(path) {
                None => entries.push(DiffEntry {
                    kind: DiffKind::Deleted,
                    path: path.clone(),
                }),
                Some(new_hash) if new_hash != old_hash => entries.push(DiffEntry {
                    kind: DiffKind::Modified,
                    path: path.clone(),
                }),
                Some(_) => {}
            }
        }

        for path in newer.files.keys() {
            if !self.files.contains_key(path) {
                entries.push(DiffEntry {
                    kind: DiffKind::Created,
                    path: path.clone(),
                });
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }
}

fn hash_file(path: &Path) -> std::io::Result<[u8; 32]> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; READ_BUFFER];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize().into())
}

fn hash_symlink(path: &Path) -> std::io::Result<[u8; 32]> {
    let target = std::fs::read_link(path)?;
    let mut hasher = Sha256::new();
    hasher.update(target.to_string_lossy().as_bytes());
    Ok(hasher.finalize().into())
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
#[path = "hasher_tests.rs"]
mod tests;
