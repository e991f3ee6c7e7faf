// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! mason-cache: the content-addressed cache engine.
//!
//! A cache is fingerprinted (script output or task metadata), restored
//! from the blob store by key, or rebuilt by a user-supplied populate
//! script. At upload time the directory tree is re-hashed; only changed
//! caches are archived (tar + zstd) and published, and only when no other
//! task beat us to the same key.

mod archive;
mod error;
mod hasher;
mod populate;
mod registry;
mod upload;

pub use archive::{archive, unarchive};
pub use error::CacheError;
pub use hasher::{DiffEntry, DiffKind, DirHasher};
pub use populate::PopulateRequest;
pub use registry::CacheRegistry;
