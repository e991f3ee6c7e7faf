// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! mason-logstream: asynchronous, reconnect-capable log transport.
//!
//! One [`LogSink`] per instruction. Producers enqueue onto an unbounded
//! channel and never block on network I/O; a single drainer task per sink
//! coalesces chunks, masks secrets, mirrors everything to a local spill
//! file, and forwards to the live stream, reopening it transparently if
//! the remote side drops. At finalize time the spill file is replayed in
//! full through the snapshot save call as a durability backstop.

mod sink;

pub use sink::{LogSink, LogStreamError, MASK_PLACEHOLDER};
