// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-plane protocol for the mason build agent.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload for
//! request/response messages; raw length-prefixed byte frames (empty frame
//! terminates) for log and blob data following a JSON handshake.
//!
//! The engine depends only on the [`ControlPlane`], [`LogStream`] and
//! [`BlobStore`] traits; the TCP implementations here are the one concrete
//! transport the agent binary wires in.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod blob;
mod client;
mod frame;
mod request;
mod response;
mod tcp;
mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use blob::{BlobError, BlobStore};
pub use client::{ClientError, ControlPlane, LogStream};
pub use frame::{decode, encode, read_message, write_message, ProtocolError, MAX_FRAME_SIZE};
pub use request::Request;
pub use response::Response;
pub use tcp::{TcpBlobStore, TcpControlPlane};
pub use types::{CacheAttempt, InstructionsResponse};
