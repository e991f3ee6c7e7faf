// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cancel-aware fixed-delay retry.
//!
//! Attempt counts and delays are configuration: the initial instruction
//! fetch retries forever (losing it means the agent cannot proceed),
//! while step and final reports give up after a few tries.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// `None` retries until cancelled.
    pub attempts: Option<u32>,
    pub delay: Duration,
}

impl RetryConfig {
    pub const fn limited(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: Some(attempts),
            delay,
        }
    }

    pub const fn unlimited(delay: Duration) -> Self {
        Self {
            attempts: None,
            delay,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The surrounding build was cancelled while waiting or retrying.
    Cancelled,
    /// The attempt budget ran out; carries the last error.
    Exhausted(E),
}

/// Run `op` until it succeeds, the attempt budget is exhausted, or the
/// token is cancelled. The closure receives the attempt number, starting
/// at zero. The first attempt always runs, so best-effort calls (like the
/// final build report) go out even when the build was cancelled.
pub async fn retry<T, E, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if cancel.is_cancelled() {
                    return Err(RetryError::Cancelled);
                }
                attempt += 1;
                if let Some(max) = config.attempts {
                    if attempt >= max {
                        return Err(RetryError::Exhausted(e));
                    }
                }
                tokio::select! {
                    _ = tokio::time::sleep(config.delay) => {}
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
