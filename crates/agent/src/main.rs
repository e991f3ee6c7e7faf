// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! mason-agent: per-attempt build agent process.
//!
//! One agent process is spawned per build attempt; it fetches the
//! instruction list, executes it, and exits. The exit code reflects only
//! whether the agent itself could run; step failures are reported over
//! the wire, not through the process status.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use mason_core::TaskIdentity;
use mason_engine::{BuildConfig, BuildError, Executor};
use mason_wire::{ControlPlane, TcpBlobStore, TcpControlPlane};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mason-agent", about = "Build-execution agent")]
struct Args {
    /// Control-plane address as host:port.
    #[arg(long)]
    api_addr: String,

    /// Numeric task id of this build attempt.
    #[arg(long)]
    task_id: i64,

    /// Secret token authenticating the agent to the control plane.
    #[arg(long)]
    token: String,

    /// Shared secret the server must echo back with the instruction list.
    #[arg(long)]
    server_token: String,

    /// Resume execution from this instruction name (inclusive).
    #[arg(long, default_value = "")]
    command_from: String,

    /// Stop execution at this instruction name (exclusive).
    #[arg(long, default_value = "")]
    command_to: String,

    /// Working directory prepared ahead of time by a persistent worker.
    #[arg(long)]
    pre_created_working_dir: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let task = TaskIdentity::new(args.task_id, args.token.clone());
    let control: Arc<dyn ControlPlane> = Arc::new(TcpControlPlane::new(args.api_addr.clone()));
    let blobs = Arc::new(TcpBlobStore::new(args.api_addr.clone()));

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let mut config = BuildConfig::new(task.clone(), args.server_token.clone());
    config.command_from = args.command_from.clone();
    config.command_to = args.command_to.clone();
    config.pre_created_working_dir = args.pre_created_working_dir.clone();

    let executor = Executor::new(config, Arc::clone(&control), blobs);

    // Run the build in its own task so a panic anywhere inside it is
    // caught here and reported upstream instead of leaving the control
    // plane waiting forever.
    let build = tokio::spawn(executor.run_build(cancel.clone()));
    let result = match build.await {
        Ok(result) => result,
        Err(join_error) => {
            let message = format!("agent error: {join_error}");
            tracing::error!("{message}");
            let _ = control.report_warning(&task, &message).await;
            anyhow::bail!(message);
        }
    };

    match result {
        Ok(()) => Ok(()),
        Err(BuildError::Cancelled) => {
            tracing::warn!("build cancelled before instructions were fetched");
            Ok(())
        }
        Err(e @ BuildError::ServerSecretMismatch)
        | Err(e @ BuildError::InstructionsUnavailable) => {
            // Already reported upstream where possible; the non-zero exit
            // tells the supervisor the agent could not run this build.
            Err(e).context("build aborted")
        }
    }
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut term = match signal(SignalKind::terminate()) {
                Ok(term) => term,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        tracing::warn!("received shutdown signal, cancelling the build");
        cancel.cancel();
    });
}
