// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shell sessions: spawn, supervise, terminate.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::script::{build_command, ScriptFile};
use crate::ProcessError;

/// Receives process output chunks. Must never block: the log pipeline
/// enqueues and returns.
pub type OutputHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Safeguard poll interval while waiting on a child.
const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// How long to wait for the output pump to reach EOF before force-closing
/// it. A child that leaked its output descriptor to a detached grandchild
/// would otherwise hold the pump open forever.
const PUMP_GRACE: Duration = Duration::from_secs(2);

/// Final status of a completed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessStatus {
    pub exit_code: i32,
    /// Signal that terminated the process, when one did.
    pub signal: Option<i32>,
}

impl ProcessStatus {
    pub fn success(&self) -> bool {
        self.signal.is_none() && self.exit_code == 0
    }

    pub fn signaled(&self) -> bool {
        self.signal.is_some()
    }
}

/// A spawned batch of script lines plus its supervision machinery.
pub struct ShellSession {
    child: tokio::process::Child,
    /// Process-group id captured at spawn; the child's own pid.
    group_id: Option<u32>,
    pump: Option<JoinHandle<()>>,
    // Held so the interpreter keeps its script until the session ends.
    _script: Option<ScriptFile>,
    handler: OutputHandler,
}

impl ShellSession {
    /// Spawn the script. Returns as soon as the child is running; callers
    /// decide whether to `wait` (foreground) or keep the session around
    /// (background instructions).
    pub fn spawn(
        lines: &[String],
        env: &HashMap<String, String>,
        handler: OutputHandler,
    ) -> Result<Self, ProcessError> {
        let (mut command, script) = match build_command(lines, env) {
            Ok(built) => built,
            Err(e) => {
                handler(format!("Error creating command-line script: {e}").as_bytes());
                return Err(e);
            }
        };

        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                handler(format!("Error starting command: {e}").as_bytes());
                return Err(ProcessError::Spawn(e));
            }
        };

        let group_id = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let pump = tokio::spawn(pump_output(stdout, stderr, Arc::clone(&handler)));

        Ok(Self {
            child,
            group_id,
            pump: Some(pump),
            _script: script,
            handler,
        })
    }

    /// Wait for completion, racing the cancellation token and a periodic
    /// poll safeguard.
    ///
    /// On cancellation the whole process tree is killed, a diagnostic
    /// process listing is emitted, and `TimedOut` is returned, which is
    /// deliberately not reported as "signaled to exit".
    pub async fn wait(&mut self, cancel: &CancellationToken) -> Result<ProcessStatus, ProcessError> {
        let mut poll = tokio::time::interval(WAIT_POLL_INTERVAL);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        poll.reset();

        let status = loop {
            tokio::select! {
                status = self.child.wait() => break status?,
                _ = cancel.cancelled() => {
                    (self.handler)(b"\nTimed out!");
                    self.dump_process_listing();
                    if let Err(e) = self.kill_group() {
                        (self.handler)(
                            format!("\nFailed to kill a timed out shell session: {e}").as_bytes(),
                        );
                    }
                    self.close_pump().await;
                    return Err(ProcessError::TimedOut);
                }
                _ = poll.tick() => {
                    if let Some(status) = self.child.try_wait()? {
                        break status;
                    }
                }
            }
        };

        // The direct child is done; detached descendants sharing its group
        // are reaped so they cannot outlive the step.
        let _ = self.kill_group();
        self.close_pump().await;

        let status = exit_status_to_process_status(status);
        if let Some(signal) = status.signal {
            (self.handler)(format!("\nSignaled to exit ({signal})!").as_bytes());
        } else if status.exit_code > 1 {
            (self.handler)(format!("\nExit status: {}", status.exit_code).as_bytes());
        }

        Ok(status)
    }

    /// Pid of the direct child, if it started.
    pub fn child_id(&self) -> Option<u32> {
        self.group_id
    }

    /// Force-terminate the process tree and stop the output pump. Used for
    /// background sessions at build end.
    pub async fn kill(&mut self) -> Result<(), ProcessError> {
        let result = self.kill_group();
        // Reap the direct child so it does not linger as a zombie.
        let _ = self.child.wait().await;
        self.close_pump().await;
        result
    }

    #[cfg(unix)]
    fn kill_group(&self) -> Result<(), ProcessError> {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.group_id else {
            return Ok(());
        };
        killpg(Pid::from_raw(pid as i32), Signal::SIGKILL)
            .map_err(|errno| ProcessError::Io(std::io::Error::from(errno)))
    }

    #[cfg(not(unix))]
    fn kill_group(&self) -> Result<(), ProcessError> {
        Err(ProcessError::Unsupported)
    }

    async fn close_pump(&mut self) {
        let Some(mut pump) = self.pump.take() else {
            return;
        };
        if tokio::time::timeout(PUMP_GRACE, &mut pump).await.is_err() {
            // A leaked descriptor is keeping the pipe open; cut the copy
            // loop loose instead of hanging shutdown.
            pump.abort();
        }
    }

    /// Best-effort `ps` snapshot for post-mortem debugging of timeouts.
    fn dump_process_listing(&self) {
        let listing = std::process::Command::new("ps")
            .args(["-eo", "pid,ppid,pgid,command"])
            .output();
        match listing {
            Ok(output) if output.status.success() => {
                (self.handler)(b"\nRunning processes:\n");
                (self.handler)(&output.stdout);
            }
            Ok(output) => {
                tracing::debug!(code = output.status.code(), "ps exited non-zero");
            }
            Err(e) => {
                tracing::debug!(error = %e, "failed to run ps");
            }
        }
    }
}

async fn pump_output(
    stdout: Option<tokio::process::ChildStdout>,
    stderr: Option<tokio::process::ChildStderr>,
    handler: OutputHandler,
) {
    tokio::join!(
        pump_stream(stdout, Arc::clone(&handler)),
        pump_stream(stderr, handler),
    );
}

async fn pump_stream<R: tokio::io::AsyncRead + Unpin>(stream: Option<R>, handler: OutputHandler) {
    let Some(mut stream) = stream else { return };
    let mut buffer = [0u8; 8192];
    loop {
        match stream.read(&mut buffer).await {
            Ok(0) | Err(_) => break,
            Ok(n) => handler(&buffer[..n]),
        }
    }
}

fn exit_status_to_process_status(status: std::process::ExitStatus) -> ProcessStatus {
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal = None;

    ProcessStatus {
        exit_code: status.code().unwrap_or(-1),
        signal,
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
