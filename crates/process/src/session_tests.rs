// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process supervision tests. These spawn real shells.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::run_and_capture;

fn capture() -> (OutputHandler, Arc<Mutex<Vec<u8>>>) {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let handler: OutputHandler = {
        let buffer = Arc::clone(&buffer);
        Arc::new(move |bytes: &[u8]| buffer.lock().extend_from_slice(bytes))
    };
    (handler, buffer)
}

fn lines(script: &[&str]) -> Vec<String> {
    script.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn captures_output_and_succeeds() {
    let (status, output) = run_and_capture(
        &lines(&["echo hello"]),
        &HashMap::new(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(status.success());
    assert_eq!(status.exit_code, 0);
    let text = String::from_utf8_lossy(&output);
    assert!(text.contains("hello"), "missing output: {text}");
}

#[tokio::test]
async fn nonzero_exit_code_is_reported() {
    let (status, _output) = run_and_capture(
        &lines(&["exit 3"]),
        &HashMap::new(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(!status.success());
    assert_eq!(status.exit_code, 3);
    assert!(!status.signaled());
}

#[tokio::test]
async fn fail_fast_stops_at_first_failure() {
    let (status, output) = run_and_capture(
        &lines(&["false", "echo unreachable"]),
        &HashMap::new(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(!status.success());
    assert!(!String::from_utf8_lossy(&output).contains("unreachable"));
}

#[tokio::test]
async fn build_environment_reaches_the_script() {
    let env: HashMap<String, String> =
        [("BUILD_FLAVOR".to_string(), "nightly".to_string())].into();
    let (status, output) = run_and_capture(
        &lines(&["echo flavor=$BUILD_FLAVOR"]),
        &env,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(status.success());
    assert!(String::from_utf8_lossy(&output).contains("flavor=nightly"));
}

#[cfg(unix)]
#[tokio::test]
async fn self_signaled_process_is_flagged() {
    let (status, _output) = run_and_capture(
        &lines(&["kill -TERM $$", "sleep 5"]),
        &HashMap::new(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(status.signaled());
    assert_eq!(status.signal, Some(15));
}

#[cfg(unix)]
#[tokio::test]
async fn deadline_kills_the_whole_process_tree() {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let dir = tempfile::tempdir().unwrap();
    let pidfile = dir.path().join("grandchild.pid");
    let script = lines(&[
        &format!("sleep 60 & echo $! > {}", pidfile.display()),
        "sleep 60",
    ]);

    let (handler, _buffer) = capture();
    let mut session = ShellSession::spawn(&script, &HashMap::new(), handler).unwrap();

    // Give the script a moment to fork the grandchild and record its pid.
    let mut grandchild = None;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if let Ok(content) = std::fs::read_to_string(&pidfile) {
            if let Ok(pid) = content.trim().parse::<i32>() {
                grandchild = Some(pid);
                break;
            }
        }
    }
    let grandchild = grandchild.expect("grandchild pid never appeared");

    let cancel = CancellationToken::new();
    cancel.cancel();

    let start = Instant::now();
    let result = session.wait(&cancel).await;
    assert!(matches!(result, Err(ProcessError::TimedOut)));
    // Wait must come back promptly, not sit out the full sleep.
    assert!(start.elapsed() < Duration::from_secs(10));

    // The detached grandchild must be gone too. Allow the kernel a moment
    // to deliver the group SIGKILL.
    let mut dead = false;
    for _ in 0..100 {
        if kill(Pid::from_raw(grandchild), None).is_err() {
            dead = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(dead, "grandchild {grandchild} survived the group kill");
}

#[cfg(unix)]
#[tokio::test]
async fn background_session_kill_terminates_child() {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let (handler, _buffer) = capture();
    let mut session =
        ShellSession::spawn(&lines(&["sleep 60"]), &HashMap::new(), handler).unwrap();
    let pid = session.child_id().expect("child pid");

    session.kill().await.unwrap();

    let mut dead = false;
    for _ in 0..100 {
        if kill(Pid::from_raw(pid as i32), None).is_err() {
            dead = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(dead, "background child survived kill()");
}

#[tokio::test]
async fn timed_out_is_not_signaled_to_exit() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = run_and_capture(&lines(&["sleep 30"]), &HashMap::new(), &cancel)
        .await
        .unwrap_err();
    // The distinguished TimedOut condition, not a signal exit.
    assert!(matches!(err, ProcessError::TimedOut));
}

#[tokio::test]
async fn direct_mode_runs_without_a_shell() {
    let env: HashMap<String, String> =
        [("CIRRUS_SHELL".to_string(), "direct".to_string())].into();
    let (status, output) = run_and_capture(
        &lines(&["echo direct-mode"]),
        &env,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(status.success());
    assert!(String::from_utf8_lossy(&output).contains("direct-mode"));
}
