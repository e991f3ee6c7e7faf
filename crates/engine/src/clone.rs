// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `Clone` instruction: repository checkout via the `git` CLI.

use std::collections::HashMap;
use std::path::Path;

use mason_core::{expand_text, WORKING_DIR_VAR};
use mason_logstream::LogSink;
use tokio_util::sync::CancellationToken;

/// Check out the repository described by the build environment into the
/// working directory. Returns false on any failure; details go to the
/// step's log sink.
pub(crate) async fn clone_repository(
    cancel: &CancellationToken,
    sink: &LogSink,
    env: &HashMap<String, String>,
) -> bool {
    sink.write_line("Using git CLI...");

    let working_dir = env.get(WORKING_DIR_VAR).cloned().unwrap_or_default();
    let change = env.get("CIRRUS_CHANGE_IN_REPO").cloned().unwrap_or_default();
    let branch = env.get("CIRRUS_BRANCH").cloned().unwrap_or_default();
    let pr_number = env.get("CIRRUS_PR").cloned();
    let tag = env.get("CIRRUS_TAG").cloned();
    let clone_submodules = env.get("CIRRUS_CLONE_SUBMODULES").map(String::as_str) == Some("true");

    let clone_url = if env.contains_key("CIRRUS_REPO_CLONE_TOKEN") {
        expand_text(
            "https://x-access-token:${CIRRUS_REPO_CLONE_TOKEN}@${CIRRUS_REPO_CLONE_HOST}/${CIRRUS_REPO_FULL_NAME}.git",
            env,
        )
    } else {
        env.get("CIRRUS_REPO_CLONE_URL").cloned().unwrap_or_default()
    };

    let clone_depth = env
        .get("CIRRUS_CLONE_DEPTH")
        .and_then(|depth| depth.parse::<u32>().ok())
        .unwrap_or(0);
    if clone_depth > 0 {
        sink.write_line(&format!("Limiting clone depth to {clone_depth}!"));
    }

    let checkout = |is_retry: bool| {
        checkout_once(
            cancel,
            sink,
            CheckoutPlan {
                working_dir: &working_dir,
                clone_url: &clone_url,
                change: &change,
                branch: &branch,
                pr_number: pr_number.as_deref(),
                tag: tag.as_deref(),
                clone_depth,
            },
            is_retry,
        )
    };

    match checkout(false).await {
        CheckoutResult::Done => {}
        CheckoutResult::Fatal => return false,
        CheckoutResult::Retryable(reason) => {
            sink.write_line(&format!("Retryable error '{reason}' while cloning! Trying again..."));
            let _ = std::fs::remove_dir_all(&working_dir);
            let _ = std::fs::create_dir_all(&working_dir);
            match checkout(true).await {
                CheckoutResult::Done => {}
                CheckoutResult::Fatal | CheckoutResult::Retryable(_) => return false,
            }
        }
    }

    // Make sure HEAD is exactly the requested change.
    if !change.is_empty() {
        let (ok, head) = git_capture(cancel, &["rev-parse", "HEAD"], &working_dir).await;
        if !ok {
            sink.write_line("Failed to get HEAD information!");
            return false;
        }
        if head.trim() != change {
            sink.write_line(&format!("HEAD is at {}.", head.trim()));
            sink.write_line(&format!("Hard resetting to {change}..."));
            if !run_git(cancel, sink, &["reset", "--hard", &change], &working_dir).await {
                sink.write_line(&format!("Failed to force reset to {change}!"));
                return false;
            }
        }
    }

    if clone_submodules {
        sink.write_line("Updating submodules...");
        if !run_git(
            cancel,
            sink,
            &["submodule", "update", "--init", "--recursive"],
            &working_dir,
        )
        .await
        {
            sink.write_line("Failed to update submodules!");
            return false;
        }
    }

    sink.write_line(&format!("Checked out {change} on {branch} branch."));
    sink.write_line("Successfully cloned!");
    true
}

struct CheckoutPlan<'a> {
    working_dir: &'a str,
    clone_url: &'a str,
    change: &'a str,
    branch: &'a str,
    pr_number: Option<&'a str>,
    tag: Option<&'a str>,
    clone_depth: u32,
}

enum CheckoutResult {
    Done,
    Retryable(String),
    Fatal,
}

async fn checkout_once(
    cancel: &CancellationToken,
    sink: &LogSink,
    plan: CheckoutPlan<'_>,
    is_retry: bool,
) -> CheckoutResult {
    if let Some(pr_number) = plan.pr_number {
        // PR builds fetch the head ref into a bare-init repository and
        // check out the change hash directly.
        let _ = std::fs::create_dir_all(plan.working_dir);
        for args in [
            vec!["init".to_string()],
            vec![
                "remote".to_string(),
                "add".to_string(),
                "origin".to_string(),
                plan.clone_url.to_string(),
            ],
        ] {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            if !run_git(cancel, sink, &args, plan.working_dir).await {
                return CheckoutResult::Fatal;
            }
        }

        let refspec = format!("+refs/pull/{pr_number}/head:refs/remotes/origin/pull/{pr_number}");
        sink.write_line(&format!("Fetching {refspec}..."));
        let mut fetch: Vec<String> = vec!["fetch".to_string()];
        if plan.clone_depth > 0 {
            fetch.push(format!("--depth={}", plan.clone_depth));
        }
        fetch.push("origin".to_string());
        fetch.push(refspec);
        let fetch_args: Vec<&str> = fetch.iter().map(String::as_str).collect();
        let (ok, stderr) = git_with_stderr(cancel, sink, &fetch_args, plan.working_dir).await;
        if !ok {
            sink.write_line("Failed fetch!");
            return classify(&stderr, is_retry);
        }

        if !run_git(cancel, sink, &["checkout", plan.change], plan.working_dir).await {
            sink.write_line(&format!("Failed to checkout {}!", plan.change));
            return CheckoutResult::Fatal;
        }
        return CheckoutResult::Done;
    }

    let reference = match plan.tag {
        Some(tag) => tag.to_string(),
        None => plan.branch.to_string(),
    };

    let mut args: Vec<String> = vec![
        "clone".to_string(),
        "--single-branch".to_string(),
        "--branch".to_string(),
        reference.clone(),
    ];
    if plan.tag.is_none() {
        args.push("--no-tags".to_string());
    }
    if plan.clone_depth > 0 {
        args.push(format!("--depth={}", plan.clone_depth));
    }
    args.push(plan.clone_url.to_string());
    args.push(plan.working_dir.to_string());

    sink.write_line(&format!("Cloning {reference}..."));
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let (ok, stderr) = git_with_stderr(cancel, sink, &arg_refs, ".").await;
    if !ok {
        if stderr.to_lowercase().contains("timeout") || stderr.to_lowercase().contains("timed out")
        {
            sink.write_line("Failed to clone because of a timeout from Git server!");
        } else {
            sink.write_line("Failed to clone!");
        }
        return classify(&stderr, is_retry);
    }

    CheckoutResult::Done
}

fn classify(stderr: &str, is_retry: bool) -> CheckoutResult {
    if !is_retry && retryable_clone_error(stderr) {
        CheckoutResult::Retryable(first_line(stderr))
    } else {
        CheckoutResult::Fatal
    }
}

fn retryable_clone_error(stderr: &str) -> bool {
    let message = stderr.to_lowercase();
    ["timeout", "tls", "connection", "authentication", "not found"]
        .iter()
        .any(|marker| message.contains(marker))
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or_default().to_string()
}

/// Run git, streaming output to the sink. Returns success.
async fn run_git(
    cancel: &CancellationToken,
    sink: &LogSink,
    args: &[&str],
    cwd: impl AsRef<Path>,
) -> bool {
    git_with_stderr(cancel, sink, args, cwd).await.0
}

async fn git_with_stderr(
    cancel: &CancellationToken,
    sink: &LogSink,
    args: &[&str],
    cwd: impl AsRef<Path>,
) -> (bool, String) {
    let mut command = tokio::process::Command::new("git");
    command
        .args(args)
        .current_dir(cwd)
        .env_remove("GIT_DIR")
        .env_remove("GIT_WORK_TREE");

    let output = tokio::select! {
        output = command.output() => output,
        _ = cancel.cancelled() => {
            sink.write_line("Cancelled while running git!");
            return (false, "cancelled".to_string());
        }
    };

    match output {
        Ok(output) => {
            if !output.stdout.is_empty() {
                sink.write(&output.stdout);
            }
            if !output.stderr.is_empty() {
                sink.write(&output.stderr);
            }
            (
                output.status.success(),
                String::from_utf8_lossy(&output.stderr).into_owned(),
            )
        }
        Err(e) => {
            sink.write_line(&format!("Failed to run git: {e}!"));
            (false, e.to_string())
        }
    }
}

/// Run git quietly, capturing stdout.
async fn git_capture(
    cancel: &CancellationToken,
    args: &[&str],
    cwd: impl AsRef<Path>,
) -> (bool, String) {
    let mut command = tokio::process::Command::new("git");
    command
        .args(args)
        .current_dir(cwd)
        .env_remove("GIT_DIR")
        .env_remove("GIT_WORK_TREE");

    let output = tokio::select! {
        output = command.output() => output,
        _ = cancel.cancelled() => return (false, String::new()),
    };

    match output {
        Ok(output) => (
            output.status.success(),
            String::from_utf8_lossy(&output.stdout).into_owned(),
        ),
        Err(_) => (false, String::new()),
    }
}
