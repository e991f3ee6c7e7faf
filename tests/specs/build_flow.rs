// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Whole-build lifecycle specs.

use mason_core::{ExecutionBehavior, Instruction, InstructionKind};

use crate::common::{always, script, SpecBuild};

#[tokio::test]
async fn multi_step_build_reports_everything_in_order() {
    let build = SpecBuild::new(vec![
        script("prepare", &["echo preparing"]),
        script("compile", &["echo compiling"]),
        script("test", &["echo testing"]),
    ]);

    build.run().await.unwrap();

    assert_eq!(build.reported_names(), vec!["prepare", "compile", "test"]);

    let finished = build.control.finished_reports();
    assert_eq!(finished.len(), 1);
    let (outcomes, _attempts) = &finished[0];
    assert!(outcomes.iter().all(|outcome| outcome.success));
}

#[tokio::test]
async fn resume_runs_only_the_bounded_range() {
    let build = SpecBuild::new(vec![
        script("a", &["echo a"]),
        script("b", &["echo b"]),
        script("c", &["echo c"]),
        script("d", &["echo d"]),
    ]);

    let mut config = build.config();
    config.command_from = "b".to_string();
    config.command_to = "d".to_string();
    build.run_with(config).await.unwrap();

    assert_eq!(build.reported_names(), vec!["b", "c"]);
}

#[tokio::test]
async fn failure_flow_runs_diagnostics_and_cleanup_only() {
    let build = SpecBuild::new(vec![
        script("compile", &["echo ok"]),
        script("test", &["echo failing test output", "exit 2"]),
        script("package", &["echo never packaged"]),
        Instruction {
            name: "report-failure".to_string(),
            behavior: ExecutionBehavior::OnFailure,
            kind: InstructionKind::RunScript {
                lines: vec!["echo collecting failure details".to_string()],
            },
        },
        always("teardown", &["echo tearing down"]),
    ]);

    build.run().await.unwrap();

    assert_eq!(
        build.reported_names(),
        vec!["compile", "test", "report-failure", "teardown"]
    );

    let reports = build.control.step_reports();
    assert!(reports[0].success);
    assert!(!reports[1].success);
    assert!(reports[2].success);
    assert!(reports[3].success);
}

#[cfg(unix)]
#[tokio::test]
async fn background_watcher_lives_across_steps_and_dies_at_build_end() {
    use std::time::Duration;

    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let build = SpecBuild::new(vec![
        Instruction {
            name: "metrics-watcher".to_string(),
            behavior: ExecutionBehavior::OnSuccess,
            kind: InstructionKind::RunBackgroundScript {
                lines: vec![
                    "echo $$ > watcher.pid".to_string(),
                    "echo watcher-alive".to_string(),
                    "sleep 120".to_string(),
                ],
            },
        },
        script(
            "step-one",
            &[
                "for i in 1 2 3 4 5 6 7 8 9 10; do test -f watcher.pid && break; sleep 0.5; done",
                "test -f watcher.pid",
            ],
        ),
        script("step-two", &["echo still going"]),
    ]);

    build.run().await.unwrap();

    // All three steps succeeded while the watcher ran.
    let reports = build.control.step_reports();
    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|report| report.success));

    // After the build the watcher is dead and its log was flushed.
    let pid: i32 = std::fs::read_to_string(build.working_dir.join("watcher.pid"))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    let mut dead = false;
    for _ in 0..100 {
        if kill(Pid::from_raw(pid), None).is_err() {
            dead = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(dead, "watcher survived the build");
    assert!(build.saved("metrics-watcher").contains("watcher-alive"));
}

#[tokio::test]
async fn env_handoff_flows_through_the_whole_build() {
    let build = SpecBuild::new(vec![
        script(
            "detect-version",
            &[r#"echo "DETECTED_VERSION=1.42.0" >> "$CIRRUS_ENV""#],
        ),
        script("use-version", &["echo building version $DETECTED_VERSION"]),
    ]);

    build.run().await.unwrap();

    assert!(build
        .streamed("use-version")
        .contains("building version 1.42.0"));
}

#[tokio::test]
async fn exit_instruction_short_circuits_but_still_finishes_cleanly() {
    let build = SpecBuild::new(vec![
        script("first", &["echo first"]),
        Instruction {
            name: "stop-here".to_string(),
            behavior: ExecutionBehavior::Always,
            kind: InstructionKind::Exit,
        },
        script("unreachable", &["echo unreachable"]),
    ]);

    build.run().await.unwrap();

    // Exit reports nothing for itself and nothing after it runs.
    assert_eq!(build.reported_names(), vec!["first"]);
    assert_eq!(build.control.finished_reports().len(), 1);
}
