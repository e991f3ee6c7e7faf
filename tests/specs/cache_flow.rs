// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cache lifecycle specs across consecutive builds.

use crate::common::{populate_cache, script, upload_cache, SpecBuild};

fn cache_instructions() -> Vec<mason_core::Instruction> {
    vec![
        populate_cache(
            "node-modules",
            "${CIRRUS_WORKING_DIR}/node_modules",
            &[
                "mkdir -p node_modules",
                "echo left-pad > node_modules/left-pad.js",
            ],
        ),
        script("build", &["test -f node_modules/left-pad.js"]),
        upload_cache("upload-node-modules", "node-modules"),
    ]
}

#[tokio::test]
async fn first_build_populates_and_publishes_the_cache() {
    let build = SpecBuild::new(cache_instructions());
    build.run().await.unwrap();

    let reports = build.control.step_reports();
    assert!(reports.iter().all(|report| report.success));
    assert_eq!(build.blobs.put_keys().len(), 1);

    let (_, attempts) = &build.control.finished_reports()[0];
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].name, "node-modules");
    assert!(!attempts[0].hit);
    assert!(attempts[0].populated);
}

#[tokio::test]
async fn second_build_restores_from_the_blob_store() {
    let first = SpecBuild::new(cache_instructions());
    first.run().await.unwrap();

    // The second attempt's populate script would poison the content if it
    // ran; a cache hit must restore the original instead.
    let second = SpecBuild::new(vec![
        populate_cache(
            "node-modules",
            "${CIRRUS_WORKING_DIR}/node_modules",
            &["echo poisoned > node_modules/left-pad.js"],
        ),
        script(
            "build",
            &["grep -q left-pad node_modules/left-pad.js"],
        ),
        upload_cache("upload-node-modules", "node-modules"),
    ])
    .sharing_blobs(&first);
    second.run().await.unwrap();

    let reports = second.control.step_reports();
    assert!(reports.iter().all(|report| report.success), "{reports:?}");

    let (_, attempts) = &second.control.finished_reports()[0];
    assert!(attempts[0].hit);
    assert!(!attempts[0].populated);

    // Unchanged content plus a known remote copy: nothing new published.
    assert_eq!(second.blobs.put_keys().len(), 1);
    assert!(second
        .streamed("upload-node-modules")
        .contains("Skipping change detection"));
}

#[tokio::test]
async fn cache_statistics_reach_the_final_report() {
    let build = SpecBuild::new(cache_instructions());
    build.run().await.unwrap();

    let (outcomes, attempts) = &build.control.finished_reports()[0];
    assert_eq!(outcomes.len(), 3);
    assert_eq!(attempts.len(), 1);
}
