// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Secret redaction across a whole build.

use std::collections::HashMap;

use crate::common::{script, SpecBuild};

#[tokio::test]
async fn secrets_never_appear_in_any_transmitted_log() {
    let secret = "sup3r-s3cr3t-t0ken";
    let environment: HashMap<String, String> =
        [("API_TOKEN".to_string(), secret.to_string())].into();

    let build = SpecBuild::with_response(
        vec![
            script("leaky", &["echo authenticating with $API_TOKEN"]),
            script("chatty", &["echo token=$API_TOKEN twice $API_TOKEN"]),
        ],
        environment,
        vec![secret.to_string()],
    );

    build.run().await.unwrap();

    for command in ["leaky", "chatty"] {
        let streamed = build.streamed(command);
        let saved = build.saved(command);
        assert!(
            !streamed.contains(secret),
            "{command} streamed log leaked the secret: {streamed}"
        );
        assert!(
            !saved.contains(secret),
            "{command} saved log leaked the secret: {saved}"
        );
        assert!(
            streamed.contains("HIDDEN-BY-MASON"),
            "{command} log should carry the placeholder: {streamed}"
        );
    }
}
