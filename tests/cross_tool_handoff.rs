mod common;

use common::mock_gateway;
use serde_json::{Map, Value, json};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tokio_util::sync::CancellationToken;

fn kwargs(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Install a fake `claude` binary that records its argv and emits a
/// stream-json result, then put it on PATH.
fn install_fake_claude(bin_dir: &Path, argv_log: &Path) {
    std::fs::create_dir_all(bin_dir).unwrap();
    let script = format!(
        "#!/bin/sh\n\
         printf '%s\\n' \"$@\" > {log}\n\
         echo '{{\"type\":\"system\",\"subtype\":\"init\",\"session_id\":\"cs_fake_1\"}}'\n\
         echo '{{\"type\":\"result\",\"subtype\":\"success\",\"result\":\"done by fake claude\",\"session_id\":\"cs_fake_1\"}}'\n",
        log = argv_log.display()
    );
    let path = bin_dir.join("claude");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

    let old_path = std::env::var("PATH").unwrap_or_default();
    // SAFETY: test-only env mutation, single test in this binary exercises it.
    unsafe {
        std::env::set_var("PATH", format!("{}:{}", bin_dir.display(), old_path));
    }
}

/// The full cross-tool story: API turns via consult_with, a handoff to a CLI
/// agent with injected context, then a same-CLI follow-up that resumes.
#[tokio::test]
async fn consult_then_work_with_injects_context_then_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let argv_log = dir.path().join("claude-argv.log");
    install_fake_claude(&dir.path().join("fakebin"), &argv_log);
    let gateway = mock_gateway(dir.path());
    let session = "handoff-1";

    // Two API turns first.
    for question in ["pick a queueing strategy", "and a retry policy"] {
        gateway
            .executor()
            .execute(
                "consult_with",
                kwargs(&[
                    ("model", json!("gpt-5.2")),
                    ("question", json!(question)),
                    ("session_id", json!(session)),
                    ("output_format", json!("markdown")),
                ]),
                CancellationToken::new(),
            )
            .await
            .unwrap();
    }

    // Handoff: the CLI agent must receive compacted context, not --resume.
    let content = gateway
        .executor()
        .execute(
            "work_with",
            kwargs(&[
                ("agent", json!("claude-sonnet-4-5")),
                ("task", json!("Continue the work")),
                ("session_id", json!(session)),
            ]),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(content.contains("done by fake claude"));

    let argv = std::fs::read_to_string(&argv_log).unwrap();
    assert!(!argv.contains("--resume"), "handoff must not resume: {argv}");
    assert!(
        argv.contains("Previous conversation context"),
        "compacted context missing from task: {argv}"
    );
    assert!(argv.contains("Current task: Continue the work"));
    assert!(argv.contains(&format!("Work from this directory: {}", dir.path().display())));

    let executor = gateway.executor().inner();
    let project = dir.path().file_name().unwrap().to_string_lossy().to_string();
    let history = executor
        .sessions()
        .get_history(&project, "session", session)
        .await
        .unwrap();
    let last = history.last().unwrap().as_chat().unwrap();
    assert_eq!(last.role, "assistant");
    assert_eq!(last.tool.as_deref(), Some("work_with"));
    let metadata = last.metadata.as_ref().unwrap();
    assert_eq!(metadata["context_injected"], true);
    assert_eq!(metadata["context_source"], "consult_with");
    assert_eq!(metadata["cli_name"], "claude");
    assert!(metadata.get("used_resume_flag").is_none());

    // Same CLI again: now the stored binding allows --resume.
    gateway
        .executor()
        .execute(
            "work_with",
            kwargs(&[
                ("agent", json!("claude-sonnet-4-5")),
                ("task", json!("One more step")),
                ("session_id", json!(session)),
            ]),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let argv = std::fs::read_to_string(&argv_log).unwrap();
    assert!(argv.contains("--resume"), "same-CLI follow-up must resume: {argv}");
    assert!(argv.contains("cs_fake_1"));
    assert!(
        !argv.contains("Previous conversation context"),
        "resumed call must not re-inject context: {argv}"
    );

    let history = executor
        .sessions()
        .get_history(&project, "session", session)
        .await
        .unwrap();
    let last = history.last().unwrap().as_chat().unwrap();
    let metadata = last.metadata.as_ref().unwrap();
    assert_eq!(metadata["used_resume_flag"], true);
    assert_eq!(metadata["resumed_from"], "cs_fake_1");
}

#[tokio::test]
async fn unknown_agent_model_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = mock_gateway(dir.path());
    let err = gateway
        .executor()
        .inner()
        .execute(
            "work_with",
            kwargs(&[
                ("agent", json!("mystery-model-9000")),
                ("task", json!("anything")),
                ("session_id", json!("s1")),
            ]),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not-found");
}
