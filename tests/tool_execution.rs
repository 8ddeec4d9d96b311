mod common;

use common::{mock_gateway, mock_record};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

fn kwargs(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[tokio::test]
async fn chat_call_inlines_context_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.md"), "the alpha file body").unwrap();
    let gateway = mock_gateway(dir.path());

    let content = gateway
        .executor()
        .execute(
            "chat_with_gpt52",
            kwargs(&[
                ("instructions", json!("summarize")),
                ("output_format", json!("text")),
                ("session_id", json!("exec-1")),
                ("context", json!([dir.path().to_string_lossy()])),
            ]),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let record = mock_record(&content);
    let prompt = record["prompt"].as_str().unwrap();
    assert!(prompt.contains("<instructions>"));
    assert!(prompt.contains("the alpha file body"));
    assert!(prompt.contains("notes.md"));
}

#[tokio::test]
async fn session_history_accumulates_across_turns() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = mock_gateway(dir.path());

    for expected_prior in [0, 2, 4] {
        let content = gateway
            .executor()
            .execute(
                "chat_with_gpt52",
                kwargs(&[
                    ("instructions", json!("another turn")),
                    ("output_format", json!("text")),
                    ("session_id", json!("multi-turn")),
                ]),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(mock_record(&content)["prior_turns"], expected_prior);
    }

    // A different session starts clean.
    let content = gateway
        .executor()
        .execute(
            "chat_with_gpt52",
            kwargs(&[
                ("instructions", json!("fresh")),
                ("output_format", json!("text")),
                ("session_id", json!("other-session")),
            ]),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(mock_record(&content)["prior_turns"], 0);
}

#[tokio::test]
async fn attachments_become_vector_stores() {
    let dir = tempfile::tempdir().unwrap();
    let blob = dir.path().join("diagram.bin");
    std::fs::write(&blob, [0u8, 1, 2, 3]).unwrap();
    let gateway = mock_gateway(dir.path());

    let content = gateway
        .executor()
        .execute(
            "chat_with_gpt52",
            kwargs(&[
                ("instructions", json!("look")),
                ("output_format", json!("text")),
                ("session_id", json!("attach-1")),
                ("attachments", json!([blob.to_string_lossy()])),
            ]),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let record = mock_record(&content);
    let ids = record["vector_store_ids"].as_array().unwrap();
    assert_eq!(ids.len(), 1, "attachment should produce one vector store");
}

#[tokio::test]
async fn unsupported_capability_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = mock_gateway(dir.path());

    // grok-4.1 does not expose reasoning_effort.
    let err = gateway
        .executor()
        .inner()
        .execute(
            "chat_with_grok41",
            kwargs(&[
                ("instructions", json!("go")),
                ("output_format", json!("text")),
                ("session_id", json!("caps-1")),
                ("reasoning_effort", json!("high")),
            ]),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "unsupported-capability");
}

#[tokio::test]
async fn unknown_tool_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = mock_gateway(dir.path());
    let err = gateway
        .executor()
        .inner()
        .execute("chat_with_hal9000", Map::new(), CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not-found");
}

#[tokio::test]
async fn cancellation_becomes_empty_success_at_the_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = mock_gateway(dir.path());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let content = gateway
        .executor()
        .execute(
            "chat_with_gpt52",
            kwargs(&[
                ("instructions", json!("never runs")),
                ("output_format", json!("text")),
                ("session_id", json!("cancelled-1")),
            ]),
            cancel,
        )
        .await
        .unwrap();
    assert_eq!(content, "");
}

#[tokio::test]
async fn list_sessions_reflects_activity() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = mock_gateway(dir.path());

    gateway
        .executor()
        .execute(
            "chat_with_gpt52",
            kwargs(&[
                ("instructions", json!("turn")),
                ("output_format", json!("text")),
                ("session_id", json!("listed-session")),
            ]),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let content = gateway
        .executor()
        .execute("list_sessions", Map::new(), CancellationToken::new())
        .await
        .unwrap();
    assert!(content.contains("listed-session"));
}

#[tokio::test]
async fn consult_with_routes_by_normalized_model_name() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = mock_gateway(dir.path());

    let content = gateway
        .executor()
        .execute(
            "consult_with",
            kwargs(&[
                ("model", json!("gpt-5.2")),
                ("question", json!("which database should we use")),
                ("session_id", json!("consult-1")),
                ("output_format", json!("markdown")),
            ]),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let record = mock_record(&content);
    assert_eq!(record["model"], "gpt-5.2");
    assert!(
        record["prompt"]
            .as_str()
            .unwrap()
            .contains("which database should we use")
    );

    // A second consultation sees the first as injected context.
    let content = gateway
        .executor()
        .execute(
            "consult_with",
            kwargs(&[
                ("model", json!("gpt-5.2")),
                ("question", json!("and which cache")),
                ("session_id", json!("consult-1")),
                ("output_format", json!("markdown")),
            ]),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    let record = mock_record(&content);
    assert!(
        record["prompt"]
            .as_str()
            .unwrap()
            .contains("Previous conversation context")
    );
}
