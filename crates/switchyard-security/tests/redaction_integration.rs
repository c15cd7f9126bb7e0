#![allow(clippy::unwrap_used, clippy::expect_used)]

use serde_json::json;
use switchyard_core::RedactionOptions;
use switchyard_security::*;

fn verbose() -> RedactionOptions {
    RedactionOptions {
        enabled: true,
        keys: vec![],
        verbose_audit: true,
    }
}

// ---------------------------------------------------------------------------
// 1. Dictionary files
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dictionary_files_are_merged() {
    let dir = tempfile::tempdir().unwrap();
    let names = dir.path().join("names.txt");
    let emails = dir.path().join("emails.txt");
    std::fs::write(&names, "Grace Hopper\n\n  Ada  \n").unwrap();
    std::fs::write(&emails, "internal-alias\n").unwrap();

    let redactor = DictionaryRedactor::from_files(vec![names, emails]);
    redactor.initialize().await.unwrap();
    assert!(redactor.is_available().await);

    let out = redactor.redact(
        &json!({
            "content": [{"type": "text", "text": "grace hopper and ADA mailed internal-alias, call 415-555-0100"}]
        }),
        &verbose(),
    );
    assert_eq!(
        out["content"][0]["text"],
        "[REDACTED] and [REDACTED] mailed [REDACTED], call [REDACTED]"
    );
    assert_eq!(out["content"][0]["type"], "text");
}

#[tokio::test]
async fn empty_dictionary_file_is_an_init_error() {
    let dir = tempfile::tempdir().unwrap();
    let names = dir.path().join("names.txt");
    std::fs::write(&names, "\n \n").unwrap();

    let redactor = DictionaryRedactor::from_files(vec![names]);
    let err = redactor.initialize().await.unwrap_err();
    assert!(err.to_string().contains("Empty dictionary"));
}

// ---------------------------------------------------------------------------
// 2. Audit files
// ---------------------------------------------------------------------------

#[tokio::test]
async fn verbose_audit_writes_pre_and_post_files() {
    let dir = tempfile::tempdir().unwrap();
    let sink = FileAuditSink::new(dir.path());

    let before = json!({"text": "{\"owner\":\"Ada\"}"});
    let after = json!({"text": "{\"owner\":\"[REDACTED]\"}"});
    let op_id = sink
        .record("github", &verbose(), AuditOperation::ToolCall, &before, &after)
        .await
        .unwrap();
    assert!(!op_id.is_empty());

    let mut files: Vec<String> = std::fs::read_dir(dir.path().join("github"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();
    assert_eq!(files.len(), 2);
    assert!(files[0].ends_with(&format!("{op_id}-tool_call-post.json")));
    assert!(files[1].ends_with(&format!("{op_id}-tool_call-pre.json")));

    let pre: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("github").join(&files[1])).unwrap(),
    )
    .unwrap();
    assert_eq!(pre, json!({"text": {"owner": "Ada"}}));
}
