//! Wire-schema contract for every envelope the adapter writes.
//!
//! The host parses these lines; field names, casing and value shapes are
//! fixed here independently of the Rust types that produce them.

use serde_json::{json, Value};

use acp_adapter::acp::envelope::{CompletionStatus, Envelope, ErrorCode, Payload};

use crate::support::{capture_sink, test_identity, TEST_CONTAINER_ID, TEST_SWARM_ID};

fn keys(value: &Value) -> Vec<&str> {
    let mut keys: Vec<&str> = value
        .as_object()
        .expect("object")
        .keys()
        .map(String::as_str)
        .collect();
    keys.sort_unstable();
    keys
}

fn assert_envelope_shape(envelope: &Value, kind: &str) {
    assert_eq!(
        keys(envelope),
        vec!["containerId", "payload", "swarmId", "timestamp", "type"]
    );
    assert_eq!(envelope["type"], kind);
    assert_eq!(envelope["swarmId"], TEST_SWARM_ID);
    assert_eq!(envelope["containerId"], TEST_CONTAINER_ID);

    let ts = envelope["timestamp"].as_str().expect("timestamp string");
    let re = regex::Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}Z$").expect("regex");
    assert!(re.is_match(ts), "timestamp {ts} is not second-precision UTC");
}

#[tokio::test]
async fn progress_update_schema() {
    let (sink, capture) = capture_sink();
    sink.progress("US-000", "in_progress", "Cloning repository")
        .await
        .expect("write");

    let envelope = &capture.envelopes()[0];
    assert_envelope_shape(envelope, "progress-update");
    assert_eq!(
        envelope["payload"],
        json!({ "storyId": "US-000", "status": "in_progress", "output": "Cloning repository" })
    );
}

#[tokio::test]
async fn completion_schema() {
    let (sink, capture) = capture_sink();
    sink.completion(
        CompletionStatus::Failed,
        None,
        &["Agent exited with code 2".to_owned()],
    )
    .await
    .expect("write");

    let envelope = &capture.envelopes()[0];
    assert_envelope_shape(envelope, "completion");
    assert_eq!(
        envelope["payload"],
        json!({ "status": "failed", "prUrl": null, "errors": ["Agent exited with code 2"] })
    );
}

#[tokio::test]
async fn error_schema() {
    let (sink, capture) = capture_sink();
    sink.error(ErrorCode::MissingEnvVar, "Missing required environment variables: ANTHROPIC_API_KEY")
        .await
        .expect("write");

    let envelope = &capture.envelopes()[0];
    assert_envelope_shape(envelope, "error");
    assert_eq!(
        envelope["payload"],
        json!({
            "code": "MISSING_ENV_VAR",
            "message": "Missing required environment variables: ANTHROPIC_API_KEY"
        })
    );
}

#[test]
fn completion_statuses_serialise_lowercase() {
    for (status, wire) in [
        (CompletionStatus::Completed, "completed"),
        (CompletionStatus::Failed, "failed"),
        (CompletionStatus::Stopped, "stopped"),
    ] {
        assert_eq!(serde_json::to_value(status).expect("serialise"), json!(wire));
    }
}

#[test]
fn pr_url_is_emitted_when_present() {
    let envelope = Envelope::new(
        &test_identity(),
        Payload::completion(
            CompletionStatus::Completed,
            Some("https://example.com/pr/1".into()),
            &[],
        ),
    );
    let value = serde_json::to_value(&envelope).expect("serialise");
    assert_eq!(value["payload"]["prUrl"], "https://example.com/pr/1");
}

#[tokio::test]
async fn every_line_is_compact_json_terminated_by_newline() {
    let (sink, capture) = capture_sink();
    sink.progress("US-000", "in_progress", "multi\nline\noutput")
        .await
        .expect("write");
    sink.completion(CompletionStatus::Completed, None, &[])
        .await
        .expect("write");

    let text = capture.text();
    assert!(text.ends_with('\n'));
    assert_eq!(text.matches('\n').count(), 2);
    assert!(!text.contains(": "), "no pretty-printing on the wire");
}
