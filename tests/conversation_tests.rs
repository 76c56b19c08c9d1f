//! End-to-end turns through the assembled runtime and its gateway.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;

use common::{next_of, runtime_with, write_file_tool, ScriptedProvider};
use warden::agent_loop::{TurnRequest, TurnStatus};
use warden::error::WardenError;
use warden::events::EventKind;
use warden::gateway::{AbortOutcome, AbortRequest};
use warden::permission::{PermissionResponse, PolicyVerdict};
use warden::store::MessageStore;
use warden::types::{ModelMessage, Role};

fn write_request(session: &str) -> TurnRequest {
    TurnRequest::new(session, vec![ModelMessage::user("create notes.md")])
}

#[tokio::test]
async fn approved_write_runs_and_the_model_answers() {
    let provider = Arc::new(ScriptedProvider::new());
    provider
        .queue_tool_call("tu_1", "write_file", json!({ "path": "notes.md", "content": "# Notes" }))
        .queue_text(&["Created ", "notes.md"]);
    let written = Arc::new(Mutex::new(Vec::new()));
    let runtime = runtime_with(
        provider.clone(),
        vec![write_file_tool(written.clone())],
        PolicyVerdict::Ask,
    );
    let mut events = runtime.gateway().connect("s-1");

    let turn = runtime.start_turn(write_request("s-1")).unwrap();
    let requested = next_of(&mut events, EventKind::PermissionRequested).await;
    let request_id = requested.data["requestId"].as_str().unwrap().to_string();

    runtime
        .gateway()
        .submit_permission_response(PermissionResponse {
            request_id,
            session_id: "s-1".to_string(),
            approved: true,
            remember_choice: false,
        })
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), turn.wait())
        .await
        .expect("turn wait timeout")
        .unwrap();
    assert_eq!(result.status, TurnStatus::Completed);
    assert_eq!(result.final_text.as_deref(), Some("Created notes.md"));
    assert_eq!(*written.lock().unwrap(), vec!["notes.md".to_string()]);

    let stored = runtime.stores().messages.messages("s-1").await.unwrap();
    let roles: Vec<Role> = stored.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::Assistant, Role::User, Role::Assistant]);
    assert_eq!(provider.request_count(), 2);

    let follow_up = provider.last_request().unwrap();
    assert_eq!(follow_up.messages.len(), 3);
}

#[tokio::test]
async fn forged_session_cannot_answer_anothers_request() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.queue_tool_call("tu_1", "write_file", json!({ "path": "a", "content": "b" }));
    let written = Arc::new(Mutex::new(Vec::new()));
    let runtime = runtime_with(
        provider,
        vec![write_file_tool(written.clone())],
        PolicyVerdict::Ask,
    );
    let mut events = runtime.gateway().connect("victim");

    let turn = runtime.start_turn(write_request("victim")).unwrap();
    let requested = next_of(&mut events, EventKind::PermissionRequested).await;
    let request_id = requested.data["requestId"].as_str().unwrap().to_string();

    let err = runtime
        .gateway()
        .submit_permission_response(PermissionResponse {
            request_id: request_id.clone(),
            session_id: "attacker".to_string(),
            approved: true,
            remember_choice: true,
        })
        .unwrap_err();
    assert!(matches!(err, WardenError::Unauthorized(_)));
    assert!(runtime.arbiter().is_pending(&request_id));

    let outcome = runtime
        .gateway()
        .abort(AbortRequest::session("victim"))
        .await
        .unwrap();
    assert_eq!(outcome, AbortOutcome::TurnSignalled);
    let result = tokio::time::timeout(Duration::from_secs(2), turn.wait())
        .await
        .expect("turn wait timeout")
        .unwrap();
    assert_eq!(result.status, TurnStatus::Aborted);
    assert!(written.lock().unwrap().is_empty());
}

#[tokio::test]
async fn cancelling_the_pending_request_aborts_the_turn_once() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.queue_tool_call("tu_1", "write_file", json!({ "path": "a", "content": "b" }));
    let runtime = runtime_with(
        provider.clone(),
        vec![write_file_tool(Arc::new(Mutex::new(Vec::new())))],
        PolicyVerdict::Ask,
    );
    let mut events = runtime.gateway().connect("s-1");

    let turn = runtime.start_turn(write_request("s-1")).unwrap();
    let requested = next_of(&mut events, EventKind::PermissionRequested).await;
    let request_id = requested.data["requestId"].as_str().unwrap().to_string();

    let outcome = runtime
        .gateway()
        .abort(AbortRequest::request("s-1", request_id))
        .await
        .unwrap();
    assert_eq!(outcome, AbortOutcome::TurnSignalled);

    let result = tokio::time::timeout(Duration::from_secs(2), turn.wait())
        .await
        .expect("turn wait timeout")
        .unwrap();
    assert_eq!(result.status, TurnStatus::Aborted);
    next_of(&mut events, EventKind::TurnAborted).await;

    let stored = runtime.stores().messages.messages("s-1").await.unwrap();
    assert_eq!(stored.iter().filter(|m| m.is_abort_marker()).count(), 1);
    assert_eq!(provider.request_count(), 1);
}

#[tokio::test]
async fn sessions_receive_only_their_own_frames() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.queue_text(&["for one"]);
    provider.queue_text(&["for two"]);
    let runtime = runtime_with(provider, vec![], PolicyVerdict::Allow);
    let mut frames = runtime.gateway().event_frames("one");

    runtime
        .conversation()
        .run_turn(TurnRequest::new("one", vec![ModelMessage::user("hi")]))
        .await
        .unwrap();
    runtime
        .conversation()
        .run_turn(TurnRequest::new("two", vec![ModelMessage::user("hi")]))
        .await
        .unwrap();

    let mut texts = Vec::new();
    while let Ok(Some(frame)) =
        tokio::time::timeout(Duration::from_millis(100), frames.next()).await
    {
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["sessionId"], "one");
        if value["type"] == "message_completed" {
            texts.push(value["data"]["text"].as_str().unwrap().to_string());
        }
    }
    assert_eq!(texts, vec!["for one".to_string()]);
}

#[tokio::test]
async fn abort_without_a_running_turn_is_still_recorded() {
    let runtime = runtime_with(Arc::new(ScriptedProvider::new()), vec![], PolicyVerdict::Ask);

    let outcome = runtime
        .gateway()
        .abort(AbortRequest::session("idle"))
        .await
        .unwrap();

    assert_eq!(outcome, AbortOutcome::MarkerRecorded);
    let stored = runtime.stores().messages.messages("idle").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].is_abort_marker());
}

#[tokio::test]
async fn invalid_config_is_rejected_at_assembly() {
    let mut config = warden::config::WardenConfig::default();
    config.hub.subscriber_capacity = 0;

    let err = warden::runtime::WardenRuntime::new(
        config,
        Arc::new(ScriptedProvider::new()),
        Arc::new(warden::tools::ToolSet::default()),
        warden::store::Stores::in_memory(),
    )
    .unwrap_err();

    assert!(matches!(err, WardenError::Configuration(_)));
}
