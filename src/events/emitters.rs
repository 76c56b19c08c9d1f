//! Formatting helpers that publish the application's event vocabulary.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::{Event, EventHub, EventKind};
use crate::executor::ToolStatus;
use crate::permission::PermissionRequest;

/// Publishes events scoped to one session.
#[derive(Debug, Clone)]
pub struct SessionEmitter {
    hub: Arc<EventHub>,
    session_id: String,
}

impl SessionEmitter {
    pub fn new(hub: Arc<EventHub>, session_id: impl Into<String>) -> Self {
        Self {
            hub,
            session_id: session_id.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    /// Publish an arbitrary event for this session.
    pub fn emit(&self, kind: EventKind, data: Value) -> usize {
        self.hub
            .broadcast(Event::for_session(kind, self.session_id.clone(), data))
    }

    pub fn message_delta(&self, text: &str) {
        self.emit(EventKind::MessageDelta, json!({ "text": text }));
    }

    pub fn thinking_done(&self) {
        self.emit(EventKind::ThinkingDone, Value::Null);
    }

    pub fn message_completed(&self, text: &str) {
        self.emit(
            EventKind::MessageCompleted,
            json!({ "role": "assistant", "text": text }),
        );
    }

    pub fn tool_phase_started(&self, tool_count: usize) {
        self.emit(EventKind::ToolPhaseStarted, json!({ "toolCount": tool_count }));
    }

    pub fn tool_started(&self, call_id: &str, tool_name: &str, parameters: &Value) {
        self.emit(
            EventKind::ToolStarted,
            json!({
                "callId": call_id,
                "toolName": tool_name,
                "parameters": parameters,
            }),
        );
    }

    pub fn tool_progress(&self, call_id: &str, tool_name: &str, metadata: &Map<String, Value>) {
        self.emit(
            EventKind::ToolProgress,
            json!({
                "callId": call_id,
                "toolName": tool_name,
                "metadata": metadata,
            }),
        );
    }

    pub fn tool_completed(
        &self,
        call_id: &str,
        tool_name: &str,
        status: ToolStatus,
        duration_ms: u64,
        output: &str,
    ) {
        self.emit(
            EventKind::ToolCompleted,
            json!({
                "callId": call_id,
                "toolName": tool_name,
                "status": status,
                "durationMs": duration_ms,
                "output": output,
            }),
        );
    }

    pub fn permission_requested(&self, request: &PermissionRequest) {
        self.emit(
            EventKind::PermissionRequested,
            json!({
                "requestId": request.id,
                "toolName": request.tool_name,
                "parameters": request.parameters,
                "createdAt": request.created_at,
            }),
        );
    }

    pub fn permission_resolved(&self, request_id: &str, approved: bool) {
        self.emit(
            EventKind::PermissionResolved,
            json!({ "requestId": request_id, "approved": approved }),
        );
    }

    pub fn permission_timeout(&self, request_id: &str, tool_name: &str) {
        self.emit(
            EventKind::PermissionTimeout,
            json!({ "requestId": request_id, "toolName": tool_name }),
        );
    }

    pub fn turn_aborted(&self) {
        self.emit(EventKind::TurnAborted, Value::Null);
    }

    pub fn session_updated(&self, data: Value) {
        self.emit(EventKind::SessionUpdated, data);
    }

    pub fn file_changed(&self, path: &str) {
        self.emit(EventKind::FileChanged, json!({ "path": path }));
    }

    pub fn diff_updated(&self, path: &str, diff: &str) {
        self.emit(EventKind::DiffUpdated, json!({ "path": path, "diff": diff }));
    }

    pub fn error(&self, message: &str) {
        self.emit(EventKind::Error, json!({ "message": message }));
    }
}
