//! Invocation and outcome records.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::Display;

use crate::error::WardenError;

/// Terminal state of one tool invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Failed,
    Cancelled,
}

/// One tool call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub call_id: String,
    pub tool_name: String,
    pub parameters: Value,
    pub started_at: DateTime<Utc>,
}

impl ToolInvocation {
    pub fn new(call_id: impl Into<String>, tool_name: impl Into<String>, parameters: Value) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            parameters,
            started_at: Utc::now(),
        }
    }
}

/// Result of running one tool.
///
/// A tool that fails still produces an outcome: its error text is in
/// `output` so the model can react to it, and `error` stays `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub output: String,
    pub metadata: Map<String, Value>,
    pub duration_ms: u64,
    pub status: ToolStatus,
    pub error: Option<String>,
}

impl ToolOutcome {
    pub(crate) fn success(output: String, metadata: Map<String, Value>) -> Self {
        Self {
            output,
            metadata,
            duration_ms: 0,
            status: ToolStatus::Success,
            error: None,
        }
    }

    pub(crate) fn failed(message: String) -> Self {
        Self {
            output: message,
            metadata: Map::new(),
            duration_ms: 0,
            status: ToolStatus::Failed,
            error: None,
        }
    }

    pub(crate) fn cancelled() -> Self {
        Self {
            output: "Tool execution was cancelled.".to_string(),
            metadata: Map::new(),
            duration_ms: 0,
            status: ToolStatus::Cancelled,
            error: Some("cancelled".to_string()),
        }
    }

    /// Stamp the elapsed time into both the field and the metadata map.
    pub(crate) fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self.metadata
            .insert("duration_ms".to_string(), Value::from(duration_ms));
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }
}

/// Outcome of one call in a batch, matched back to its call id.
#[derive(Debug)]
pub struct CallOutcome {
    pub call_id: String,
    pub tool_name: String,
    pub result: Result<ToolOutcome, WardenError>,
}

/// Intermediate metadata tagged with the call it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolProgress {
    pub call_id: String,
    pub tool_name: String,
    pub metadata: Map<String, Value>,
}

/// Receives progress from every call in a batch.
pub type ProgressSink = Arc<dyn Fn(ToolProgress) + Send + Sync>;
