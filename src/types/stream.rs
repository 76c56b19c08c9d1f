//! Streaming types emitted by a model provider.

use serde::{Deserialize, Serialize};

/// One typed event from an incremental provider response.
///
/// Tool arguments arrive as raw JSON fragments (`ToolUseInputDelta`) that only
/// form a parseable document once the block's `ToolUseStop` is seen.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderStreamEvent {
    /// Provider acknowledged the request; carries no content.
    MessageStart,
    /// Incremental assistant text.
    TextDelta { text: String },
    /// A tool-use block opened.
    ToolUseStart { id: String, name: String },
    /// Partial serialized arguments for an open tool-use block.
    ToolUseInputDelta { id: String, partial_json: String },
    /// The tool-use block is complete.
    ToolUseStop { id: String },
    /// Keep-alive.
    Ping,
    /// The model ended its turn.
    TurnStop {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
    },
    /// The provider reported an error mid-stream.
    Error { message: String },
}

impl ProviderStreamEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    pub fn tool_use_start(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ToolUseStart {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn tool_input(id: impl Into<String>, partial_json: impl Into<String>) -> Self {
        Self::ToolUseInputDelta {
            id: id.into(),
            partial_json: partial_json.into(),
        }
    }

    pub fn tool_use_stop(id: impl Into<String>) -> Self {
        Self::ToolUseStop { id: id.into() }
    }

    pub fn turn_stop() -> Self {
        Self::TurnStop { stop_reason: None }
    }
}
