//! Message types for model communication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Text of the user-role message recorded when a turn is aborted.
pub const ABORT_MARKER_TEXT: &str = "Operation aborted by user.";

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMessage {
    pub role: Role,
    pub content: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ModelMessage {
    fn new(role: Role, content: Vec<ContentPart>) -> Self {
        Self {
            role,
            content,
            timestamp: Some(Utc::now()),
        }
    }

    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![ContentPart::Text { text: text.into() }])
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentPart::Text { text: text.into() }])
    }

    /// Create an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentPart::Text { text: text.into() }])
    }

    /// Assistant message carrying the tool-use blocks of one turn, preceded by
    /// any text the model emitted alongside them.
    pub fn assistant_tool_uses(text: &str, blocks: Vec<ToolUseBlock>) -> Self {
        let mut content = Vec::with_capacity(blocks.len() + 1);
        if !text.is_empty() {
            content.push(ContentPart::Text {
                text: text.to_string(),
            });
        }
        content.extend(blocks.into_iter().map(ContentPart::ToolUse));
        Self::new(Role::Assistant, content)
    }

    /// User-role message carrying every tool result of one turn.
    pub fn tool_results(results: Vec<ToolResultBlock>) -> Self {
        Self::new(
            Role::User,
            results.into_iter().map(ContentPart::ToolResult).collect(),
        )
    }

    /// The user-visible marker appended when a turn is aborted.
    pub fn abort_marker() -> Self {
        Self::user(ABORT_MARKER_TEXT)
    }

    pub fn is_abort_marker(&self) -> bool {
        self.role == Role::User && self.text() == ABORT_MARKER_TEXT
    }

    /// Extract the text content, concatenating all text parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Extract tool-use blocks from this message.
    pub fn tool_uses(&self) -> Vec<&ToolUseBlock> {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::ToolUse(block) => Some(block),
                _ => None,
            })
            .collect()
    }

    /// Extract tool-result blocks from this message.
    pub fn tool_result_blocks(&self) -> Vec<&ToolResultBlock> {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::ToolResult(block) => Some(block),
                _ => None,
            })
            .collect()
    }
}

/// Conversation role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single part of message content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
}

/// A tool call requested by the model, with fully parsed input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolUseBlock {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// The outcome of a tool call, as fed back to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}
