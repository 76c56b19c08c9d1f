//! Turn request/result types.

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::types::ModelMessage;

/// One user turn to drive to completion.
#[derive(Debug, Clone, Builder)]
pub struct TurnRequest {
    #[builder(into)]
    pub session_id: String,
    /// Conversation history, ending with the new user message.
    pub messages: Vec<ModelMessage>,
    /// Overrides the configured system prompt.
    #[builder(into)]
    pub system_prompt: Option<String>,
    /// Overrides the configured choice of concurrent tool execution.
    pub concurrent_tools: Option<bool>,
}

impl TurnRequest {
    pub fn new(session_id: impl Into<String>, messages: Vec<ModelMessage>) -> Self {
        Self {
            session_id: session_id.into(),
            messages,
            system_prompt: None,
            concurrent_tools: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_concurrent_tools(mut self, concurrent: bool) -> Self {
        self.concurrent_tools = Some(concurrent);
        self
    }
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    Aborted,
}

/// Final state of a turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnResult {
    pub session_id: String,
    pub status: TurnStatus,
    /// Full history including everything appended during the turn.
    pub messages: Vec<ModelMessage>,
    /// Text of the final assistant message, when the turn completed.
    pub final_text: Option<String>,
    /// Provider requests issued.
    pub iterations: usize,
}

impl TurnResult {
    pub fn is_completed(&self) -> bool {
        self.status == TurnStatus::Completed
    }
}
