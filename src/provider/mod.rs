//! Model provider boundary.
//!
//! Wire protocols live behind [`ModelProvider`]; the conversation loop only
//! sees the typed [`ProviderStreamEvent`] sequence.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{ModelMessage, ProviderStreamEvent};

/// A streaming request sent to a model provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub session_id: String,
    pub system_prompt: Option<String>,
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<ToolDefinition>,
}

impl ProviderRequest {
    pub fn new(session_id: impl Into<String>, messages: Vec<ModelMessage>) -> Self {
        Self {
            session_id: session_id.into(),
            system_prompt: None,
            messages,
            tools: Vec::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// Tool definition sent to the provider API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Stream of provider events for one model turn.
pub type ProviderStream = BoxStream<'static, Result<ProviderStreamEvent>>;

/// Core trait implemented by model provider clients.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name (e.g., "anthropic").
    fn provider_name(&self) -> &str;

    /// Open an incremental response for `request`.
    ///
    /// Errors returned here may be retried; errors yielded by the stream end
    /// the turn.
    async fn stream_turn(&self, request: &ProviderRequest) -> Result<ProviderStream>;
}
