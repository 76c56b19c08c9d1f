//! Shared test helpers and scripted provider.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;

use warden::config::WardenConfig;
use warden::error::Result;
use warden::events::{Event, EventKind, Subscriber};
use warden::permission::PolicyVerdict;
use warden::provider::{ModelProvider, ProviderRequest, ProviderStream};
use warden::runtime::WardenRuntime;
use warden::store::Stores;
use warden::tools::{AgentTool, Tool, ToolOutput, ToolParameters, ToolSet};
use warden::types::ProviderStreamEvent;

/// A provider that plays back queued turns, one per request.
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<Vec<ProviderStreamEvent>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            turns: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a text answer streamed in the given pieces.
    pub fn queue_text(&self, pieces: &[&str]) -> &Self {
        let mut events: Vec<ProviderStreamEvent> = pieces
            .iter()
            .map(|piece| ProviderStreamEvent::text(*piece))
            .collect();
        events.push(ProviderStreamEvent::turn_stop());
        self.turns.lock().unwrap().push_back(events);
        self
    }

    /// Queue a turn requesting one tool call.
    pub fn queue_tool_call(&self, id: &str, name: &str, input: Value) -> &Self {
        self.turns.lock().unwrap().push_back(vec![
            ProviderStreamEvent::MessageStart,
            ProviderStreamEvent::tool_use_start(id, name),
            ProviderStreamEvent::tool_input(id, input.to_string()),
            ProviderStreamEvent::tool_use_stop(id),
            ProviderStreamEvent::turn_stop(),
        ]);
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<ProviderRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    async fn stream_turn(&self, request: &ProviderRequest) -> Result<ProviderStream> {
        self.requests.lock().unwrap().push(request.clone());
        let events = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![ProviderStreamEvent::text("done"), ProviderStreamEvent::turn_stop()]);
        Ok(stream::iter(events.into_iter().map(Ok)).boxed())
    }
}

/// Tool writing into an in-memory "file system" log.
pub fn write_file_tool(written: Arc<Mutex<Vec<String>>>) -> Arc<dyn Tool> {
    Arc::new(AgentTool::new(
        "write_file",
        "write a file",
        ToolParameters::object()
            .string("path", "file path", true)
            .string("content", "file content", true)
            .build(),
        move |args, _ctx| {
            let written = written.clone();
            async move {
                let path = args.get_str("path")?.to_string();
                written.lock().unwrap().push(path.clone());
                Ok(ToolOutput::text(format!("wrote {path}")))
            }
        },
    ))
}

pub fn runtime_with(
    provider: Arc<ScriptedProvider>,
    tools: Vec<Arc<dyn Tool>>,
    default_verdict: PolicyVerdict,
) -> WardenRuntime {
    let mut config = WardenConfig::default();
    config.permission.default_verdict = default_verdict;
    WardenRuntime::new(
        config,
        provider,
        Arc::new(ToolSet::new(tools)),
        Stores::in_memory(),
    )
    .expect("runtime")
}

/// Wait for the next event of `kind`, skipping everything else.
pub async fn next_of(events: &mut Subscriber, kind: EventKind) -> Arc<Event> {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = events.recv().await.expect("hub closed");
            if event.kind == kind {
                return event;
            }
        }
    })
    .await
    .expect("event wait timeout")
}
