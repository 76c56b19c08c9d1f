use super::*;

use std::collections::VecDeque;
use std::sync::Mutex;

use futures::stream::{self, StreamExt};
use tokio::sync::Notify;

use crate::provider::ProviderStream;
use crate::store::{InMemoryAuditLog, InMemoryMessageStore, InMemoryPermissionStore};
use crate::util::sync::lock;

pub(super) const SESSION: &str = "s-1";

/// What the provider does on one call.
pub(super) enum Script {
    Events(Vec<ProviderStreamEvent>),
    /// Stream the events, then stay open without sending anything else.
    Hang(Vec<ProviderStreamEvent>),
    /// Fail to open the stream.
    Fail(WardenError),
}

/// Provider that plays back one script per call. Once the scripts run out
/// every call answers "done".
pub(super) struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub(super) fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(super) fn requests(&self) -> Vec<ProviderRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    async fn stream_turn(&self, request: &ProviderRequest) -> Result<ProviderStream> {
        lock(&self.requests).push(request.clone());
        let script = lock(&self.scripts)
            .pop_front()
            .unwrap_or_else(|| text_script(&["done"]));
        match script {
            Script::Events(events) => Ok(stream::iter(events.into_iter().map(Ok)).boxed()),
            Script::Hang(events) => Ok(stream::iter(events.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed()),
            Script::Fail(err) => Err(err),
        }
    }
}

pub(super) fn text_script(parts: &[&str]) -> Script {
    let mut events: Vec<ProviderStreamEvent> =
        parts.iter().map(|part| ProviderStreamEvent::text(*part)).collect();
    events.push(ProviderStreamEvent::turn_stop());
    Script::Events(events)
}

/// One model turn requesting the given calls, each as `(id, tool, input)`.
pub(super) fn tool_script(calls: &[(&str, &str, Value)]) -> Script {
    let mut events = vec![ProviderStreamEvent::MessageStart];
    for (id, name, input) in calls {
        events.push(ProviderStreamEvent::tool_use_start(*id, *name));
        events.push(ProviderStreamEvent::tool_input(*id, input.to_string()));
        events.push(ProviderStreamEvent::tool_use_stop(*id));
    }
    events.push(ProviderStreamEvent::turn_stop());
    Script::Events(events)
}

pub(super) fn allow_all() -> PermissionConfig {
    PermissionConfig::builder()
        .default_verdict(PolicyVerdict::Allow)
        .build()
}

pub(super) fn ask_first() -> PermissionConfig {
    PermissionConfig::builder()
        .default_verdict(PolicyVerdict::Ask)
        .timeout_secs(5)
        .build()
}

pub(super) struct Harness {
    pub(super) runner: Arc<ConversationLoop>,
    pub(super) provider: Arc<ScriptedProvider>,
    pub(super) arbiter: Arc<PermissionArbiter>,
    pub(super) hub: Arc<EventHub>,
    pub(super) messages: Arc<InMemoryMessageStore>,
    pub(super) audit: Arc<InMemoryAuditLog>,
}

impl Harness {
    pub(super) fn new(
        scripts: Vec<Script>,
        tools: Vec<Arc<dyn Tool>>,
        permission: PermissionConfig,
    ) -> Self {
        Self::with_config(scripts, tools, permission, LoopConfig::default())
    }

    pub(super) fn with_config(
        scripts: Vec<Script>,
        tools: Vec<Arc<dyn Tool>>,
        permission: PermissionConfig,
        config: LoopConfig,
    ) -> Self {
        let provider = Arc::new(ScriptedProvider::new(scripts));
        let hub = Arc::new(EventHub::new(1024));
        let arbiter = Arc::new(PermissionArbiter::new(
            permission,
            Arc::new(InMemoryPermissionStore::new()),
            hub.clone(),
        ));
        let messages = Arc::new(InMemoryMessageStore::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let runner = Arc::new(ConversationLoop::new(
            provider.clone(),
            ToolExecutor::new(Arc::new(ToolSet::new(tools))),
            arbiter.clone(),
            hub.clone(),
            messages.clone(),
            audit.clone(),
            config,
        ));
        Self {
            runner,
            provider,
            arbiter,
            hub,
            messages,
            audit,
        }
    }

    pub(super) fn request(&self, prompt: &str) -> TurnRequest {
        TurnRequest::new(SESSION, vec![ModelMessage::user(prompt)])
    }

    pub(super) async fn stored(&self) -> Vec<ModelMessage> {
        self.messages
            .messages(SESSION)
            .await
            .expect("stored messages")
    }
}

/// Message store that holds every assistant message at the door until
/// released.
pub(super) struct GatedStore {
    inner: InMemoryMessageStore,
    pub(super) entered: Notify,
    pub(super) release: Notify,
}

impl GatedStore {
    fn new() -> Self {
        Self {
            inner: InMemoryMessageStore::new(),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl MessageStore for GatedStore {
    async fn append(&self, session_id: &str, message: &ModelMessage) -> Result<()> {
        if message.role == Role::Assistant {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.append(session_id, message).await
    }

    async fn messages(&self, session_id: &str) -> Result<Vec<ModelMessage>> {
        self.inner.messages(session_id).await
    }
}

/// Loop whose assistant messages go through a [`GatedStore`].
pub(super) fn gated_runner(
    scripts: Vec<Script>,
) -> (Arc<ConversationLoop>, Arc<GatedStore>, Arc<EventHub>) {
    let hub = Arc::new(EventHub::new(1024));
    let store = Arc::new(GatedStore::new());
    let arbiter = Arc::new(PermissionArbiter::new(
        allow_all(),
        Arc::new(InMemoryPermissionStore::new()),
        hub.clone(),
    ));
    let runner = Arc::new(ConversationLoop::new(
        Arc::new(ScriptedProvider::new(scripts)),
        ToolExecutor::new(Arc::new(ToolSet::default())),
        arbiter,
        hub.clone(),
        store.clone(),
        Arc::new(InMemoryAuditLog::new()),
        LoopConfig::default(),
    ));
    (runner, store, hub)
}

/// Wait until an event of `kind` arrives.
pub(super) async fn next_of(events: &mut Subscriber, kind: EventKind) -> Arc<Event> {
    timeout(Duration::from_secs(2), async {
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

pub(super) fn kinds(events: &[Arc<Event>]) -> Vec<EventKind> {
    events.iter().map(|event| event.kind).collect()
}

pub(super) fn count(events: &[Arc<Event>], kind: EventKind) -> usize {
    events.iter().filter(|event| event.kind == kind).count()
}

/// Tool echoing its `text` argument.
pub(super) fn echo_tool() -> Arc<dyn Tool> {
    Arc::new(AgentTool::new(
        "echo",
        "echo text back",
        ToolParameters::object()
            .string("text", "text to echo", true)
            .build(),
        |args, _ctx| async move { Ok(ToolOutput::text(format!("echo: {}", args.get_str("text")?))) },
    ))
}

/// Tool reporting the session id it was called for.
pub(super) fn whoami_tool() -> Arc<dyn Tool> {
    Arc::new(AgentTool::new(
        "whoami",
        "report the calling session",
        ToolParameters::empty(),
        |args, _ctx| async move { Ok(ToolOutput::text(args.session_id().unwrap_or("none"))) },
    ))
}

/// Tool that sleeps for `ms` before answering with its own name.
pub(super) fn sleepy_tool(name: &'static str, ms: u64) -> Arc<dyn Tool> {
    Arc::new(AgentTool::new(
        name,
        "sleep, then answer",
        ToolParameters::empty(),
        move |_args, _ctx| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(ToolOutput::text(name))
        },
    ))
}

/// Tool reading the `path` argument; used for scope checks.
pub(super) fn read_file_tool() -> Arc<dyn Tool> {
    Arc::new(AgentTool::new(
        "read_file",
        "read a file",
        ToolParameters::object()
            .string("path", "file path", true)
            .build(),
        |args, _ctx| async move { Ok(ToolOutput::text(format!("contents of {}", args.get_str("path")?))) },
    ))
}

/// Tool reporting two progress updates.
pub(super) fn progress_tool() -> Arc<dyn Tool> {
    Arc::new(AgentTool::new(
        "indexer",
        "index files",
        ToolParameters::empty(),
        |_args, ctx| async move {
            for done in [1, 2] {
                let mut metadata = serde_json::Map::new();
                metadata.insert("done".to_string(), json!(done));
                ctx.report_progress(metadata);
            }
            Ok(ToolOutput::text("indexed"))
        },
    ))
}
