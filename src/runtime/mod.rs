//! Assembles the runtime from its collaborators.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent_loop::{ConversationLoop, TurnHandle, TurnRequest};
use crate::config::WardenConfig;
use crate::error::Result;
use crate::events::EventHub;
use crate::executor::ToolExecutor;
use crate::gateway::Gateway;
use crate::permission::{spawn_sweeper, PermissionArbiter};
use crate::provider::ModelProvider;
use crate::store::Stores;
use crate::tools::ToolRegistry;

/// One hub, one arbiter, one executor and one loop, shared by every session.
///
/// Must be created inside a tokio runtime: construction spawns the permission
/// sweeper, which stops when the runtime is dropped.
pub struct WardenRuntime {
    config: WardenConfig,
    hub: Arc<EventHub>,
    arbiter: Arc<PermissionArbiter>,
    conversation: Arc<ConversationLoop>,
    gateway: Gateway,
    stores: Stores,
    shutdown: CancellationToken,
    sweeper: Option<JoinHandle<()>>,
}

impl WardenRuntime {
    pub fn new(
        config: WardenConfig,
        provider: Arc<dyn ModelProvider>,
        registry: Arc<dyn ToolRegistry>,
        stores: Stores,
    ) -> Result<Self> {
        config.validate()?;

        let hub = Arc::new(EventHub::new(config.hub.subscriber_capacity));
        let arbiter = Arc::new(PermissionArbiter::new(
            config.permission.clone(),
            stores.permissions.clone(),
            hub.clone(),
        ));
        let shutdown = CancellationToken::new();
        let sweeper = spawn_sweeper(&arbiter, shutdown.clone());
        let conversation = Arc::new(ConversationLoop::new(
            provider,
            ToolExecutor::new(registry),
            arbiter.clone(),
            hub.clone(),
            stores.messages.clone(),
            stores.audit.clone(),
            config.agent_loop.clone(),
        ));
        let gateway = Gateway::new(
            conversation.clone(),
            arbiter.clone(),
            hub.clone(),
            stores.messages.clone(),
        );
        tracing::info!(
            permission_timeout_secs = config.permission.timeout_secs,
            subscriber_capacity = config.hub.subscriber_capacity,
            max_iterations = config.agent_loop.max_iterations,
            "runtime assembled"
        );

        Ok(Self {
            config,
            hub,
            arbiter,
            conversation,
            gateway,
            stores,
            shutdown,
            sweeper: Some(sweeper),
        })
    }

    /// Start a turn in the background.
    pub fn start_turn(&self, request: TurnRequest) -> Result<TurnHandle> {
        self.conversation.start(request)
    }

    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    pub fn arbiter(&self) -> &Arc<PermissionArbiter> {
        &self.arbiter
    }

    pub fn conversation(&self) -> &Arc<ConversationLoop> {
        &self.conversation
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Stop background work. Turns already running are left to finish.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(sweeper) = self.sweeper.take() {
            let _ = sweeper.await;
        }
    }
}

impl Drop for WardenRuntime {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for WardenRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WardenRuntime")
            .field("conversation", &self.conversation)
            .field("gateway", &self.gateway)
            .finish_non_exhaustive()
    }
}
