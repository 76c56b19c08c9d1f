//! Drives one user turn through provider streaming, permission gating and
//! tool execution until the model answers without tool use.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::types::{TurnRequest, TurnResult, TurnStatus};
use crate::config::LoopConfig;
use crate::error::{Result, WardenError};
use crate::events::{EventHub, SessionEmitter};
use crate::executor::ToolExecutor;
use crate::permission::PermissionArbiter;
use crate::provider::{ModelProvider, ProviderRequest};
use crate::store::{MessageStore, ToolAuditLog};
use crate::types::ModelMessage;
use crate::util::sync::{read_lock, write_lock};

mod llm_phase;
mod tool_phase;

#[cfg(test)]
mod tests;

use llm_phase::{run_llm_phase, LlmPhaseArgs, LlmPhaseOutcome};
use tool_phase::{ToolPhase, ToolPhaseOutcome};

/// Once-per-turn announcements.
#[derive(Debug, Default)]
pub(super) struct TurnState {
    pub(super) thinking_announced: bool,
    pub(super) tool_phase_announced: bool,
}

struct ActiveTurn {
    turn_id: Uuid,
    cancel: CancellationToken,
}

type ActiveTurns = Arc<RwLock<HashMap<String, ActiveTurn>>>;

/// Removes a turn from the active registry when the turn ends.
struct TurnRegistration {
    active: ActiveTurns,
    session_id: String,
    turn_id: Uuid,
}

impl Drop for TurnRegistration {
    fn drop(&mut self) {
        let mut active = write_lock(&self.active);
        if active
            .get(&self.session_id)
            .is_some_and(|turn| turn.turn_id == self.turn_id)
        {
            active.remove(&self.session_id);
        }
    }
}

/// Handle for an in-flight turn.
#[derive(Debug)]
pub struct TurnHandle {
    session_id: String,
    cancel: CancellationToken,
    result_rx: oneshot::Receiver<Result<TurnResult>>,
}

impl TurnHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Request an abort. Returns `false` if one was already requested.
    pub fn abort(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.cancel.cancel();
        true
    }

    pub async fn wait(self) -> Result<TurnResult> {
        self.result_rx.await.unwrap_or_else(|_| {
            Err(WardenError::InvalidState(
                "turn task ended without a result".to_string(),
            ))
        })
    }
}

/// The conversation orchestration loop. One instance serves every session.
pub struct ConversationLoop {
    provider: Arc<dyn ModelProvider>,
    executor: ToolExecutor,
    arbiter: Arc<PermissionArbiter>,
    hub: Arc<EventHub>,
    messages: Arc<dyn MessageStore>,
    audit: Arc<dyn ToolAuditLog>,
    config: LoopConfig,
    active: ActiveTurns,
}

impl ConversationLoop {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        executor: ToolExecutor,
        arbiter: Arc<PermissionArbiter>,
        hub: Arc<EventHub>,
        messages: Arc<dyn MessageStore>,
        audit: Arc<dyn ToolAuditLog>,
        config: LoopConfig,
    ) -> Self {
        Self {
            provider,
            executor,
            arbiter,
            hub,
            messages,
            audit,
            config,
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run a turn on the current task.
    pub async fn run_turn(&self, request: TurnRequest) -> Result<TurnResult> {
        let (registration, cancel) = self.register(&request.session_id)?;
        let result = self.drive(request, cancel.clone()).await;
        self.close_turn(registration, &cancel, result).await
    }

    /// Spawn a turn and return a handle to abort or await it.
    pub fn start(self: &Arc<Self>, request: TurnRequest) -> Result<TurnHandle> {
        let (registration, cancel) = self.register(&request.session_id)?;
        let (result_tx, result_rx) = oneshot::channel();
        let handle = TurnHandle {
            session_id: request.session_id.clone(),
            cancel: cancel.clone(),
            result_rx,
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let result = this.drive(request, cancel.clone()).await;
            let result = this.close_turn(registration, &cancel, result).await;
            let _ = result_tx.send(result);
        });
        Ok(handle)
    }

    /// Abort the session's running turn and cancel its pending permission
    /// requests. Returns whether a turn was running.
    pub fn abort_session(&self, session_id: &str) -> bool {
        // Cancelled under the registry lock so a turn that deregisters
        // afterwards always observes it.
        let running = {
            let active = read_lock(&self.active);
            let turn = active.get(session_id);
            if let Some(turn) = turn {
                turn.cancel.cancel();
            }
            turn.is_some()
        };
        self.arbiter.cancel_session_requests(session_id);
        tracing::debug!(session_id, running, "session abort");
        running
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        read_lock(&self.active).contains_key(session_id)
    }

    fn register(&self, session_id: &str) -> Result<(TurnRegistration, CancellationToken)> {
        let mut active = write_lock(&self.active);
        if active.contains_key(session_id) {
            return Err(WardenError::InvalidState(format!(
                "session {session_id} already has a turn in progress"
            )));
        }
        let turn_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        active.insert(
            session_id.to_string(),
            ActiveTurn {
                turn_id,
                cancel: cancel.clone(),
            },
        );
        Ok((
            TurnRegistration {
                active: Arc::clone(&self.active),
                session_id: session_id.to_string(),
                turn_id,
            },
            cancel,
        ))
    }

    async fn drive(&self, request: TurnRequest, cancel: CancellationToken) -> Result<TurnResult> {
        let TurnRequest {
            session_id,
            messages: mut history,
            system_prompt,
            concurrent_tools,
        } = request;
        let emitter = SessionEmitter::new(self.hub.clone(), session_id.clone());
        let system_prompt = system_prompt.or_else(|| self.config.system_prompt.clone());
        let tool_phase = ToolPhase {
            executor: &self.executor,
            arbiter: &self.arbiter,
            messages: self.messages.as_ref(),
            audit: self.audit.as_ref(),
            emitter: &emitter,
            cancel: &cancel,
            concurrent: concurrent_tools.unwrap_or(self.config.concurrent_tools),
        };
        let tools = self.executor.registry().definitions();
        let mut state = TurnState::default();
        let mut iterations = 0usize;
        tracing::debug!(session_id = %session_id, "turn started");

        loop {
            if cancel.is_cancelled() {
                return self
                    .finish_aborted(&emitter, history, iterations)
                    .await;
            }

            iterations += 1;
            if iterations > self.config.max_iterations {
                let err = WardenError::IterationLimit(self.config.max_iterations);
                emitter.error(&err.to_string());
                return Err(err);
            }
            tracing::debug!(session_id = %session_id, iteration = iterations, "provider request");

            let provider_request = ProviderRequest::new(session_id.clone(), history.clone())
                .with_system_prompt(system_prompt.clone())
                .with_tools(tools.clone());
            let phase = run_llm_phase(LlmPhaseArgs {
                provider: self.provider.as_ref(),
                request: &provider_request,
                config: &self.config,
                emitter: &emitter,
                cancel: &cancel,
                state: &mut state,
            })
            .await;

            let (text, tool_uses) = match phase {
                Ok(LlmPhaseOutcome::Ready { text, tool_uses }) => (text, tool_uses),
                Ok(LlmPhaseOutcome::Aborted) => {
                    return self
                        .finish_aborted(&emitter, history, iterations)
                        .await;
                }
                Err(err) => {
                    tracing::warn!(session_id = %session_id, error = %err, "turn failed");
                    emitter.error(&err.to_string());
                    return Err(err);
                }
            };

            if !tool_uses.is_empty() {
                match tool_phase
                    .run(&mut state, &mut history, text, tool_uses)
                    .await?
                {
                    ToolPhaseOutcome::Continue => continue,
                    ToolPhaseOutcome::Aborted => {
                        return self
                            .finish_aborted(&emitter, history, iterations)
                            .await;
                    }
                }
            }

            if text.is_empty() {
                tracing::debug!(session_id = %session_id, "empty model turn; requesting again");
                continue;
            }

            let message = ModelMessage::assistant(text.clone());
            self.messages.append(&session_id, &message).await?;
            emitter.message_completed(&text);
            history.push(message);
            tracing::debug!(session_id = %session_id, iterations, "turn completed");
            return Ok(TurnResult {
                session_id,
                status: TurnStatus::Completed,
                messages: history,
                final_text: Some(text),
                iterations,
            });
        }
    }

    /// Deregister a finished turn. An abort that arrived after the turn's
    /// last cancellation check is still recorded here.
    async fn close_turn(
        &self,
        registration: TurnRegistration,
        cancel: &CancellationToken,
        result: Result<TurnResult>,
    ) -> Result<TurnResult> {
        drop(registration);
        let mut turn = result?;
        if turn.status != TurnStatus::Completed || !cancel.is_cancelled() {
            return Ok(turn);
        }
        self.arbiter.cancel_session_requests(&turn.session_id);
        let marker = ModelMessage::abort_marker();
        self.messages.append(&turn.session_id, &marker).await?;
        turn.messages.push(marker);
        turn.status = TurnStatus::Aborted;
        SessionEmitter::new(self.hub.clone(), turn.session_id.clone()).turn_aborted();
        tracing::debug!(
            session_id = %turn.session_id,
            iterations = turn.iterations,
            "abort arrived after the final answer"
        );
        Ok(turn)
    }

    async fn finish_aborted(
        &self,
        emitter: &SessionEmitter,
        mut history: Vec<ModelMessage>,
        iterations: usize,
    ) -> Result<TurnResult> {
        let session_id = emitter.session_id();
        self.arbiter.cancel_session_requests(session_id);
        let marker = ModelMessage::abort_marker();
        self.messages.append(session_id, &marker).await?;
        history.push(marker);
        emitter.turn_aborted();
        tracing::debug!(session_id, iterations, "turn aborted");
        Ok(TurnResult {
            session_id: session_id.to_string(),
            status: TurnStatus::Aborted,
            messages: history,
            final_text: None,
            iterations,
        })
    }
}

impl std::fmt::Debug for ConversationLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationLoop")
            .field("provider", &self.provider.provider_name())
            .field("executor", &self.executor)
            .field("active_turns", &read_lock(&self.active).len())
            .field("config", &self.config)
            .finish()
    }
}
