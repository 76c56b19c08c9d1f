//! Permission gating and execution of the tool calls a model turn requested.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::TurnState;
use crate::agent_loop::SESSION_ID_PARAM;
use crate::error::{PermissionError, Result, WardenError};
use crate::events::SessionEmitter;
use crate::executor::{ProgressSink, ToolExecutor, ToolInvocation, ToolOutcome, ToolProgress};
use crate::permission::{PermissionArbiter, PolicyVerdict};
use crate::store::{MessageStore, ToolAuditLog, ToolInvocationRecord};
use crate::tools::ToolExecutionContext;
use crate::types::{ModelMessage, ToolResultBlock, ToolUseBlock};

pub(super) enum ToolPhaseOutcome {
    Continue,
    Aborted,
}

/// Verdict of the permission gate for one call.
enum Gate {
    Proceed,
    Refused(String),
    Aborted,
}

/// Gates and executes the tool calls of one model turn.
pub(super) struct ToolPhase<'a> {
    pub(super) executor: &'a ToolExecutor,
    pub(super) arbiter: &'a PermissionArbiter,
    pub(super) messages: &'a dyn MessageStore,
    pub(super) audit: &'a dyn ToolAuditLog,
    pub(super) emitter: &'a SessionEmitter,
    pub(super) cancel: &'a CancellationToken,
    pub(super) concurrent: bool,
}

impl ToolPhase<'_> {
    /// Run every call, then record the assistant tool-use message and the
    /// matching results message. Both are recorded even when the turn was
    /// aborted part way through.
    pub(super) async fn run(
        &self,
        state: &mut TurnState,
        history: &mut Vec<ModelMessage>,
        text: String,
        tool_uses: Vec<ToolUseBlock>,
    ) -> Result<ToolPhaseOutcome> {
        if !state.tool_phase_announced {
            state.tool_phase_announced = true;
            self.emitter.tool_phase_started(tool_uses.len());
        }

        let outcomes = if self.concurrent {
            self.run_concurrent(&tool_uses).await
        } else {
            self.run_sequential(&tool_uses).await
        };
        let results = tool_uses
            .iter()
            .zip(&outcomes)
            .map(|(block, outcome)| ToolResultBlock {
                tool_use_id: block.id.clone(),
                content: outcome.output.clone(),
                is_error: !outcome.is_success(),
            })
            .collect();

        let session_id = self.emitter.session_id();
        let assistant = ModelMessage::assistant_tool_uses(&text, tool_uses);
        let results = ModelMessage::tool_results(results);
        self.messages.append(session_id, &assistant).await?;
        self.messages.append(session_id, &results).await?;
        history.push(assistant);
        history.push(results);

        if self.cancel.is_cancelled() {
            Ok(ToolPhaseOutcome::Aborted)
        } else {
            Ok(ToolPhaseOutcome::Continue)
        }
    }

    async fn run_sequential(&self, tool_uses: &[ToolUseBlock]) -> Vec<ToolOutcome> {
        let mut outcomes = Vec::with_capacity(tool_uses.len());
        for block in tool_uses {
            let params = inject_session_id(&block.input, self.emitter.session_id());
            let outcome = if self.cancel.is_cancelled() {
                self.settle_unrun(block, &params, ToolOutcome::cancelled())
                    .await
            } else {
                match self.authorize(block, &params).await {
                    Gate::Proceed => self.execute_one(block, params).await,
                    Gate::Refused(reason) => {
                        self.settle_unrun(block, &params, ToolOutcome::failed(reason))
                            .await
                    }
                    Gate::Aborted => {
                        self.cancel.cancel();
                        self.settle_unrun(block, &params, ToolOutcome::cancelled())
                            .await
                    }
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Gate every call in order, then run the approved ones as one batch.
    async fn run_concurrent(&self, tool_uses: &[ToolUseBlock]) -> Vec<ToolOutcome> {
        let mut outcomes: Vec<Option<ToolOutcome>> = vec![None; tool_uses.len()];
        let mut approved = Vec::new();

        for (index, block) in tool_uses.iter().enumerate() {
            let params = inject_session_id(&block.input, self.emitter.session_id());
            if self.cancel.is_cancelled() {
                outcomes[index] = Some(
                    self.settle_unrun(block, &params, ToolOutcome::cancelled())
                        .await,
                );
                continue;
            }
            match self.authorize(block, &params).await {
                Gate::Proceed => approved.push((index, params)),
                Gate::Refused(reason) => {
                    outcomes[index] = Some(
                        self.settle_unrun(block, &params, ToolOutcome::failed(reason))
                            .await,
                    );
                }
                Gate::Aborted => {
                    self.cancel.cancel();
                    outcomes[index] = Some(
                        self.settle_unrun(block, &params, ToolOutcome::cancelled())
                            .await,
                    );
                }
            }
        }

        let invocations = approved
            .iter()
            .map(|(index, params)| {
                let block = &tool_uses[*index];
                self.emitter.tool_started(&block.id, &block.name, params);
                ToolInvocation::new(block.id.clone(), block.name.clone(), params.clone())
            })
            .collect();
        let emitter = self.emitter.clone();
        let sink: ProgressSink = Arc::new(move |progress: ToolProgress| {
            emitter.tool_progress(&progress.call_id, &progress.tool_name, &progress.metadata);
        });
        let ctx = ToolExecutionContext::new(self.cancel.clone())
            .with_session_id(self.emitter.session_id());
        let calls = self
            .executor
            .execute_multiple(invocations, &ctx, Some(sink))
            .await;

        for ((index, params), call) in approved.into_iter().zip(calls) {
            let block = &tool_uses[index];
            let outcome = call.result.unwrap_or_else(rejected);
            self.settle(block, params, &outcome).await;
            outcomes[index] = Some(outcome);
        }

        outcomes
            .into_iter()
            .map(|outcome| outcome.unwrap_or_else(ToolOutcome::cancelled))
            .collect()
    }

    async fn execute_one(&self, block: &ToolUseBlock, params: Value) -> ToolOutcome {
        self.emitter.tool_started(&block.id, &block.name, &params);
        let emitter = self.emitter.clone();
        let call_id = block.id.clone();
        let tool_name = block.name.clone();
        let ctx = ToolExecutionContext::new(self.cancel.clone())
            .with_session_id(self.emitter.session_id())
            .with_tool_call_id(block.id.clone())
            .with_progress(Arc::new(move |metadata: Map<String, Value>| {
                emitter.tool_progress(&call_id, &tool_name, &metadata);
            }));

        let outcome = self
            .executor
            .execute(&block.name, params.clone(), &ctx)
            .await
            .unwrap_or_else(rejected);
        self.settle(block, params, &outcome).await;
        outcome
    }

    async fn authorize(&self, block: &ToolUseBlock, params: &Value) -> Gate {
        let session_id = self.emitter.session_id();
        let decision = self.arbiter.check_policy(session_id, &block.name).await;
        match decision.verdict {
            PolicyVerdict::Allow => {}
            PolicyVerdict::Deny => {
                tracing::debug!(session_id, tool = %block.name, "tool call denied by policy");
                return Gate::Refused(format!(
                    "Permission denied: tool '{}' is not allowed in this session.",
                    block.name
                ));
            }
            PolicyVerdict::Ask => match self.ask(block, params).await {
                Gate::Proceed => {}
                other => return other,
            },
        }

        if let Some(scope) = &decision.scope {
            if let Err(violation) = scope.check(params) {
                tracing::info!(
                    session_id,
                    tool = %block.name,
                    %violation,
                    "tool call outside granted scope"
                );
                return Gate::Refused(format!("Permission denied: {violation}."));
            }
        }
        Gate::Proceed
    }

    async fn ask(&self, block: &ToolUseBlock, params: &Value) -> Gate {
        let session_id = self.emitter.session_id();
        let request = self
            .arbiter
            .create_request(session_id, &block.name, params.clone());
        self.arbiter.publish_request(&request);

        let waited = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                let _ = self.arbiter.cancel_request(&request.id);
                return Gate::Aborted;
            }
            waited = self.arbiter.wait_for_response(&request.id) => waited,
        };

        match waited {
            Ok(response) => {
                self.emitter
                    .permission_resolved(&request.id, response.approved);
                if response.remember_choice {
                    if let Err(err) = self
                        .arbiter
                        .remember(session_id, &block.name, response.approved)
                        .await
                    {
                        tracing::warn!(
                            session_id,
                            tool = %block.name,
                            error = %err,
                            "failed to remember permission choice"
                        );
                    }
                }
                if response.approved {
                    Gate::Proceed
                } else {
                    Gate::Refused(format!(
                        "Permission denied by user for tool '{}'.",
                        block.name
                    ))
                }
            }
            Err(err) if err.is_permission_timeout() => {
                self.emitter
                    .permission_timeout(&request.id, &block.name);
                Gate::Refused(format!(
                    "Permission request for tool '{}' timed out.",
                    block.name
                ))
            }
            Err(WardenError::Permission(PermissionError::Cancelled(_))) => Gate::Aborted,
            Err(err) => {
                tracing::warn!(session_id, tool = %block.name, error = %err, "permission wait failed");
                Gate::Refused(format!("Permission request failed: {err}"))
            }
        }
    }

    /// Announce and record a call that never reached the executor.
    async fn settle_unrun(
        &self,
        block: &ToolUseBlock,
        params: &Value,
        outcome: ToolOutcome,
    ) -> ToolOutcome {
        self.emitter.tool_started(&block.id, &block.name, params);
        let outcome = outcome.with_duration(0);
        self.settle(block, params.clone(), &outcome).await;
        outcome
    }

    async fn settle(&self, block: &ToolUseBlock, params: Value, outcome: &ToolOutcome) {
        self.emitter.tool_completed(
            &block.id,
            &block.name,
            outcome.status,
            outcome.duration_ms,
            &outcome.output,
        );
        let record = ToolInvocationRecord {
            session_id: self.emitter.session_id().to_string(),
            call_id: block.id.clone(),
            tool_name: block.name.clone(),
            parameters: params,
            output: outcome.output.clone(),
            duration_ms: outcome.duration_ms,
            status: outcome.status,
            error: outcome.error.clone(),
            recorded_at: Utc::now(),
        };
        if let Err(err) = self.audit.record(record).await {
            tracing::warn!(
                session_id = self.emitter.session_id(),
                call_id = %block.id,
                error = %err,
                "failed to write tool audit record"
            );
        }
    }
}

/// An executor rejection (unknown tool, bad arguments) is fed back to the
/// model as a failed result.
fn rejected(err: WardenError) -> ToolOutcome {
    ToolOutcome::failed(format!("Error: {err}")).with_duration(0)
}

/// Copy of the model's parameters with the session id injected.
fn inject_session_id(input: &Value, session_id: &str) -> Value {
    let mut params = match input {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    params.insert(
        SESSION_ID_PARAM.to_string(),
        Value::String(session_id.to_string()),
    );
    Value::Object(params)
}
