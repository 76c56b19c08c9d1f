//! Runs validated tool calls as isolated, cancellable tasks.

mod outcome;

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use futures::future;
use serde_json::{Map, Value};

use crate::error::{Result, WardenError};
use crate::tools::{ToolArguments, ToolExecutionContext, ToolRegistry};

pub use outcome::{CallOutcome, ProgressSink, ToolInvocation, ToolOutcome, ToolProgress, ToolStatus};

/// Resolves tools from a registry and runs them with fault containment.
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<dyn ToolRegistry>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<dyn ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<dyn ToolRegistry> {
        &self.registry
    }

    /// Run one tool call.
    ///
    /// Unknown tools and invalid parameters are rejected before any task is
    /// spawned. Everything after that yields an outcome: faults and panics as
    /// [`ToolStatus::Failed`], a fired `ctx.cancel` as
    /// [`ToolStatus::Cancelled`].
    pub async fn execute(
        &self,
        tool_id: &str,
        parameters: Value,
        ctx: &ToolExecutionContext,
    ) -> Result<ToolOutcome> {
        let tool = self
            .registry
            .get(tool_id)
            .ok_or_else(|| WardenError::ToolNotFound(tool_id.to_string()))?;
        tool.validate(&parameters)?;

        let task_cancel = ctx.cancel.child_token();
        let mut task_ctx = ctx.clone();
        task_ctx.cancel = task_cancel.clone();
        let args = ToolArguments::new(tool_id, parameters);

        let started = Instant::now();
        let mut task = tokio::spawn(async move { tool.execute(&args, &task_ctx).await });

        let outcome = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                task_cancel.cancel();
                task.abort();
                ToolOutcome::cancelled()
            }
            joined = &mut task => match joined {
                Ok(Ok(output)) => ToolOutcome::success(output.output, output.metadata),
                Ok(Err(err)) => {
                    tracing::debug!(tool = tool_id, error = %err, "tool returned an error");
                    ToolOutcome::failed(format!("Error: {err}"))
                }
                Err(join_err) if join_err.is_panic() => {
                    let message = panic_message(join_err.into_panic());
                    tracing::error!(tool = tool_id, panic = %message, "tool panicked");
                    ToolOutcome::failed(format!("Error: tool '{tool_id}' panicked: {message}"))
                }
                Err(_) => ToolOutcome::cancelled(),
            },
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(
            tool = tool_id,
            call_id = ctx.tool_call_id.as_deref().unwrap_or_default(),
            status = %outcome.status,
            duration_ms,
            "tool finished"
        );
        Ok(outcome.with_duration(duration_ms))
    }

    /// Run every invocation concurrently and return outcomes in input order.
    ///
    /// One failing call never cancels the others. Progress reported by a tool
    /// reaches `sink` tagged with its call id.
    pub async fn execute_multiple(
        &self,
        invocations: Vec<ToolInvocation>,
        ctx: &ToolExecutionContext,
        sink: Option<ProgressSink>,
    ) -> Vec<CallOutcome> {
        let calls = invocations.into_iter().map(|invocation| {
            let mut call_ctx = ctx.clone().with_tool_call_id(invocation.call_id.clone());
            if let Some(sink) = sink.clone() {
                let call_id = invocation.call_id.clone();
                let tool_name = invocation.tool_name.clone();
                call_ctx = call_ctx.with_progress(Arc::new(move |metadata: Map<String, Value>| {
                    sink(ToolProgress {
                        call_id: call_id.clone(),
                        tool_name: tool_name.clone(),
                        metadata,
                    })
                }));
            }
            async move {
                let result = self
                    .execute(&invocation.tool_name, invocation.parameters, &call_ctx)
                    .await;
                CallOutcome {
                    call_id: invocation.call_id,
                    tool_name: invocation.tool_name,
                    result,
                }
            }
        });
        future::join_all(calls).await
    }
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("tools", &self.registry.definitions().len())
            .finish()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
