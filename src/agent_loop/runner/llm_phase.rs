//! Streaming one model turn from the provider.

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::{self, Instant, Sleep};
use tokio_util::sync::CancellationToken;

use super::TurnState;
use crate::agent_loop::StreamAccumulator;
use crate::config::LoopConfig;
use crate::error::{Result, WardenError};
use crate::events::SessionEmitter;
use crate::provider::{ModelProvider, ProviderRequest};
use crate::types::{ProviderStreamEvent, ToolUseBlock};
use crate::util::retry::RetryPolicy;
use crate::util::timeout::with_timeout;

pub(super) enum LlmPhaseOutcome {
    Ready {
        text: String,
        tool_uses: Vec<ToolUseBlock>,
    },
    Aborted,
}

pub(super) struct LlmPhaseArgs<'a> {
    pub(super) provider: &'a dyn ModelProvider,
    pub(super) request: &'a ProviderRequest,
    pub(super) config: &'a LoopConfig,
    pub(super) emitter: &'a SessionEmitter,
    pub(super) cancel: &'a CancellationToken,
    pub(super) state: &'a mut TurnState,
}

/// Stream one model turn. Opening the stream is retried; nothing is retried
/// once events have started to arrive.
pub(super) async fn run_llm_phase(args: LlmPhaseArgs<'_>) -> Result<LlmPhaseOutcome> {
    let LlmPhaseArgs {
        provider,
        request,
        config,
        emitter,
        cancel,
        state,
    } = args;

    let idle_ms = config.stream_idle_timeout_ms;
    let idle_timeout = Duration::from_millis(idle_ms);

    // An open attempt gets the same budget as a gap between events.
    let retry = RetryPolicy::from(&config.retry);
    let open = retry.execute(move || async move {
        if idle_ms > 0 {
            with_timeout(idle_timeout, provider.stream_turn(request)).await
        } else {
            provider.stream_turn(request).await
        }
    });
    let mut stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(LlmPhaseOutcome::Aborted),
        opened = open => opened?,
    };

    let mut idle_sleep = (idle_ms > 0).then(|| Box::pin(time::sleep(idle_timeout)));
    let mut acc = StreamAccumulator::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(LlmPhaseOutcome::Aborted),
            _ = idle(&mut idle_sleep) => {
                tracing::warn!(
                    session_id = emitter.session_id(),
                    idle_ms,
                    "provider stream went idle"
                );
                return Err(WardenError::Timeout(idle_ms));
            }
            next = stream.next() => next,
        };
        let Some(event) = next else {
            break;
        };
        let event = event?;
        if let Some(sleep) = idle_sleep.as_mut() {
            sleep.as_mut().reset(Instant::now() + idle_timeout);
        }

        match event {
            ProviderStreamEvent::TextDelta { text } => {
                if text.is_empty() {
                    continue;
                }
                announce_thinking(state, emitter);
                acc.push_text(&text);
                emitter.message_delta(&text);
            }
            ProviderStreamEvent::ToolUseStart { id, name } => {
                announce_thinking(state, emitter);
                acc.start_tool_use(&id, &name);
            }
            ProviderStreamEvent::ToolUseInputDelta { id, partial_json } => {
                acc.push_tool_input(&id, &partial_json);
            }
            ProviderStreamEvent::ToolUseStop { id } => {
                acc.finish_tool_use(&id);
            }
            ProviderStreamEvent::TurnStop { stop_reason } => {
                tracing::debug!(
                    session_id = emitter.session_id(),
                    stop_reason = stop_reason.as_deref().unwrap_or("unspecified"),
                    tool_uses = acc.tool_use_count(),
                    "model turn finished"
                );
                acc.mark_complete();
                break;
            }
            ProviderStreamEvent::Error { message } => {
                return Err(WardenError::Stream(message));
            }
            ProviderStreamEvent::MessageStart | ProviderStreamEvent::Ping => {}
        }
    }

    if !acc.is_complete() {
        tracing::debug!(
            session_id = emitter.session_id(),
            "stream closed without a turn stop"
        );
    }
    let (text, tool_uses) = acc.into_parts();
    Ok(LlmPhaseOutcome::Ready { text, tool_uses })
}

fn announce_thinking(state: &mut TurnState, emitter: &SessionEmitter) {
    if !state.thinking_announced {
        state.thinking_announced = true;
        emitter.thinking_done();
    }
}

async fn idle(sleep: &mut Option<Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}
