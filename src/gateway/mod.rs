//! Boundary between UI clients and the runtime.
//!
//! Everything a remote client sends lands here first: permission decisions,
//! abort requests and push-channel connections. Decisions are checked against
//! the session that owns the request before they reach the arbiter.

use std::sync::Arc;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::agent_loop::ConversationLoop;
use crate::error::{PermissionError, Result, WardenError};
use crate::events::{EventHub, SessionEmitter, Subscriber, SubscriberId};
use crate::permission::{PermissionArbiter, PermissionRequest, PermissionResponse};
use crate::store::MessageStore;
use crate::types::ModelMessage;

/// Abort submitted by a client. Without `request_id` the whole session is
/// aborted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortRequest {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl AbortRequest {
    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            request_id: None,
        }
    }

    pub fn request(session_id: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            request_id: Some(request_id.into()),
        }
    }
}

/// What an abort did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortOutcome {
    /// A running turn was signalled; it records the abort marker itself.
    TurnSignalled,
    /// No turn was running; the marker was appended directly.
    MarkerRecorded,
}

#[derive(Clone)]
pub struct Gateway {
    conversation: Arc<ConversationLoop>,
    arbiter: Arc<PermissionArbiter>,
    hub: Arc<EventHub>,
    messages: Arc<dyn MessageStore>,
}

impl Gateway {
    pub fn new(
        conversation: Arc<ConversationLoop>,
        arbiter: Arc<PermissionArbiter>,
        hub: Arc<EventHub>,
        messages: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            conversation,
            arbiter,
            hub,
            messages,
        }
    }

    /// Deliver a client's permission decision.
    ///
    /// A decision naming a different session than the one that owns the
    /// request is rejected with [`WardenError::Unauthorized`] and never
    /// reaches the arbiter.
    pub fn submit_permission_response(&self, response: PermissionResponse) -> Result<()> {
        let owner = self
            .arbiter
            .request_session(&response.request_id)
            .ok_or_else(|| PermissionError::NotFound(response.request_id.clone()))?;
        if owner != response.session_id {
            tracing::warn!(
                target: "warden::security",
                request_id = %response.request_id,
                claimed_session = %response.session_id,
                owner_session = %owner,
                "cross-session permission response rejected"
            );
            return Err(WardenError::Unauthorized(format!(
                "permission request {} does not belong to session {}",
                response.request_id, response.session_id
            )));
        }
        self.arbiter.handle_response(response)
    }

    /// Abort one pending request or the whole session.
    pub async fn abort(&self, request: AbortRequest) -> Result<AbortOutcome> {
        let AbortRequest {
            session_id,
            request_id,
        } = request;

        let signalled = match request_id {
            Some(request_id) => {
                let owner = self
                    .arbiter
                    .request_session(&request_id)
                    .ok_or_else(|| PermissionError::NotFound(request_id.clone()))?;
                if owner != session_id {
                    tracing::warn!(
                        target: "warden::security",
                        request_id = %request_id,
                        claimed_session = %session_id,
                        owner_session = %owner,
                        "cross-session abort rejected"
                    );
                    return Err(WardenError::Unauthorized(format!(
                        "permission request {request_id} does not belong to session {session_id}"
                    )));
                }
                let running = self.conversation.is_active(&session_id);
                self.arbiter.cancel_request(&request_id)?;
                running
            }
            None => self.conversation.abort_session(&session_id),
        };

        if signalled {
            return Ok(AbortOutcome::TurnSignalled);
        }
        self.messages
            .append(&session_id, &ModelMessage::abort_marker())
            .await?;
        tracing::debug!(session_id = %session_id, "abort recorded without a running turn");
        Ok(AbortOutcome::MarkerRecorded)
    }

    /// Open a push channel for one session.
    pub fn connect(&self, session_id: &str) -> Subscriber {
        let subscriber = self.hub.register_for_session(session_id);
        tracing::debug!(session_id, subscriber_id = %subscriber.id(), "client connected");
        subscriber
    }

    pub fn disconnect(&self, id: SubscriberId) -> bool {
        self.hub.unregister(id)
    }

    /// Push channel as serialized envelopes, ready to be written to a socket.
    /// Dropping the stream disconnects the client.
    pub fn event_frames(&self, session_id: &str) -> BoxStream<'static, String> {
        let mut subscriber = self.connect(session_id);
        Box::pin(async_stream::stream! {
            while let Some(event) = subscriber.recv().await {
                match event.to_json() {
                    Ok(frame) => yield frame,
                    Err(err) => tracing::warn!(error = %err, kind = %event.kind, "unserializable event skipped"),
                }
            }
        })
    }

    /// Requests still waiting on a decision, for clients re-syncing after a
    /// reconnect.
    pub fn pending_permissions(&self, session_id: &str) -> Vec<PermissionRequest> {
        self.arbiter.pending_requests(session_id)
    }

    /// Publisher for session, file and diff notifications.
    pub fn notifier(&self, session_id: impl Into<String>) -> SessionEmitter {
        SessionEmitter::new(self.hub.clone(), session_id)
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("subscribers", &self.hub.subscriber_count())
            .field("pending_permissions", &self.arbiter.pending_count())
            .finish()
    }
}
