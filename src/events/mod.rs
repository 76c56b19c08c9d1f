//! Push-channel events and the fan-out hub that delivers them.

pub mod emitters;
pub mod hub;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

pub use emitters::SessionEmitter;
pub use hub::{EventHub, Subscriber, SubscriberId};

/// Event vocabulary understood by UI clients.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    MessageDelta,
    ThinkingDone,
    MessageCompleted,
    ToolPhaseStarted,
    ToolStarted,
    ToolProgress,
    ToolCompleted,
    PermissionRequested,
    PermissionResolved,
    PermissionTimeout,
    TurnAborted,
    SessionUpdated,
    FileChanged,
    DiffUpdated,
    Error,
}

/// Envelope pushed to subscribers. Immutable once published; the hub shares
/// one allocation across every subscriber.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventKind, session_id: Option<String>, data: serde_json::Value) -> Self {
        Self {
            kind,
            session_id,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Event scoped to a session.
    pub fn for_session(
        kind: EventKind,
        session_id: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self::new(kind, Some(session_id.into()), data)
    }

    /// Event without a session, delivered to every subscriber.
    pub fn global(kind: EventKind, data: serde_json::Value) -> Self {
        Self::new(kind, None, data)
    }

    /// Serialize to the wire envelope.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
