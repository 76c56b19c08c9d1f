//! Permission arbitration: policy lookup, pending human decisions, scopes.

pub mod arbiter;
pub mod scope;
pub mod slot;
pub mod sweeper;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

pub use arbiter::PermissionArbiter;
pub use scope::{ScopeRestrictions, ScopeViolation};
pub use slot::ResponseSlot;
pub use sweeper::spawn_sweeper;

/// Outcome of a policy lookup.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PolicyVerdict {
    Allow,
    Deny,
    #[default]
    Ask,
}

/// Verdict plus the restrictions the caller must enforce.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyDecision {
    pub verdict: PolicyVerdict,
    pub scope: Option<ScopeRestrictions>,
}

impl PolicyDecision {
    pub fn new(verdict: PolicyVerdict) -> Self {
        Self {
            verdict,
            scope: None,
        }
    }

    pub fn with_scope(mut self, scope: Option<ScopeRestrictions>) -> Self {
        self.scope = scope.filter(|scope| !scope.is_empty());
        self
    }
}

/// A tool call waiting for a human decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    pub id: String,
    pub session_id: String,
    pub tool_name: String,
    pub parameters: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl PermissionRequest {
    pub fn new(
        session_id: impl Into<String>,
        tool_name: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            id: format!("perm_{}", Uuid::new_v4().simple()),
            session_id: session_id.into(),
            tool_name: tool_name.into(),
            parameters,
            created_at: Utc::now(),
        }
    }
}

/// Decision submitted by the UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionResponse {
    pub request_id: String,
    pub session_id: String,
    pub approved: bool,
    #[serde(default)]
    pub remember_choice: bool,
}

impl PermissionResponse {
    pub fn approve(request: &PermissionRequest) -> Self {
        Self {
            request_id: request.id.clone(),
            session_id: request.session_id.clone(),
            approved: true,
            remember_choice: false,
        }
    }

    pub fn deny(request: &PermissionRequest) -> Self {
        Self {
            approved: false,
            ..Self::approve(request)
        }
    }

    pub fn remembered(mut self) -> Self {
        self.remember_choice = true;
        self
    }
}

/// How a pending request left the pending set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Responded(PermissionResponse),
    Cancelled,
    TimedOut,
}
