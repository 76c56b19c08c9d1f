//! Persistence collaborators consumed by the arbiter and the conversation loop.
//!
//! Concrete databases live outside this crate; the in-memory implementations
//! in [`memory`] back tests and single-process deployments.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::executor::ToolStatus;
use crate::permission::{PolicyVerdict, ScopeRestrictions};
use crate::types::ModelMessage;

pub use memory::{InMemoryAuditLog, InMemoryMessageStore, InMemoryPermissionStore};

/// A stored permission decision for one (session, tool) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PermissionRule {
    pub verdict: PolicyVerdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ScopeRestrictions>,
    pub granted_at: DateTime<Utc>,
    /// `None` means the rule never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl PermissionRule {
    pub fn new(verdict: PolicyVerdict) -> Self {
        Self {
            verdict,
            scope: None,
            granted_at: Utc::now(),
            expires_at: None,
        }
    }

    pub fn with_scope(mut self, scope: Option<ScopeRestrictions>) -> Self {
        self.scope = scope;
        self
    }

    pub fn expiring_after(mut self, ttl: Option<std::time::Duration>) -> Self {
        self.expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| self.granted_at + ttl);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Audit entry written for every tool call, executed or refused.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocationRecord {
    pub session_id: String,
    pub call_id: String,
    pub tool_name: String,
    pub parameters: serde_json::Value,
    pub output: String,
    pub duration_ms: u64,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// The persistence collaborators a runtime is assembled from.
#[derive(Clone)]
pub struct Stores {
    pub permissions: Arc<dyn PermissionStore>,
    pub messages: Arc<dyn MessageStore>,
    pub audit: Arc<dyn ToolAuditLog>,
}

impl Stores {
    /// Process-local stores; nothing survives a restart.
    pub fn in_memory() -> Self {
        Self {
            permissions: Arc::new(InMemoryPermissionStore::new()),
            messages: Arc::new(InMemoryMessageStore::new()),
            audit: Arc::new(InMemoryAuditLog::new()),
        }
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

/// Per-(session, tool) permission decisions.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn load(&self, session_id: &str, tool_name: &str) -> Result<Option<PermissionRule>>;

    async fn save(&self, session_id: &str, tool_name: &str, rule: PermissionRule) -> Result<()>;
}

/// Append-only chat history.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(&self, session_id: &str, message: &ModelMessage) -> Result<()>;

    async fn messages(&self, session_id: &str) -> Result<Vec<ModelMessage>>;
}

/// Tool invocation audit trail.
#[async_trait]
pub trait ToolAuditLog: Send + Sync {
    async fn record(&self, record: ToolInvocationRecord) -> Result<()>;
}
