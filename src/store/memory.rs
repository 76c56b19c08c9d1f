//! In-process store implementations.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;

use super::{MessageStore, PermissionRule, PermissionStore, ToolAuditLog, ToolInvocationRecord};
use crate::error::Result;
use crate::types::ModelMessage;
use crate::util::sync::{lock, read_lock, write_lock};

#[derive(Debug, Default)]
pub struct InMemoryPermissionStore {
    rules: RwLock<HashMap<(String, String), PermissionRule>>,
}

impl InMemoryPermissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        read_lock(&self.rules).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PermissionStore for InMemoryPermissionStore {
    async fn load(&self, session_id: &str, tool_name: &str) -> Result<Option<PermissionRule>> {
        let key = (session_id.to_string(), tool_name.to_string());
        Ok(read_lock(&self.rules).get(&key).cloned())
    }

    async fn save(&self, session_id: &str, tool_name: &str, rule: PermissionRule) -> Result<()> {
        write_lock(&self.rules).insert((session_id.to_string(), tool_name.to_string()), rule);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    sessions: RwLock<HashMap<String, Vec<ModelMessage>>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn append(&self, session_id: &str, message: &ModelMessage) -> Result<()> {
        write_lock(&self.sessions)
            .entry(session_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn messages(&self, session_id: &str) -> Result<Vec<ModelMessage>> {
        Ok(read_lock(&self.sessions)
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    records: Mutex<Vec<ToolInvocationRecord>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ToolInvocationRecord> {
        lock(&self.records).clone()
    }
}

#[async_trait]
impl ToolAuditLog for InMemoryAuditLog {
    async fn record(&self, record: ToolInvocationRecord) -> Result<()> {
        lock(&self.records).push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::PolicyVerdict;

    #[tokio::test]
    async fn permission_rules_are_keyed_by_session_and_tool() {
        let store = InMemoryPermissionStore::new();
        store
            .save("ses_1", "bash", PermissionRule::new(PolicyVerdict::Allow))
            .await
            .unwrap();

        assert!(store.load("ses_1", "bash").await.unwrap().is_some());
        assert!(store.load("ses_2", "bash").await.unwrap().is_none());
        assert!(store.load("ses_1", "write_file").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn messages_append_per_session() {
        let store = InMemoryMessageStore::new();
        store.append("ses_1", &ModelMessage::user("hi")).await.unwrap();
        store
            .append("ses_1", &ModelMessage::assistant("hello"))
            .await
            .unwrap();

        let history = store.messages("ses_1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(store.messages("ses_2").await.unwrap().is_empty());
    }
}
