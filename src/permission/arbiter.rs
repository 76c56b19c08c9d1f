//! Pending-request state machine: `Pending -> Approved | Denied | TimedOut | Cancelled`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::time::{self, Instant};

use super::{
    PermissionRequest, PermissionResponse, PolicyDecision, PolicyVerdict, Resolution,
    ResponseSlot, ScopeRestrictions,
};
use crate::config::PermissionConfig;
use crate::error::{PermissionError, Result};
use crate::events::{EventHub, SessionEmitter};
use crate::store::{PermissionRule, PermissionStore};
use crate::util::sync::{read_lock, write_lock};

struct PendingRequest {
    request: PermissionRequest,
    created: Instant,
    slot: ResponseSlot<Resolution>,
    /// Taken by the single task allowed to wait on this request.
    receiver: Option<oneshot::Receiver<Resolution>>,
}

/// Owns every pending permission request and the policy lookup in front of it.
pub struct PermissionArbiter {
    pending: RwLock<HashMap<String, PendingRequest>>,
    store: Arc<dyn PermissionStore>,
    hub: Arc<EventHub>,
    config: PermissionConfig,
}

impl PermissionArbiter {
    pub fn new(
        config: PermissionConfig,
        store: Arc<dyn PermissionStore>,
        hub: Arc<EventHub>,
    ) -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            store,
            hub,
            config,
        }
    }

    pub fn config(&self) -> &PermissionConfig {
        &self.config
    }

    /// Look up the standing decision for a (session, tool) pair.
    ///
    /// Expired rules fall through to configured defaults. A failed lookup
    /// yields `Ask`, never `Allow`.
    pub async fn check_policy(&self, session_id: &str, tool_name: &str) -> PolicyDecision {
        match self.store.load(session_id, tool_name).await {
            Ok(Some(rule)) if !rule.is_expired(Utc::now()) => {
                PolicyDecision::new(rule.verdict).with_scope(rule.scope)
            }
            Ok(_) => PolicyDecision::new(self.default_verdict(tool_name)),
            Err(err) => {
                tracing::warn!(
                    session_id,
                    tool = tool_name,
                    error = %err,
                    "permission lookup failed; asking"
                );
                PolicyDecision::new(PolicyVerdict::Ask)
            }
        }
    }

    fn default_verdict(&self, tool_name: &str) -> PolicyVerdict {
        self.config
            .tool_defaults
            .get(tool_name)
            .copied()
            .unwrap_or(self.config.default_verdict)
    }

    /// Register a new pending request and return it for publication.
    pub fn create_request(
        &self,
        session_id: &str,
        tool_name: &str,
        parameters: serde_json::Value,
    ) -> PermissionRequest {
        let request = PermissionRequest::new(session_id, tool_name, parameters);
        let (slot, receiver) = ResponseSlot::channel();
        write_lock(&self.pending).insert(
            request.id.clone(),
            PendingRequest {
                request: request.clone(),
                created: Instant::now(),
                slot,
                receiver: Some(receiver),
            },
        );
        tracing::debug!(
            session_id,
            tool = tool_name,
            request_id = %request.id,
            "permission request created"
        );
        request
    }

    /// Push a pending request to connected UIs.
    pub fn publish_request(&self, request: &PermissionRequest) {
        SessionEmitter::new(self.hub.clone(), request.session_id.clone())
            .permission_requested(request);
    }

    /// Block until the request is answered, cancelled or times out.
    ///
    /// Timeout and cancellation come back as [`PermissionError::TimedOut`] and
    /// [`PermissionError::Cancelled`]. The request is gone from the pending set
    /// once this returns.
    pub async fn wait_for_response(&self, request_id: &str) -> Result<PermissionResponse> {
        let receiver = {
            let mut pending = write_lock(&self.pending);
            let entry = pending
                .get_mut(request_id)
                .ok_or_else(|| PermissionError::NotFound(request_id.to_string()))?;
            entry
                .receiver
                .take()
                .ok_or_else(|| PermissionError::AlreadyAwaited(request_id.to_string()))?
        };

        let timeout = self.config.timeout();
        let outcome = time::timeout(timeout, receiver).await;
        write_lock(&self.pending).remove(request_id);
        match outcome {
            Ok(Ok(Resolution::Responded(response))) => Ok(response),
            Ok(Ok(Resolution::TimedOut)) => Err(timed_out(request_id, timeout).into()),
            Ok(Ok(Resolution::Cancelled)) | Ok(Err(_)) => {
                Err(PermissionError::Cancelled(request_id.to_string()).into())
            }
            Err(_) => {
                tracing::warn!(
                    request_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "permission request timed out"
                );
                Err(timed_out(request_id, timeout).into())
            }
        }
    }

    /// Deliver a decision. A request that is no longer pending yields
    /// `NotFound` and nothing else happens.
    pub fn handle_response(&self, response: PermissionResponse) -> Result<()> {
        let request_id = response.request_id.clone();
        let approved = response.approved;
        resolve_locked(
            &mut write_lock(&self.pending),
            &request_id,
            Resolution::Responded(response),
        )
        .ok_or_else(|| PermissionError::NotFound(request_id.clone()))?;
        tracing::debug!(request_id = %request_id, approved, "permission response delivered");
        Ok(())
    }

    /// Session that owns a pending request.
    pub fn request_session(&self, request_id: &str) -> Option<String> {
        read_lock(&self.pending)
            .get(request_id)
            .filter(|entry| !entry.slot.is_resolved())
            .map(|entry| entry.request.session_id.clone())
    }

    pub fn is_pending(&self, request_id: &str) -> bool {
        read_lock(&self.pending)
            .get(request_id)
            .is_some_and(|entry| !entry.slot.is_resolved())
    }

    pub fn pending_count(&self) -> usize {
        read_lock(&self.pending)
            .values()
            .filter(|entry| !entry.slot.is_resolved())
            .count()
    }

    pub fn pending_requests(&self, session_id: &str) -> Vec<PermissionRequest> {
        read_lock(&self.pending)
            .values()
            .filter(|entry| entry.request.session_id == session_id && !entry.slot.is_resolved())
            .map(|entry| entry.request.clone())
            .collect()
    }

    /// Resolve every pending request of a session as cancelled in one pass.
    pub fn cancel_session_requests(&self, session_id: &str) -> usize {
        let cancelled = {
            let mut pending = write_lock(&self.pending);
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, entry)| {
                    entry.request.session_id == session_id && !entry.slot.is_resolved()
                })
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter()
                .filter_map(|id| resolve_locked(&mut pending, id, Resolution::Cancelled))
                .count()
        };
        if cancelled > 0 {
            tracing::debug!(
                session_id,
                count = cancelled,
                "cancelled pending permission requests"
            );
        }
        cancelled
    }

    /// Cancel one pending request.
    pub fn cancel_request(&self, request_id: &str) -> Result<()> {
        resolve_locked(&mut write_lock(&self.pending), request_id, Resolution::Cancelled)
            .ok_or_else(|| PermissionError::NotFound(request_id.to_string()))?;
        Ok(())
    }

    /// Force-resolve requests older than the timeout. Returns how many were
    /// still unresolved.
    pub fn sweep_expired(&self) -> usize {
        let timeout = self.config.timeout();
        let now = Instant::now();
        let expired: Vec<PendingRequest> = {
            let mut pending = write_lock(&self.pending);
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, entry)| now.saturating_duration_since(entry.created) >= timeout)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };
        let mut swept = 0;
        for entry in expired.iter().filter(|entry| !entry.slot.is_resolved()) {
            tracing::warn!(
                session_id = %entry.request.session_id,
                request_id = %entry.request.id,
                "sweeper resolved stale permission request"
            );
            // Nobody is waiting, so nobody else will announce the timeout.
            if entry.receiver.is_some() {
                SessionEmitter::new(self.hub.clone(), entry.request.session_id.clone())
                    .permission_timeout(&entry.request.id, &entry.request.tool_name);
            }
            entry.slot.fill(Resolution::TimedOut);
            swept += 1;
        }
        swept
    }

    /// Store an ad-hoc rule, optionally expiring after `ttl`.
    pub async fn grant(
        &self,
        session_id: &str,
        tool_name: &str,
        verdict: PolicyVerdict,
        scope: Option<ScopeRestrictions>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let rule = PermissionRule::new(verdict)
            .with_scope(scope)
            .expiring_after(ttl);
        self.store.save(session_id, tool_name, rule).await
    }

    /// Persist a "remember this choice" answer as a standing rule.
    pub async fn remember(&self, session_id: &str, tool_name: &str, approved: bool) -> Result<()> {
        let verdict = if approved {
            PolicyVerdict::Allow
        } else {
            PolicyVerdict::Deny
        };
        self.grant(session_id, tool_name, verdict, None, self.config.remember_ttl())
            .await
    }
}

/// Fill the slot for `id`. An entry whose waiter has not arrived yet stays
/// parked with its resolution until [`PermissionArbiter::wait_for_response`]
/// collects it.
fn resolve_locked(
    pending: &mut HashMap<String, PendingRequest>,
    id: &str,
    resolution: Resolution,
) -> Option<PermissionRequest> {
    let entry = pending.get(id)?;
    if entry.slot.is_resolved() {
        return None;
    }
    entry.slot.fill(resolution);
    let request = entry.request.clone();
    if entry.receiver.is_none() {
        pending.remove(id);
    }
    Some(request)
}

fn timed_out(request_id: &str, timeout: Duration) -> PermissionError {
    PermissionError::TimedOut {
        request_id: request_id.to_string(),
        after_ms: timeout.as_millis() as u64,
    }
}

impl std::fmt::Debug for PermissionArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionArbiter")
            .field("pending", &self.pending_count())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WardenError;
    use crate::events::EventKind;
    use crate::store::InMemoryPermissionStore;
    use async_trait::async_trait;
    use serde_json::json;

    struct FailingStore;

    #[async_trait]
    impl PermissionStore for FailingStore {
        async fn load(&self, _: &str, _: &str) -> Result<Option<PermissionRule>> {
            Err(WardenError::Storage("database unavailable".into()))
        }

        async fn save(&self, _: &str, _: &str, _: PermissionRule) -> Result<()> {
            Err(WardenError::Storage("database unavailable".into()))
        }
    }

    fn arbiter_with(config: PermissionConfig) -> (Arc<PermissionArbiter>, Arc<EventHub>) {
        let hub = Arc::new(EventHub::new(16));
        let arbiter = Arc::new(PermissionArbiter::new(
            config,
            Arc::new(InMemoryPermissionStore::new()),
            hub.clone(),
        ));
        (arbiter, hub)
    }

    fn arbiter() -> Arc<PermissionArbiter> {
        arbiter_with(PermissionConfig::default()).0
    }

    #[tokio::test]
    async fn lookup_failure_fails_safe_to_ask() {
        let arbiter = PermissionArbiter::new(
            PermissionConfig::builder()
                .default_verdict(PolicyVerdict::Allow)
                .build(),
            Arc::new(FailingStore),
            Arc::new(EventHub::new(4)),
        );
        let decision = arbiter.check_policy("ses_1", "bash").await;
        assert_eq!(decision.verdict, PolicyVerdict::Ask);
    }

    #[tokio::test]
    async fn tool_defaults_override_global_default() {
        let config = PermissionConfig::builder()
            .tool_defaults([("read_file".to_string(), PolicyVerdict::Allow)].into())
            .build();
        let (arbiter, _) = arbiter_with(config);

        assert_eq!(
            arbiter.check_policy("ses_1", "read_file").await.verdict,
            PolicyVerdict::Allow
        );
        assert_eq!(
            arbiter.check_policy("ses_1", "bash").await.verdict,
            PolicyVerdict::Ask
        );
    }

    #[tokio::test]
    async fn approved_response_reaches_waiter() {
        let arbiter = arbiter();
        let request = arbiter.create_request("ses_1", "bash", json!({ "command": "ls" }));

        let waiter = {
            let arbiter = arbiter.clone();
            let id = request.id.clone();
            tokio::spawn(async move { arbiter.wait_for_response(&id).await })
        };
        tokio::task::yield_now().await;
        arbiter
            .handle_response(PermissionResponse::approve(&request))
            .unwrap();

        let response = waiter.await.unwrap().unwrap();
        assert!(response.approved);
        assert!(!arbiter.is_pending(&request.id));
    }

    #[tokio::test]
    async fn response_before_wait_is_not_lost() {
        let arbiter = arbiter();
        let request = arbiter.create_request("ses_1", "bash", json!({}));

        arbiter
            .handle_response(PermissionResponse::deny(&request))
            .unwrap();
        assert!(!arbiter.is_pending(&request.id));

        let response = arbiter.wait_for_response(&request.id).await.unwrap();
        assert!(!response.approved);
        assert_eq!(arbiter.pending_count(), 0);
    }

    #[tokio::test]
    async fn second_response_is_not_found() {
        let arbiter = arbiter();
        let request = arbiter.create_request("ses_1", "bash", json!({}));

        assert!(arbiter
            .handle_response(PermissionResponse::approve(&request))
            .is_ok());
        let err = arbiter
            .handle_response(PermissionResponse::approve(&request))
            .unwrap_err();
        assert!(matches!(err, WardenError::Permission(PermissionError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_and_removes_request() {
        let arbiter = arbiter();
        let request = arbiter.create_request("ses_1", "bash", json!({}));

        let err = arbiter.wait_for_response(&request.id).await.unwrap_err();

        assert!(err.is_permission_timeout());
        assert_eq!(arbiter.pending_count(), 0);
    }

    #[tokio::test]
    async fn only_one_task_may_wait() {
        let arbiter = arbiter();
        let request = arbiter.create_request("ses_1", "bash", json!({}));
        let first = {
            let arbiter = arbiter.clone();
            let id = request.id.clone();
            tokio::spawn(async move { arbiter.wait_for_response(&id).await })
        };
        tokio::task::yield_now().await;

        let err = arbiter.wait_for_response(&request.id).await.unwrap_err();
        assert!(matches!(
            err,
            WardenError::Permission(PermissionError::AlreadyAwaited(_))
        ));

        arbiter.cancel_request(&request.id).unwrap();
        assert!(first.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn cancel_session_resolves_only_that_session() {
        let arbiter = arbiter();
        let mine_a = arbiter.create_request("ses_1", "bash", json!({}));
        let mine_b = arbiter.create_request("ses_1", "write_file", json!({}));
        let theirs = arbiter.create_request("ses_2", "bash", json!({}));

        let waiters: Vec<_> = [&mine_a, &mine_b]
            .into_iter()
            .map(|request| {
                let arbiter = arbiter.clone();
                let id = request.id.clone();
                tokio::spawn(async move { arbiter.wait_for_response(&id).await })
            })
            .collect();
        tokio::task::yield_now().await;

        assert_eq!(arbiter.cancel_session_requests("ses_1"), 2);
        for waiter in waiters {
            let err = waiter.await.unwrap().unwrap_err();
            assert!(matches!(err, WardenError::Permission(PermissionError::Cancelled(_))));
        }
        assert!(arbiter.is_pending(&theirs.id));
        assert_eq!(arbiter.pending_count(), 1);
    }

    #[test]
    fn cancelling_session_without_requests_is_a_noop() {
        let arbiter = arbiter();
        assert_eq!(arbiter.cancel_session_requests("ses_idle"), 0);
        assert_eq!(arbiter.cancel_session_requests("ses_idle"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_resolves_stale_unawaited_requests_and_announces_timeout() {
        let (arbiter, hub) = arbiter_with(PermissionConfig::default());
        let mut subscriber = hub.register();
        let stale = arbiter.create_request("ses_1", "bash", json!({}));

        time::advance(Duration::from_secs(5)).await;
        assert_eq!(arbiter.sweep_expired(), 0);

        time::advance(Duration::from_secs(30)).await;
        assert_eq!(arbiter.sweep_expired(), 1);
        assert!(!arbiter.is_pending(&stale.id));

        let event = subscriber.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::PermissionTimeout);
        assert_eq!(event.data["requestId"], stale.id.as_str());
    }

    #[tokio::test]
    async fn remembered_choice_becomes_standing_rule() {
        let arbiter = arbiter();
        arbiter.remember("ses_1", "bash", true).await.unwrap();

        assert_eq!(
            arbiter.check_policy("ses_1", "bash").await.verdict,
            PolicyVerdict::Allow
        );
        assert_eq!(
            arbiter.check_policy("ses_2", "bash").await.verdict,
            PolicyVerdict::Ask
        );
    }

    #[tokio::test]
    async fn expired_grant_falls_back_to_default() {
        let arbiter = arbiter();
        arbiter
            .grant(
                "ses_1",
                "bash",
                PolicyVerdict::Allow,
                None,
                Some(Duration::ZERO),
            )
            .await
            .unwrap();

        assert_eq!(
            arbiter.check_policy("ses_1", "bash").await.verdict,
            PolicyVerdict::Ask
        );
    }

    #[tokio::test]
    async fn grant_carries_scope_into_decision() {
        let arbiter = arbiter();
        let scope = ScopeRestrictions {
            command_prefixes: vec!["git".into()],
            ..Default::default()
        };
        arbiter
            .grant("ses_1", "bash", PolicyVerdict::Allow, Some(scope.clone()), None)
            .await
            .unwrap();

        let decision = arbiter.check_policy("ses_1", "bash").await;
        assert_eq!(decision.scope, Some(scope));
    }
}
