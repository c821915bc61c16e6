//! Delegation Engine (C9): one agent handing a task to another, with
//! bounded context, an append-only delegation chain, and a typed
//! lifecycle.
//!
//! The terminal-state guards here cover the full set
//! `{completed, failed, cancelled, timeout, rejected}` for both
//! `reject` and `cancel` — the upstream implementation this is grounded
//! on only blocks `cancel` from `{completed, failed}` and does not guard
//! `reject` at all, letting an already-rejected delegation be
//! "re-rejected". Both gaps are closed here.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use thiserror::Error;

use crate::pii::{ContextSharingProtocol, PiiBlockedError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationType {
    Full,
    Partial,
    Async,
    Parallel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationStatus {
    Pending,
    Accepted,
    Rejected,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl DelegationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DelegationStatus::Completed
                | DelegationStatus::Failed
                | DelegationStatus::Cancelled
                | DelegationStatus::Timeout
                | DelegationStatus::Rejected
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationContext {
    pub original_input: String,
    pub original_context: serde_json::Value,
    pub delegation_reason: String,
    pub delegated_capability: Option<String>,
    pub max_steps: Option<u32>,
    pub max_cost: Option<f64>,
    pub timeout_seconds: Option<u64>,
    pub delegation_chain: Vec<String>,
    pub shared_state: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum DelegationError {
    #[error("delegation {0} not found")]
    NotFound(Uuid),
    #[error("only the named delegatee may accept or reject a delegation")]
    NotDelegatee,
    #[error("delegation is in a terminal state and cannot be mutated")]
    Terminal,
    #[error("delegation {0} has expired")]
    Expired(Uuid),
    #[error("context blocked by PII policy: {0}")]
    Blocked(#[from] PiiBlockedError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationRequest {
    pub id: Uuid,
    pub delegator_id: String,
    pub delegatee_id: String,
    pub task_input: serde_json::Value,
    pub capability_id: String,
    pub context: DelegationContext,
    pub delegation_type: DelegationType,
    pub priority: u8,
    pub timeout_at: DateTime<Utc>,
    pub status: DelegationStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub cost: Option<f64>,
    pub steps: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

pub type ExecutionHandler = Arc<
    dyn Fn(DelegationRequest) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, String>> + Send>>
        + Send
        + Sync,
>;

type Callback = Box<dyn Fn(&DelegationRequest) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    created: Vec<Callback>,
    accepted: Vec<Callback>,
    completed: Vec<Callback>,
    failed: Vec<Callback>,
}

pub struct DelegationEngine {
    requests: RwLock<HashMap<Uuid, DelegationRequest>>,
    by_delegator: RwLock<HashMap<String, Vec<Uuid>>>,
    by_delegatee: RwLock<HashMap<String, Vec<Uuid>>>,
    handlers: RwLock<HashMap<String, ExecutionHandler>>,
    pii: Arc<ContextSharingProtocol>,
    callbacks: RwLock<Callbacks>,
}

impl DelegationEngine {
    pub fn new(pii: Arc<ContextSharingProtocol>) -> Self {
        Self {
            requests: RwLock::new(HashMap::new()),
            by_delegator: RwLock::new(HashMap::new()),
            by_delegatee: RwLock::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            pii,
            callbacks: RwLock::new(Callbacks::default()),
        }
    }

    pub async fn register_handler(&self, delegatee_id: impl Into<String>, handler: ExecutionHandler) {
        self.handlers.write().await.insert(delegatee_id.into(), handler);
    }

    pub async fn on_created<F: Fn(&DelegationRequest) + Send + Sync + 'static>(&self, f: F) {
        self.callbacks.write().await.created.push(Box::new(f));
    }
    pub async fn on_accepted<F: Fn(&DelegationRequest) + Send + Sync + 'static>(&self, f: F) {
        self.callbacks.write().await.accepted.push(Box::new(f));
    }
    pub async fn on_completed<F: Fn(&DelegationRequest) + Send + Sync + 'static>(&self, f: F) {
        self.callbacks.write().await.completed.push(Box::new(f));
    }
    pub async fn on_failed<F: Fn(&DelegationRequest) + Send + Sync + 'static>(&self, f: F) {
        self.callbacks.write().await.failed.push(Box::new(f));
    }

    /// Create a delegation: append `delegator_id` to the chain, run the
    /// shift-left PII scan on the context, persist, and (if a handler is
    /// registered for the delegatee) kick off background execution.
    pub async fn delegate(
        self: &Arc<Self>,
        delegator_id: impl Into<String>,
        delegatee_id: impl Into<String>,
        capability_id: impl Into<String>,
        task_input: serde_json::Value,
        mut context: DelegationContext,
        delegation_type: DelegationType,
        priority: u8,
        timeout_seconds: i64,
        tenant_id: &str,
        primary_plane_id: Option<&str>,
    ) -> Result<DelegationRequest, DelegationError> {
        let delegator_id = delegator_id.into();
        context.delegation_chain.push(delegator_id.clone());

        let safe = self
            .pii
            .process_ingress(context, tenant_id, primary_plane_id)
            .await?;

        let request = DelegationRequest {
            id: Uuid::new_v4(),
            delegator_id: delegator_id.clone(),
            delegatee_id: delegatee_id.into(),
            task_input,
            capability_id: capability_id.into(),
            context: safe.context,
            delegation_type,
            priority,
            timeout_at: Utc::now() + Duration::seconds(timeout_seconds),
            status: DelegationStatus::Pending,
            result: None,
            error: None,
            cost: None,
            steps: None,
            created_at: Utc::now(),
            completed_at: None,
        };

        {
            let mut requests = self.requests.write().await;
            self.by_delegator.write().await.entry(delegator_id).or_default().push(request.id);
            self.by_delegatee.write().await.entry(request.delegatee_id.clone()).or_default().push(request.id);
            requests.insert(request.id, request.clone());
        }

        self.fire(&self.callbacks.read().await.created, &request);

        if self.handlers.read().await.contains_key(&request.delegatee_id) {
            let this = Arc::clone(self);
            let id = request.id;
            tokio::spawn(async move {
                let _ = this.run_in_background(id).await;
            });
        }

        Ok(request)
    }

    fn fire(&self, callbacks: &[Callback], request: &DelegationRequest) {
        for cb in callbacks {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(request)));
            if result.is_err() {
                tracing::error!(delegation_id = %request.id, "delegation callback panicked");
            }
        }
    }

    pub async fn get(&self, id: Uuid) -> Option<DelegationRequest> {
        self.requests.read().await.get(&id).cloned()
    }

    pub async fn accept(&self, id: Uuid, delegatee_id: &str) -> Result<DelegationRequest, DelegationError> {
        let mut requests = self.requests.write().await;
        let req = requests.get_mut(&id).ok_or(DelegationError::NotFound(id))?;
        if req.delegatee_id != delegatee_id {
            return Err(DelegationError::NotDelegatee);
        }
        if req.status.is_terminal() {
            return Err(DelegationError::Terminal);
        }
        if Utc::now() > req.timeout_at {
            req.status = DelegationStatus::Timeout;
            return Err(DelegationError::Expired(id));
        }
        req.status = DelegationStatus::Accepted;
        let snapshot = req.clone();
        drop(requests);
        self.fire(&self.callbacks.read().await.accepted, &snapshot);
        Ok(snapshot)
    }

    pub async fn reject(&self, id: Uuid, delegatee_id: &str, reason: impl Into<String>) -> Result<DelegationRequest, DelegationError> {
        let mut requests = self.requests.write().await;
        let req = requests.get_mut(&id).ok_or(DelegationError::NotFound(id))?;
        if req.delegatee_id != delegatee_id {
            return Err(DelegationError::NotDelegatee);
        }
        if req.status.is_terminal() {
            return Err(DelegationError::Terminal);
        }
        req.status = DelegationStatus::Rejected;
        req.error = Some(reason.into());
        req.completed_at = Some(Utc::now());
        Ok(req.clone())
    }

    pub async fn cancel(&self, id: Uuid, reason: impl Into<String>) -> Result<DelegationRequest, DelegationError> {
        let mut requests = self.requests.write().await;
        let req = requests.get_mut(&id).ok_or(DelegationError::NotFound(id))?;
        if req.status.is_terminal() {
            return Err(DelegationError::Terminal);
        }
        req.status = DelegationStatus::Cancelled;
        req.error = Some(reason.into());
        req.completed_at = Some(Utc::now());
        Ok(req.clone())
    }

    pub async fn complete(&self, id: Uuid, status: DelegationStatus, result: Option<serde_json::Value>, error: Option<String>, cost: Option<f64>, steps: Option<u32>) -> Result<DelegationRequest, DelegationError> {
        debug_assert!(status.is_terminal());
        let mut requests = self.requests.write().await;
        let req = requests.get_mut(&id).ok_or(DelegationError::NotFound(id))?;
        req.status = status;
        req.result = result;
        req.error = error;
        req.cost = cost;
        req.steps = steps;
        req.completed_at = Some(Utc::now());
        let snapshot = req.clone();
        drop(requests);

        let callbacks = self.callbacks.read().await;
        if status == DelegationStatus::Completed {
            self.fire(&callbacks.completed, &snapshot);
        } else {
            self.fire(&callbacks.failed, &snapshot);
        }
        Ok(snapshot)
    }

    async fn run_in_background(self: &Arc<Self>, id: Uuid) -> Result<(), DelegationError> {
        self.accept(id, &self.get(id).await.ok_or(DelegationError::NotFound(id))?.delegatee_id).await?;
        {
            let mut requests = self.requests.write().await;
            if let Some(req) = requests.get_mut(&id) {
                req.status = DelegationStatus::InProgress;
            }
        }

        let request = self.get(id).await.ok_or(DelegationError::NotFound(id))?;
        let handler = self.handlers.read().await.get(&request.delegatee_id).cloned();

        match handler {
            Some(h) => match h(request).await {
                Ok(result) => {
                    self.complete(id, DelegationStatus::Completed, Some(result), None, None, None).await?;
                }
                Err(err) => {
                    self.complete(id, DelegationStatus::Failed, None, Some(err), None, None).await?;
                }
            },
            None => {
                self.complete(id, DelegationStatus::Failed, None, Some("no handler registered".to_string()), None, None).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pii::{ContextSharingProtocol, PiiPolicy};

    fn ctx(input: &str) -> DelegationContext {
        DelegationContext {
            original_input: input.to_string(),
            original_context: serde_json::json!({}),
            delegation_reason: "test".to_string(),
            delegated_capability: None,
            max_steps: None,
            max_cost: None,
            timeout_seconds: None,
            delegation_chain: Vec::new(),
            shared_state: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn delegate_appends_delegator_to_chain() {
        let pii = Arc::new(ContextSharingProtocol::new(PiiPolicy::Warn));
        let engine = Arc::new(DelegationEngine::new(pii));
        let req = engine
            .delegate("agent-a", "agent-b", "cap.execute", serde_json::json!({}), ctx("hello"), DelegationType::Full, 5, 30, "tenant-a", None)
            .await
            .unwrap();
        assert_eq!(req.context.delegation_chain, vec!["agent-a".to_string()]);
    }

    #[tokio::test]
    async fn reject_twice_is_rejected_the_second_time() {
        let pii = Arc::new(ContextSharingProtocol::new(PiiPolicy::Warn));
        let engine = Arc::new(DelegationEngine::new(pii));
        let req = engine
            .delegate("a", "b", "cap", serde_json::json!({}), ctx("hi"), DelegationType::Full, 5, 30, "t", None)
            .await
            .unwrap();
        engine.reject(req.id, "b", "not now").await.unwrap();
        let second = engine.reject(req.id, "b", "still not now").await;
        assert!(matches!(second, Err(DelegationError::Terminal)));
    }

    #[tokio::test]
    async fn cancel_is_forbidden_from_every_terminal_status() {
        let pii = Arc::new(ContextSharingProtocol::new(PiiPolicy::Warn));
        let engine = Arc::new(DelegationEngine::new(pii));
        let req = engine
            .delegate("a", "b", "cap", serde_json::json!({}), ctx("hi"), DelegationType::Full, 5, 30, "t", None)
            .await
            .unwrap();
        engine.complete(req.id, DelegationStatus::Timeout, None, None, None, None).await.unwrap();
        let result = engine.cancel(req.id, "too late").await;
        assert!(matches!(result, Err(DelegationError::Terminal)));
    }

    #[tokio::test]
    async fn block_policy_refuses_delegation_containing_pii() {
        let pii = Arc::new(ContextSharingProtocol::new(PiiPolicy::Block));
        let engine = Arc::new(DelegationEngine::new(pii));
        let result = engine
            .delegate("a", "b", "cap", serde_json::json!({}), ctx("email me at bob@acme.com"), DelegationType::Full, 5, 30, "t", None)
            .await;
        assert!(matches!(result, Err(DelegationError::Blocked(_))));
    }
}
