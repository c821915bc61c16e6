//! A2A Protocol Handler: per-agent inboxes, correlation-id-keyed
//! request/response pairing, and the built-in message handlers.
//!
//! CRITICAL FABRIC PLANE MESH CONSTRAINT: every EXECUTE routes through the
//! Action Router (§4.7), which enforces Fabric Plane routing. Agents never
//! open a direct peer connection except under the `scrappy` preset.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex, RwLock};
use uuid::Uuid;

use crate::delegation::{DelegationContext, DelegationEngine, DelegationType};
use crate::discovery::{AgentDiscovery, DiscoveryFilter};
use crate::fabric::{ActionPayload, ActionRouter, ActionType, FabricRegistry, RoutedActionStatus};

use super::message::{A2AMessage, A2AMessageType};

const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

struct Inbox {
    queues: Mutex<HashMap<String, tokio::sync::mpsc::UnboundedSender<A2AMessage>>>,
    receivers: Mutex<HashMap<String, tokio::sync::mpsc::UnboundedReceiver<A2AMessage>>>,
}

impl Inbox {
    fn new() -> Self {
        Self { queues: Mutex::new(HashMap::new()), receivers: Mutex::new(HashMap::new()) }
    }

    async fn ensure(&self, agent_id: &str) {
        let mut queues = self.queues.lock().await;
        if !queues.contains_key(agent_id) {
            let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
            queues.insert(agent_id.to_string(), tx);
            self.receivers.lock().await.insert(agent_id.to_string(), rx);
        }
    }

    async fn push(&self, agent_id: &str, message: A2AMessage) {
        self.ensure(agent_id).await;
        let queues = self.queues.lock().await;
        if let Some(sender) = queues.get(agent_id) {
            let _ = sender.send(message);
        }
    }

    async fn pop(&self, agent_id: &str, timeout: Duration) -> Option<A2AMessage> {
        self.ensure(agent_id).await;
        let mut receivers = self.receivers.lock().await;
        let receiver = receivers.get_mut(agent_id)?;
        tokio::time::timeout(timeout, receiver.recv()).await.ok().flatten()
    }
}

/// A protocol handler scoped to one tenant's fabric context.
pub struct A2AProtocol {
    discovery: Arc<AgentDiscovery>,
    delegation: Arc<DelegationEngine>,
    router: Arc<ActionRouter>,
    registry: Arc<FabricRegistry>,
    tenant_id: String,
    inbox: Inbox,
    pending: RwLock<HashMap<Uuid, oneshot::Sender<A2AMessage>>>,
}

impl A2AProtocol {
    pub fn new(
        discovery: Arc<AgentDiscovery>,
        delegation: Arc<DelegationEngine>,
        router: Arc<ActionRouter>,
        registry: Arc<FabricRegistry>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            discovery,
            delegation,
            router,
            registry,
            tenant_id: tenant_id.into(),
            inbox: Inbox::new(),
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Queue `message` for `to_agent`; if it's a request type, wait up to
    /// `timeout` for the reply carrying the matching `correlation_id`. The
    /// caller must separately run `process()` against the target's inbox
    /// (or call `process` directly) to produce that reply.
    pub async fn send(&self, mut message: A2AMessage) -> Result<Option<A2AMessage>, String> {
        if message.to_agent.is_empty() {
            return Err("message must have a to_agent".to_string());
        }
        if self.discovery.get(&message.to_agent).is_none() {
            return Err(format!("target agent {} not found", message.to_agent));
        }

        let is_request = message.is_request();
        if is_request && message.correlation_id.is_none() {
            message.correlation_id = Some(message.id);
        }

        let correlation_id = message.correlation_id;
        let waiter = if is_request {
            let correlation_id = correlation_id.expect("request always has a correlation id by now");
            let (tx, rx) = oneshot::channel();
            self.pending.write().await.insert(correlation_id, tx);
            Some((correlation_id, rx))
        } else {
            None
        };

        let to_agent = message.to_agent.clone();
        self.inbox.push(&to_agent, message).await;

        match waiter {
            Some((correlation_id, rx)) => {
                let result = tokio::time::timeout(DEFAULT_RESPONSE_TIMEOUT, rx).await;
                self.pending.write().await.remove(&correlation_id);
                Ok(result.ok().and_then(Result::ok))
            }
            None => Ok(None),
        }
    }

    pub async fn receive(&self, agent_id: &str, timeout: Duration) -> Option<A2AMessage> {
        self.inbox.pop(agent_id, timeout).await
    }

    /// Dispatch a received message: resolve a pending response future if
    /// its `correlation_id` matches one, else route it to a built-in
    /// handler and return any reply for the caller to deliver.
    pub async fn process(&self, message: A2AMessage) -> Option<A2AMessage> {
        if let Some(correlation_id) = message.correlation_id {
            let mut pending = self.pending.write().await;
            if let Some(sender) = pending.remove(&correlation_id) {
                let _ = sender.send(message);
                return None;
            }
        }

        match message.message_type {
            A2AMessageType::Ping => Some(self.handle_ping(&message)),
            A2AMessageType::Discover => Some(self.handle_discover(&message)),
            A2AMessageType::CapabilityQuery => Some(self.handle_capability_query(&message)),
            A2AMessageType::Delegate => Some(self.handle_delegate(&message).await),
            A2AMessageType::StatusQuery => Some(self.handle_status_query(&message).await),
            A2AMessageType::Execute => Some(self.handle_execute(&message).await),
            _ => None,
        }
    }

    fn handle_ping(&self, message: &A2AMessage) -> A2AMessage {
        message.create_reply(A2AMessageType::Pong, serde_json::json!({ "timestamp": chrono::Utc::now().to_rfc3339() }))
    }

    fn handle_discover(&self, message: &A2AMessage) -> A2AMessage {
        let filter_data = message.payload.get("filter").cloned().unwrap_or(serde_json::json!({}));
        let filter = DiscoveryFilter {
            capability_ids: filter_data.get("capability_ids").and_then(|v| serde_json::from_value(v.clone()).ok()),
            tags: filter_data.get("capability_tags").and_then(|v| serde_json::from_value(v.clone()).ok()),
            agent_type: filter_data.get("agent_type").and_then(|v| v.as_str()).map(str::to_string),
            min_trust_level: filter_data.get("min_trust_level").and_then(|v| v.as_u64()).map(|n| n as u8),
            limit: filter_data.get("limit").and_then(|v| v.as_u64()).map(|n| n as usize).or(Some(10)),
            ..Default::default()
        };

        let result = self.discovery.discover(&filter);
        message.create_reply(
            A2AMessageType::DiscoverResponse,
            serde_json::json!({
                "agents": result.cards,
                "total": result.total_matched,
                "has_more": result.total_matched > result.cards.len() + filter.offset,
            }),
        )
    }

    fn handle_capability_query(&self, message: &A2AMessage) -> A2AMessage {
        let agent_id = message.payload.get("agent_id").and_then(|v| v.as_str()).unwrap_or(&message.to_agent);
        let Some(agent) = self.discovery.get(agent_id) else {
            return message.create_error_reply(format!("agent {agent_id} not found"), "NOT_FOUND");
        };

        let capability_id = message.payload.get("capability_id").and_then(|v| v.as_str());
        let capabilities: Vec<_> = match capability_id {
            Some(cap_id) => agent.capabilities.into_iter().filter(|c| c.id == cap_id).collect(),
            None => agent.capabilities,
        };

        message.create_reply(A2AMessageType::CapabilityResponse, serde_json::json!({ "capabilities": capabilities }))
    }

    async fn handle_delegate(&self, message: &A2AMessage) -> A2AMessage {
        let payload = &message.payload;
        let context_data = payload.get("context").cloned().unwrap_or(serde_json::json!({}));

        let context = DelegationContext {
            original_input: context_data
                .get("original_input")
                .or_else(|| payload.get("input"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            original_context: context_data.get("original_context").cloned().unwrap_or(serde_json::json!({})),
            delegation_reason: context_data.get("delegation_reason").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            delegated_capability: context_data.get("delegated_capability").and_then(|v| v.as_str()).map(str::to_string),
            max_steps: context_data.get("max_steps").and_then(|v| v.as_u64()).map(|n| n as u32),
            max_cost: context_data.get("max_cost").and_then(|v| v.as_f64()),
            timeout_seconds: context_data.get("timeout_seconds").and_then(|v| v.as_u64()),
            delegation_chain: context_data
                .get("delegation_chain")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default(),
            shared_state: context_data.get("shared_state").cloned().unwrap_or(serde_json::json!({})),
        };

        let timeout_seconds = context.timeout_seconds.unwrap_or(300) as i64;
        let capability_id = payload.get("capability_id").and_then(|v| v.as_str()).unwrap_or_default();
        let task_input = payload.get("input").cloned().unwrap_or(serde_json::json!(""));

        match self
            .delegation
            .delegate(
                message.from_agent.clone(),
                message.to_agent.clone(),
                capability_id,
                task_input,
                context,
                DelegationType::Full,
                5,
                timeout_seconds,
                &self.tenant_id,
                message.primary_plane_id().as_deref(),
            )
            .await
        {
            Ok(request) => message.create_reply(
                A2AMessageType::DelegateAccept,
                serde_json::json!({ "delegation_id": request.id, "status": request.status }),
            ),
            Err(err) => message.create_reply(A2AMessageType::DelegateReject, serde_json::json!({ "error": err.to_string() })),
        }
    }

    async fn handle_status_query(&self, message: &A2AMessage) -> A2AMessage {
        if let Some(delegation_id) = message.payload.get("delegation_id").and_then(|v| v.as_str()) {
            let Ok(id) = delegation_id.parse::<Uuid>() else {
                return message.create_error_reply("invalid delegation_id", "INVALID_INPUT");
            };
            return match self.delegation.get(id).await {
                Some(request) => message.create_reply(
                    A2AMessageType::StatusResponse,
                    serde_json::json!({
                        "delegation_id": request.id,
                        "status": request.status,
                        "result": request.result,
                        "error": request.error,
                    }),
                ),
                None => message.create_error_reply(format!("delegation {delegation_id} not found"), "NOT_FOUND"),
            };
        }

        let agent_id = &message.to_agent;
        let Some(agent) = self.discovery.get(agent_id) else {
            return message.create_error_reply(format!("agent {agent_id} not found"), "NOT_FOUND");
        };
        let health = self.discovery.get_health(agent_id);

        message.create_reply(
            A2AMessageType::StatusResponse,
            serde_json::json!({
                "agent_id": agent_id,
                "agent_name": agent.name,
                "health_status": health.map(|h| h.status),
            }),
        )
    }

    /// Route an EXECUTE through the Action Router, auto-enriching the
    /// fabric context when the sender omitted `primary_plane_id`.
    async fn handle_execute(&self, message: &A2AMessage) -> A2AMessage {
        let expected_plane_id = self.registry.active_plane(&self.tenant_id).map(|p| p.primary_plane_id);
        let message_plane_id = message.primary_plane_id();
        let enriched = message_plane_id.is_none();

        if enriched {
            tracing::warn!(
                message_id = %message.id, from = %message.from_agent,
                "EXECUTE message missing fabric_context.primary_plane_id; auto-enriching"
            );
        } else if message_plane_id != expected_plane_id {
            tracing::warn!(
                message_id = %message.id,
                message_plane_id = ?message_plane_id,
                expected_plane_id = ?expected_plane_id,
                "EXECUTE message has mismatched plane_id; routing with message's value"
            );
        }

        let payload = &message.payload;
        let action_type: ActionType = match payload.get("action_type").and_then(|v| v.as_str()).map(str::to_uppercase) {
            Some(raw) => match serde_json::from_value(serde_json::Value::String(raw.clone())) {
                Ok(action_type) => action_type,
                Err(_) => return message.create_error_reply(format!("invalid action_type: {raw}"), "INVALID_ACTION_TYPE"),
            },
            None => ActionType::Execute,
        };

        let action_payload = ActionPayload {
            target_system: payload.get("target_system").and_then(|v| v.as_str()).unwrap_or("custom").to_string(),
            action_type,
            entity_id: payload.get("entity_id").and_then(|v| v.as_str()).map(str::to_string),
            entity_type: payload.get("entity_type").and_then(|v| v.as_str()).map(str::to_string),
            data: payload.get("data").cloned().unwrap_or(serde_json::json!({})),
        };

        let routed = self
            .router
            .route(action_payload, &self.tenant_id, Some(message.from_agent.clone()), message.correlation_id)
            .await;

        let mut reply = message.create_reply(
            A2AMessageType::ExecuteResponse,
            serde_json::json!({
                "action_id": routed.id,
                "status": routed.status,
                "fabric_preset": routed.fabric_preset,
                "primary_plane_id": routed.primary_plane_id,
                "execution_path": routed.execution_path,
                "result": routed.result,
                "error": routed.error,
                "completed_at": routed.completed_at,
                "fabric_context_enriched": enriched,
            }),
        );
        if routed.status == RoutedActionStatus::Completed {
            reply.with_fabric_context(serde_json::json!({
                "primary_plane_id": routed.primary_plane_id,
                "fabric_preset": routed.fabric_preset,
            }));
        }
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::create_agent_card;
    use crate::fabric::FabricRegistry;
    use crate::pii::{ContextSharingProtocol, PiiPolicy};

    struct StubTransport;
    #[async_trait::async_trait]
    impl crate::fabric::HttpTransport for StubTransport {
        async fn call(&self, _method: &str, _url: &str, body: &serde_json::Value) -> Result<serde_json::Value, String> {
            Ok(serde_json::json!({"echoed": body}))
        }
    }

    fn build() -> A2AProtocol {
        let discovery = Arc::new(AgentDiscovery::new());
        discovery.register(create_agent_card("agent-a", "Agent A", "tenant-a", "http://a"));
        discovery.register(create_agent_card("agent-b", "Agent B", "tenant-a", "http://b"));

        let pii = Arc::new(ContextSharingProtocol::new(PiiPolicy::Warn));
        let delegation = Arc::new(DelegationEngine::new(pii));

        let registry = Arc::new(FabricRegistry::new());
        registry.provision("tenant-a", crate::fabric::FabricPreset::Ipaas, "plane-1");
        let router = Arc::new(ActionRouter::with_transport(Arc::clone(&registry), Arc::new(StubTransport)));

        A2AProtocol::new(discovery, delegation, router, registry, "tenant-a")
    }

    #[tokio::test]
    async fn ping_gets_a_pong_reply_via_process() {
        let protocol = build();
        let ping = A2AMessage::new(A2AMessageType::Ping, "agent-a", "agent-b", serde_json::json!({}));
        let reply = protocol.process(ping).await.unwrap();
        assert_eq!(reply.message_type, A2AMessageType::Pong);
    }

    #[tokio::test]
    async fn send_to_unknown_agent_is_rejected() {
        let protocol = build();
        let msg = A2AMessage::new(A2AMessageType::Ping, "agent-a", "ghost", serde_json::json!({}));
        let result = protocol.send(msg).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn execute_auto_enriches_missing_fabric_context_and_routes() {
        let protocol = build();
        let msg = A2AMessage::new(
            A2AMessageType::Execute,
            "agent-a",
            "agent-b",
            serde_json::json!({
                "target_system": "crm",
                "action_type": "update",
                "entity_id": "c1",
                "data": {"name": "x"},
            }),
        );
        let reply = protocol.process(msg).await.unwrap();
        assert_eq!(reply.message_type, A2AMessageType::ExecuteResponse);
        assert_eq!(reply.payload["fabric_context_enriched"], serde_json::json!(true));
        assert_eq!(reply.payload["fabric_preset"], serde_json::json!("ipaas"));
    }

    #[tokio::test]
    async fn delegate_message_creates_a_delegation_and_replies_accept() {
        let protocol = build();
        let msg = A2AMessage::new(
            A2AMessageType::Delegate,
            "agent-a",
            "agent-b",
            serde_json::json!({
                "capability_id": "cap.execute",
                "input": "do the thing",
                "context": {"original_input": "do the thing", "delegation_reason": "handoff"},
            }),
        );
        let reply = protocol.process(msg).await.unwrap();
        assert_eq!(reply.message_type, A2AMessageType::DelegateAccept);
    }

    #[tokio::test]
    async fn stale_correlation_id_resolves_pending_future_exactly_once() {
        let protocol = build();
        let correlation_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        protocol.pending.write().await.insert(correlation_id, tx);

        let mut first_reply = A2AMessage::new(A2AMessageType::Pong, "agent-b", "agent-a", serde_json::json!({}));
        first_reply.correlation_id = Some(correlation_id);
        assert!(protocol.process(first_reply).await.is_none());
        assert_eq!(rx.await.unwrap().message_type, A2AMessageType::Pong);

        // A second message carrying the same (now-resolved) correlation id
        // has nothing left to resolve, so it falls through to ordinary
        // handler dispatch instead of being silently swallowed.
        let mut second_reply = A2AMessage::new(A2AMessageType::Ping, "agent-b", "agent-a", serde_json::json!({}));
        second_reply.correlation_id = Some(correlation_id);
        let dispatched = protocol.process(second_reply).await.unwrap();
        assert_eq!(dispatched.message_type, A2AMessageType::Pong);
    }

    #[tokio::test]
    async fn send_then_process_round_trips_a_ping_through_the_inbox() {
        let protocol = Arc::new(build());
        let ping = A2AMessage::new(A2AMessageType::Ping, "agent-a", "agent-b", serde_json::json!({}));
        let protocol_clone = Arc::clone(&protocol);
        let responder = tokio::spawn(async move {
            let received = protocol_clone.receive("agent-b", Duration::from_secs(1)).await.unwrap();
            let reply = protocol_clone.process(received).await.unwrap();
            protocol_clone.send(reply).await.unwrap();
        });
        // PING is not a request type in is_request(), so send() returns
        // immediately; the reply still lands in agent-a's inbox.
        protocol.send(ping).await.unwrap();
        responder.await.unwrap();
        let reply = protocol.receive("agent-a", Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply.message_type, A2AMessageType::Pong);
    }
}
