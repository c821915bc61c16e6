//! A2A message envelope: `{id, type, from_agent, to_agent, correlation_id,
//! in_reply_to, payload, timestamp, expires_at, protocol_version,
//! metadata}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const PROTOCOL_VERSION: &str = "1.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum A2AMessageType {
    Discover,
    DiscoverResponse,
    CapabilityQuery,
    CapabilityResponse,
    Execute,
    ExecuteResponse,
    Delegate,
    DelegateAccept,
    DelegateReject,
    DelegateResult,
    StatusQuery,
    StatusResponse,
    Cancel,
    CancelAck,
    ContextShare,
    ContextUpdate,
    Ping,
    Pong,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct A2AMessage {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub message_type: A2AMessageType,
    pub from_agent: String,
    pub to_agent: String,
    pub correlation_id: Option<Uuid>,
    pub in_reply_to: Option<Uuid>,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub protocol_version: String,
    pub metadata: serde_json::Value,
}

impl A2AMessage {
    pub fn new(message_type: A2AMessageType, from_agent: impl Into<String>, to_agent: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_type,
            from_agent: from_agent.into(),
            to_agent: to_agent.into(),
            correlation_id: None,
            in_reply_to: None,
            payload,
            timestamp: Utc::now(),
            expires_at: None,
            protocol_version: PROTOCOL_VERSION.to_string(),
            metadata: serde_json::json!({}),
        }
    }

    pub fn primary_plane_id(&self) -> Option<String> {
        self.metadata
            .get("fabric_context")
            .and_then(|c| c.get("primary_plane_id"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    pub fn fabric_preset(&self) -> Option<String> {
        self.metadata
            .get("fabric_context")
            .and_then(|c| c.get("fabric_preset"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    pub fn with_fabric_context(&mut self, context: serde_json::Value) {
        let metadata = self.metadata.as_object_mut().expect("metadata is always an object");
        metadata.insert("fabric_context".to_string(), context);
    }

    /// Build a reply: roles swapped, `correlation_id` inherited (or seeded
    /// from this message's id), `in_reply_to` set to this message's id, and
    /// the fabric context carried forward if present.
    pub fn create_reply(&self, message_type: A2AMessageType, payload: serde_json::Value) -> Self {
        let mut reply = Self {
            id: Uuid::new_v4(),
            message_type,
            from_agent: self.to_agent.clone(),
            to_agent: self.from_agent.clone(),
            correlation_id: Some(self.correlation_id.unwrap_or(self.id)),
            in_reply_to: Some(self.id),
            payload,
            timestamp: Utc::now(),
            expires_at: None,
            protocol_version: PROTOCOL_VERSION.to_string(),
            metadata: serde_json::json!({}),
        };
        if let Some(fabric_context) = self.metadata.get("fabric_context").cloned() {
            reply.with_fabric_context(fabric_context);
        }
        reply
    }

    pub fn create_error_reply(&self, error: impl Into<String>, code: &str) -> Self {
        self.create_reply(A2AMessageType::Error, serde_json::json!({ "error": error.into(), "code": code }))
    }

    /// Request types get an auto-generated `correlation_id` (seeded from
    /// the message id) when the sender didn't set one, so the caller can
    /// always key a pending-response future off it.
    pub fn is_request(&self) -> bool {
        matches!(
            self.message_type,
            A2AMessageType::Execute
                | A2AMessageType::Delegate
                | A2AMessageType::Discover
                | A2AMessageType::CapabilityQuery
                | A2AMessageType::StatusQuery
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_swaps_roles_and_carries_correlation_id() {
        let mut msg = A2AMessage::new(A2AMessageType::Ping, "agent-a", "agent-b", serde_json::json!({}));
        msg.correlation_id = Some(msg.id);
        let reply = msg.create_reply(A2AMessageType::Pong, serde_json::json!({}));
        assert_eq!(reply.from_agent, "agent-b");
        assert_eq!(reply.to_agent, "agent-a");
        assert_eq!(reply.correlation_id, Some(msg.id));
        assert_eq!(reply.in_reply_to, Some(msg.id));
    }

    #[test]
    fn fabric_context_round_trips_through_metadata() {
        let mut msg = A2AMessage::new(A2AMessageType::Execute, "a", "b", serde_json::json!({}));
        msg.with_fabric_context(serde_json::json!({"primary_plane_id": "plane-1", "fabric_preset": "ipaas"}));
        assert_eq!(msg.primary_plane_id().as_deref(), Some("plane-1"));
        assert_eq!(msg.fabric_preset().as_deref(), Some("ipaas"));
    }
}
