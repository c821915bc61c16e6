//! Agent Card: the machine-readable manifest of an agent's identity,
//! endpoints, capabilities, and collaboration policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    None,
    ApiKey,
    Bearer,
    Mtls,
    Oauth2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolVersion {
    V1,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEndpoint {
    pub url: String,
    pub protocol: String,
    pub version: ProtocolVersion,
    pub auth_scheme: AuthScheme,
    pub auth_config: serde_json::Value,
    pub supported_operations: Vec<String>,
    pub rate_limit_rpm: Option<u32>,
    pub health_check_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityType {
    Tool,
    Query,
    Action,
    Workflow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCapability {
    pub id: String,
    pub name: String,
    pub description: String,
    pub capability_type: CapabilityType,
    pub input_schema: serde_json::Value,
    pub output_schema: serde_json::Value,
    pub requires_approval: bool,
    pub requires_context: bool,
    pub max_tokens: Option<u32>,
    pub timeout_seconds: u64,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificationStatus {
    Uncertified,
    Pending,
    Certified,
    Revoked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCard {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub tenant_id: String,
    pub organization: Option<String>,
    pub owner: Option<String>,
    pub agent_type: String,
    pub role: String,
    pub endpoints: Vec<AgentEndpoint>,
    pub capabilities: Vec<AgentCapability>,
    pub protocol_version: ProtocolVersion,
    pub supported_message_types: Vec<String>,
    pub certification_id: Option<String>,
    pub certification_status: CertificationStatus,
    pub trust_level: u8,
    pub max_concurrent_tasks: u32,
    pub max_context_tokens: u32,
    pub supported_languages: Vec<String>,
    pub can_delegate: bool,
    pub can_accept_delegation: bool,
    pub preferred_collaborators: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
    pub well_known_path: String,
}

impl AgentCard {
    pub fn primary_endpoint(&self) -> Option<&AgentEndpoint> {
        self.endpoints.first()
    }
}

/// Build a card with a single default HTTP endpoint and the two default
/// capabilities (`execute`, `query`) every agent gets unless it overrides
/// them.
pub fn create_agent_card(id: impl Into<String>, name: impl Into<String>, tenant_id: impl Into<String>, base_url: impl Into<String>) -> AgentCard {
    let id = id.into();
    let name = name.into();
    let tenant_id = tenant_id.into();
    let base_url = base_url.into();
    let now = Utc::now();

    let endpoint = AgentEndpoint {
        url: base_url,
        protocol: "http".to_string(),
        version: ProtocolVersion::V1,
        auth_scheme: AuthScheme::Bearer,
        auth_config: serde_json::json!({}),
        supported_operations: vec!["execute".to_string(), "query".to_string()],
        rate_limit_rpm: Some(600),
        health_check_path: Some("/healthz".to_string()),
    };

    let execute = AgentCapability {
        id: format!("{id}.execute"),
        name: "execute".to_string(),
        description: "Execute an action on behalf of a requester".to_string(),
        capability_type: CapabilityType::Action,
        input_schema: serde_json::json!({"type": "object"}),
        output_schema: serde_json::json!({"type": "object"}),
        requires_approval: false,
        requires_context: true,
        max_tokens: None,
        timeout_seconds: 30,
        tags: vec!["core".to_string()],
    };

    let query = AgentCapability {
        id: format!("{id}.query"),
        name: "query".to_string(),
        description: "Answer a read-only query".to_string(),
        capability_type: CapabilityType::Query,
        input_schema: serde_json::json!({"type": "object"}),
        output_schema: serde_json::json!({"type": "object"}),
        requires_approval: false,
        requires_context: false,
        max_tokens: None,
        timeout_seconds: 15,
        tags: vec!["core".to_string()],
    };

    AgentCard {
        id: id.clone(),
        name,
        description: String::new(),
        version: "1.0.0".to_string(),
        tenant_id,
        organization: None,
        owner: None,
        agent_type: "generic".to_string(),
        role: "worker".to_string(),
        endpoints: vec![endpoint],
        capabilities: vec![execute, query],
        protocol_version: ProtocolVersion::V1,
        supported_message_types: vec![
            "PING".to_string(),
            "EXECUTE".to_string(),
            "DELEGATE".to_string(),
            "STATUS_QUERY".to_string(),
        ],
        certification_id: None,
        certification_status: CertificationStatus::Uncertified,
        trust_level: 50,
        max_concurrent_tasks: 4,
        max_context_tokens: 8192,
        supported_languages: vec!["en".to_string()],
        can_delegate: true,
        can_accept_delegation: true,
        preferred_collaborators: Vec::new(),
        created_at: now,
        updated_at: now,
        tags: Vec::new(),
        metadata: serde_json::json!({}),
        well_known_path: format!("/.well-known/agent/{id}.json"),
    }
}
