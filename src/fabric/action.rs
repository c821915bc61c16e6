//! `RoutedAction`: the record and outcome of one attempt through the
//! fabric.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::preset::FabricPreset;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutedActionStatus {
    Pending,
    Routing,
    Executing,
    Completed,
    Failed,
    Timeout,
}

/// The logical action an agent wants performed on a target system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPayload {
    pub target_system: String,
    pub action_type: super::route::ActionType,
    pub entity_id: Option<String>,
    pub entity_type: Option<String>,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedAction {
    pub id: Uuid,
    pub payload: ActionPayload,
    pub tenant_id: String,
    pub agent_id: Option<String>,
    pub correlation_id: Uuid,
    pub fabric_preset: Option<FabricPreset>,
    pub primary_plane_id: Option<String>,
    pub status: RoutedActionStatus,
    pub execution_path: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RoutedAction {
    pub fn new(payload: ActionPayload, tenant_id: impl Into<String>, agent_id: Option<String>, correlation_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            tenant_id: tenant_id.into(),
            agent_id,
            correlation_id: correlation_id.unwrap_or_else(Uuid::new_v4),
            fabric_preset: None,
            primary_plane_id: None,
            status: RoutedActionStatus::Pending,
            execution_path: None,
            result: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}
