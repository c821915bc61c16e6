//! A `Route` carries whichever subset of connection details its preset
//! needs; unused fields stay `None` and a route is only ever resolved for
//! the preset it was built for.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionType {
    Create,
    Read,
    Query,
    Update,
    Delete,
    Execute,
    Notify,
    Sync,
    Ingest,
}

impl ActionType {
    /// The fixed CRUD→HTTP-method table used by the API gateway preset.
    pub fn gateway_method(&self) -> &'static str {
        match self {
            ActionType::Create => "POST",
            ActionType::Read | ActionType::Query => "GET",
            ActionType::Update => "PATCH",
            ActionType::Delete => "DELETE",
            ActionType::Execute | ActionType::Notify | ActionType::Sync | ActionType::Ingest => "POST",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub timeout_seconds: u64,
    pub retry_count: u32,

    // scrappy
    pub direct_endpoint: Option<String>,
    pub direct_method: Option<String>,

    // api_gateway
    pub gateway_upstream: Option<String>,
    pub gateway_path: Option<String>,
    pub gateway_route_id: Option<String>,

    // ipaas
    pub ipaas_recipe_id: Option<String>,
    pub ipaas_recipe_name: Option<String>,
    pub ipaas_webhook_url: Option<String>,

    // event_bus
    pub kafka_topic: Option<String>,

    // data_warehouse
    pub warehouse_schema: Option<String>,
    pub warehouse_table: Option<String>,
    pub warehouse_operation: Option<String>,
}

impl Default for Route {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            retry_count: 3,
            direct_endpoint: None,
            direct_method: None,
            gateway_upstream: None,
            gateway_path: None,
            gateway_route_id: None,
            ipaas_recipe_id: None,
            ipaas_recipe_name: None,
            ipaas_webhook_url: None,
            kafka_topic: None,
            warehouse_schema: None,
            warehouse_table: None,
            warehouse_operation: None,
        }
    }
}

/// Substitute `{id}` in a path template with `entity_id`, if present.
pub fn substitute_id(template: &str, entity_id: Option<&str>) -> String {
    match entity_id {
        Some(id) => template.replace("{id}", id),
        None => template.to_string(),
    }
}
