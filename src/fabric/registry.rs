//! Fabric Plane Registry: per-tenant plane configuration and the single
//! active preset each tenant's actions flow through.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use super::preset::FabricPreset;
use super::route::{ActionType, Route};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaneHealth {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

/// The canonical target systems a route table is pre-populated for.
pub const CANONICAL_SYSTEMS: &[&str] = &[
    "crm",
    "erp",
    "hris",
    "finance",
    "inventory",
    "ticketing",
    "analytics",
    "warehouse",
    "marketing",
    "support",
    "custom",
];

#[derive(Debug, Clone)]
pub struct Plane {
    pub preset: FabricPreset,
    pub primary_plane_id: String,
    pub routes: HashMap<(String, ActionType), Route>,
    pub self_healing_enabled: bool,
    pub health_status: PlaneHealth,
    pub is_active: bool,
}

impl Plane {
    /// Build a plane for `preset` with a route pre-populated for every
    /// canonical system × action type combination. Only `scrappy` routes
    /// carry a populated `direct_endpoint`.
    pub fn with_default_routes(preset: FabricPreset, primary_plane_id: impl Into<String>) -> Self {
        let primary_plane_id = primary_plane_id.into();
        let mut routes = HashMap::new();
        let action_types = [
            ActionType::Create,
            ActionType::Read,
            ActionType::Query,
            ActionType::Update,
            ActionType::Delete,
            ActionType::Execute,
            ActionType::Notify,
            ActionType::Sync,
            ActionType::Ingest,
        ];

        for system in CANONICAL_SYSTEMS {
            for action in action_types {
                let route = build_default_route(preset, system, action, &primary_plane_id);
                routes.insert((system.to_string(), action), route);
            }
        }

        Self {
            preset,
            primary_plane_id,
            routes,
            self_healing_enabled: true,
            health_status: PlaneHealth::Unknown,
            is_active: false,
        }
    }
}

/// The canonical entity an iPaaS recipe/webhook names for each target
/// system, e.g. `(CRM, UPDATE)` → `recipe_crm_update_customer` and
/// `/webhooks/workato/crm/customer/update`.
fn canonical_entity(system: &str) -> &'static str {
    match system {
        "crm" => "customer",
        "erp" => "order",
        "hris" => "employee",
        "finance" => "invoice",
        "inventory" => "item",
        "ticketing" => "ticket",
        "analytics" => "report",
        "warehouse" => "batch",
        "marketing" => "campaign",
        "support" => "case",
        _ => "record",
    }
}

fn build_default_route(preset: FabricPreset, system: &str, action: ActionType, plane_id: &str) -> Route {
    let mut route = Route::default();
    match preset {
        FabricPreset::Scrappy => {
            route.direct_endpoint = Some(format!("https://{system}.direct.internal/v1/{{id}}"));
            route.direct_method = Some(action.gateway_method().to_string());
        }
        FabricPreset::ApiGateway => {
            route.gateway_upstream = Some(format!("https://gateway.internal/{system}"));
            route.gateway_path = Some(format!("/{system}/{{id}}"));
            route.gateway_route_id = Some(format!("{plane_id}:{system}:{}", action.gateway_method()));
        }
        FabricPreset::Ipaas => {
            let verb = format!("{:?}", action).to_lowercase();
            let entity = canonical_entity(system);
            route.ipaas_recipe_id = Some(format!("recipe_{system}_{verb}_{entity}"));
            route.ipaas_recipe_name = Some(format!("{verb} {entity} in {system}"));
            route.ipaas_webhook_url = Some(format!("/webhooks/workato/{system}/{entity}/{verb}"));
        }
        FabricPreset::EventBus => {
            route.kafka_topic = Some(format!("fabric.{system}.events"));
        }
        FabricPreset::DataWarehouse => {
            route.warehouse_schema = Some("staging".to_string());
            route.warehouse_table = Some(system.to_string());
            route.warehouse_operation = Some("UPSERT".to_string());
        }
    }
    route
}

/// Per-tenant plane storage. Each tenant may hold a plane for every
/// preset but exactly one is active at a time.
#[derive(Default)]
pub struct FabricRegistry {
    tenants: RwLock<HashMap<String, HashMap<FabricPreset, Plane>>>,
    active_preset: RwLock<HashMap<String, FabricPreset>>,
}

impl FabricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision a tenant with a plane for `preset` and make it active.
    pub fn provision(&self, tenant_id: &str, preset: FabricPreset, primary_plane_id: impl Into<String>) {
        let mut plane = Plane::with_default_routes(preset, primary_plane_id);
        plane.is_active = true;
        plane.health_status = PlaneHealth::Healthy;

        let mut tenants = self.tenants.write().unwrap();
        let entry = tenants.entry(tenant_id.to_string()).or_default();
        for p in entry.values_mut() {
            p.is_active = false;
        }
        entry.insert(preset, plane);
        self.active_preset.write().unwrap().insert(tenant_id.to_string(), preset);
    }

    pub fn active_plane(&self, tenant_id: &str) -> Option<Plane> {
        let preset = *self.active_preset.read().unwrap().get(tenant_id)?;
        self.tenants.read().unwrap().get(tenant_id)?.get(&preset).cloned()
    }

    pub fn active_preset(&self, tenant_id: &str) -> Option<FabricPreset> {
        self.active_preset.read().unwrap().get(tenant_id).copied()
    }

    pub fn set_health(&self, tenant_id: &str, preset: FabricPreset, health: PlaneHealth) {
        if let Some(tenant) = self.tenants.write().unwrap().get_mut(tenant_id) {
            if let Some(plane) = tenant.get_mut(&preset) {
                plane.health_status = health;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrappy_routes_have_direct_endpoints_other_presets_do_not() {
        let scrappy = Plane::with_default_routes(FabricPreset::Scrappy, "p1");
        let ipaas = Plane::with_default_routes(FabricPreset::Ipaas, "p2");
        for (_, route) in &scrappy.routes {
            assert!(route.direct_endpoint.is_some());
        }
        for (_, route) in &ipaas.routes {
            assert!(route.direct_endpoint.is_none());
        }
    }

    #[test]
    fn ipaas_route_for_crm_update_names_the_canonical_entity() {
        let plane = Plane::with_default_routes(FabricPreset::Ipaas, "plane-1");
        let route = plane.routes.get(&("crm".to_string(), ActionType::Update)).unwrap();
        assert_eq!(route.ipaas_recipe_id.as_deref(), Some("recipe_crm_update_customer"));
        assert_eq!(route.ipaas_webhook_url.as_deref(), Some("/webhooks/workato/crm/customer/update"));
    }

    #[test]
    fn provisioning_a_second_plane_deactivates_the_first() {
        let registry = FabricRegistry::new();
        registry.provision("tenant-a", FabricPreset::Scrappy, "plane-1");
        registry.provision("tenant-a", FabricPreset::Ipaas, "plane-2");
        assert_eq!(registry.active_preset("tenant-a"), Some(FabricPreset::Ipaas));
        let active = registry.active_plane("tenant-a").unwrap();
        assert_eq!(active.primary_plane_id, "plane-2");
    }
}
