//! Fabric Plane Registry (C6) and Action Router (C7): every outbound
//! action a tenant's agents take is forced through one of five preset
//! routing topologies. Direct peer connections are reachable only under
//! the `scrappy` preset.

mod action;
mod preset;
mod registry;
mod route;
mod router;

pub use action::{ActionPayload, RoutedAction, RoutedActionStatus};
pub use preset::FabricPreset;
pub use registry::{FabricRegistry, Plane, PlaneHealth, CANONICAL_SYSTEMS};
pub use route::{ActionType, Route};
pub use router::{ActionRouter, HttpTransport, ReqwestTransport, RouteError};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct StubTransport;

    #[async_trait::async_trait]
    impl HttpTransport for StubTransport {
        async fn call(&self, _method: &str, _url: &str, body: &serde_json::Value) -> Result<serde_json::Value, String> {
            Ok(serde_json::json!({"echoed": body}))
        }
    }

    #[tokio::test]
    async fn routing_under_unprovisioned_tenant_fails_with_no_active_plane() {
        let registry = Arc::new(FabricRegistry::new());
        let router = ActionRouter::with_transport(registry, Arc::new(StubTransport));
        let payload = ActionPayload {
            target_system: "crm".into(),
            action_type: ActionType::Update,
            entity_id: Some("c1".into()),
            entity_type: Some("customer".into()),
            data: serde_json::json!({"name": "x"}),
        };
        let action = router.route(payload, "tenant-a", None, None).await;
        assert_eq!(action.status, RoutedActionStatus::Failed);
        assert!(action.error.unwrap().contains("no active fabric plane"));
    }

    #[tokio::test]
    async fn ipaas_routing_produces_the_documented_execution_path() {
        let registry = Arc::new(FabricRegistry::new());
        registry.provision("tenant-a", FabricPreset::Ipaas, "plane-ipaas-1");
        let router = ActionRouter::with_transport(registry, Arc::new(StubTransport));
        let payload = ActionPayload {
            target_system: "crm".into(),
            action_type: ActionType::Update,
            entity_id: Some("c1".into()),
            entity_type: Some("customer".into()),
            data: serde_json::json!({"name": "x"}),
        };
        let action = router.route(payload, "tenant-a", None, None).await;
        assert_eq!(action.fabric_preset, Some(FabricPreset::Ipaas));
        assert_eq!(action.execution_path.as_deref(), Some("ipaas_recipe"));

        let body = action.result.unwrap()["echoed"].clone();
        assert_eq!(body["recipe_id"], serde_json::json!("recipe_crm_update_customer"));
    }

    #[tokio::test]
    async fn missing_route_for_unknown_system_fails_with_no_route() {
        let registry = Arc::new(FabricRegistry::new());
        registry.provision("tenant-a", FabricPreset::Scrappy, "plane-1");
        let router = ActionRouter::with_transport(registry, Arc::new(StubTransport));
        let payload = ActionPayload {
            target_system: "not-a-real-system".into(),
            action_type: ActionType::Create,
            entity_id: None,
            entity_type: None,
            data: serde_json::json!({}),
        };
        let action = router.route(payload, "tenant-a", None, None).await;
        assert_eq!(action.status, RoutedActionStatus::Failed);
    }
}
