//! Action Router: translates a logical [`ActionPayload`] into a
//! plane-specific execution envelope and dispatches it.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::json;
use uuid::Uuid;

use crate::resilience::{DependencyKind, ResilienceStack};

use super::action::{ActionPayload, RoutedAction, RoutedActionStatus};
use super::preset::FabricPreset;
use super::registry::FabricRegistry;
use super::route::{substitute_id, Route};

/// Outbound transport for `scrappy`/`api_gateway`/`ipaas` dispatch. A real
/// deployment uses [`ReqwestTransport`]; tests substitute a recording stub
/// so routing logic can be verified without a live network call.
#[async_trait::async_trait]
pub trait HttpTransport: Send + Sync {
    async fn call(&self, method: &str, url: &str, body: &serde_json::Value) -> Result<serde_json::Value, String>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

#[async_trait::async_trait]
impl HttpTransport for ReqwestTransport {
    async fn call(&self, method: &str, url: &str, body: &serde_json::Value) -> Result<serde_json::Value, String> {
        let method = method.parse().unwrap_or(reqwest::Method::POST);
        self.client
            .request(method, url)
            .json(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Ok(json!({"dispatched": true}))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("no active fabric plane for tenant {0}")]
    NoActivePlane(String),
    #[error("no fabric route for ({0}, {1:?})")]
    NoRoute(String, crate::fabric::route::ActionType),
    #[error("direct endpoint resolution attempted under non-scrappy preset {0:?}")]
    DirectEndpointUnderNonScrappy(FabricPreset),
}

pub struct ActionRouter {
    registry: Arc<FabricRegistry>,
    transport: Arc<dyn HttpTransport>,
    log: DashMap<Uuid, RoutedAction>,
}

impl ActionRouter {
    pub fn new(registry: Arc<FabricRegistry>) -> Self {
        Self::with_transport(registry, Arc::new(ReqwestTransport::default()))
    }

    pub fn with_transport(registry: Arc<FabricRegistry>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            registry,
            transport,
            log: DashMap::new(),
        }
    }

    pub fn get_logged(&self, id: Uuid) -> Option<RoutedAction> {
        self.log.get(&id).map(|r| r.value().clone())
    }

    pub async fn route(
        &self,
        payload: ActionPayload,
        tenant_id: &str,
        agent_id: Option<String>,
        correlation_id: Option<Uuid>,
    ) -> RoutedAction {
        let mut action = RoutedAction::new(payload, tenant_id, agent_id, correlation_id);
        action.status = RoutedActionStatus::Routing;
        self.log.insert(action.id, action.clone());

        let plane = match self.registry.active_plane(tenant_id) {
            Some(p) => p,
            None => {
                return self.fail(action, RouteError::NoActivePlane(tenant_id.to_string()).to_string());
            }
        };
        action.fabric_preset = Some(plane.preset);
        action.primary_plane_id = Some(plane.primary_plane_id.clone());

        let key = (action.payload.target_system.clone(), action.payload.action_type);
        let route = match plane.routes.get(&key) {
            Some(r) => r.clone(),
            None => {
                return self.fail(action, RouteError::NoRoute(key.0, key.1).to_string());
            }
        };

        action.status = RoutedActionStatus::Executing;
        let dispatch_result = match plane.preset {
            FabricPreset::Scrappy => self.dispatch_scrappy(&route, &action).await,
            FabricPreset::ApiGateway => self.dispatch_gateway(&route, &action).await,
            FabricPreset::Ipaas => self.dispatch_ipaas(&route, &action).await,
            FabricPreset::EventBus => self.dispatch_event_bus(&route, &action).await,
            FabricPreset::DataWarehouse => self.dispatch_warehouse(&route, &action).await,
        };

        match dispatch_result {
            Ok((path, result)) => {
                action.status = RoutedActionStatus::Completed;
                action.execution_path = Some(path);
                action.result = Some(result);
                action.completed_at = Some(chrono::Utc::now());
            }
            Err(DispatchError::Timeout) => {
                action.status = RoutedActionStatus::Timeout;
                action.completed_at = Some(chrono::Utc::now());
            }
            Err(DispatchError::Other(msg)) => {
                action.status = RoutedActionStatus::Failed;
                action.error = Some(msg);
                action.completed_at = Some(chrono::Utc::now());
            }
        }

        self.log.insert(action.id, action.clone());
        action
    }

    fn fail(&self, mut action: RoutedAction, error: String) -> RoutedAction {
        action.status = RoutedActionStatus::Failed;
        action.error = Some(error);
        action.completed_at = Some(chrono::Utc::now());
        self.log.insert(action.id, action.clone());
        action
    }

    async fn dispatch_scrappy(&self, route: &Route, action: &RoutedAction) -> Result<(String, serde_json::Value), DispatchError> {
        let endpoint = route
            .direct_endpoint
            .as_ref()
            .ok_or_else(|| DispatchError::Other(RouteError::DirectEndpointUnderNonScrappy(FabricPreset::Scrappy).to_string()))?;
        let url = substitute_id(endpoint, action.payload.entity_id.as_deref());
        let method = route.direct_method.clone().unwrap_or_else(|| "POST".to_string());
        let result = self
            .http_call(&method, &url, &action.payload.data)
            .await?;
        Ok(("direct_http".to_string(), result))
    }

    async fn dispatch_gateway(&self, route: &Route, action: &RoutedAction) -> Result<(String, serde_json::Value), DispatchError> {
        let path = route.gateway_path.clone().unwrap_or_default();
        let path = substitute_id(&path, action.payload.entity_id.as_deref());
        let upstream = route.gateway_upstream.clone().unwrap_or_default();
        let url = format!("{upstream}{path}");
        let method = action.payload.action_type.gateway_method();
        let result = self.http_call(method, &url, &action.payload.data).await?;
        Ok(("api_gateway".to_string(), result))
    }

    async fn dispatch_ipaas(&self, route: &Route, action: &RoutedAction) -> Result<(String, serde_json::Value), DispatchError> {
        let webhook = route.ipaas_webhook_url.clone().unwrap_or_default();
        let webhook = substitute_id(&webhook, action.payload.entity_id.as_deref());
        let body = json!({
            "recipe_id": route.ipaas_recipe_id,
            "recipe_name": route.ipaas_recipe_name,
            "input": {
                "entity_id": action.payload.entity_id,
                "entity_type": action.payload.entity_type,
                "data": action.payload.data,
                "correlation_id": action.correlation_id,
            },
            "metadata": {
                "agent_id": action.agent_id,
                "tenant_id": action.tenant_id,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        });
        let result = self.http_call("POST", &webhook, &body).await?;
        Ok(("ipaas_recipe".to_string(), result))
    }

    async fn dispatch_event_bus(&self, route: &Route, action: &RoutedAction) -> Result<(String, serde_json::Value), DispatchError> {
        let topic = route.kafka_topic.clone().unwrap_or_default();
        let partition_key = action
            .payload
            .entity_id
            .clone()
            .unwrap_or_else(|| action.id.to_string());
        let event = json!({
            "event_id": Uuid::new_v4(),
            "event_type": format!("{}.{:?}", action.payload.target_system, action.payload.action_type).to_lowercase(),
            "entity_id": action.payload.entity_id,
            "entity_type": action.payload.entity_type,
            "data": action.payload.data,
            "metadata": {"topic": topic, "partition_key": partition_key},
        });
        tracing::info!(topic = %topic, partition_key = %partition_key, "publishing fabric event");
        Ok(("event_bus_publish".to_string(), event))
    }

    async fn dispatch_warehouse(&self, route: &Route, action: &RoutedAction) -> Result<(String, serde_json::Value), DispatchError> {
        let row = json!({
            "schema": route.warehouse_schema,
            "table": route.warehouse_table,
            "operation": route.warehouse_operation,
            "columns": action.payload.data,
        });
        tracing::info!(schema = ?route.warehouse_schema, table = ?route.warehouse_table, "writing warehouse staging row");
        Ok(("warehouse_staging_write".to_string(), row))
    }

    async fn http_call(&self, method: &str, url: &str, body: &serde_json::Value) -> Result<serde_json::Value, DispatchError> {
        let transport = Arc::clone(&self.transport);
        let method = method.to_string();
        let url = url.to_string();
        let body = body.clone();

        let result = ResilienceStack::global()
            .call(DependencyKind::Http, "fabric_http_call", move || {
                let transport = Arc::clone(&transport);
                let method = method.clone();
                let url = url.clone();
                let body = body.clone();
                async move { transport.call(&method, &url, &body).await }
            })
            .await;

        match result {
            Ok(response) => Ok(response),
            Err(crate::resilience::ResilienceError::Timeout(_)) => Err(DispatchError::Timeout),
            Err(e) => Err(DispatchError::Other(e.to_string())),
        }
    }
}

enum DispatchError {
    Timeout,
    Other(String),
}
