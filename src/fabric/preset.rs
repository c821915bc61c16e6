//! The fabric preset: which routing topology a tenant's outbound actions
//! flow through.
//!
//! The upstream system names this inconsistently — sometimes
//! `PRESET_1_DIRECT`, sometimes `PRESET_6_SCRAPPY` for the same concept,
//! and only three of the five documented presets have real dispatch
//! logic. This enum collapses that to one canonical name per preset and
//! the router implements all five.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FabricPreset {
    /// Direct peer-to-peer HTTP calls. The only preset allowed to resolve
    /// a direct endpoint.
    Scrappy,
    ApiGateway,
    Ipaas,
    EventBus,
    DataWarehouse,
}

impl FabricPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            FabricPreset::Scrappy => "scrappy",
            FabricPreset::ApiGateway => "api_gateway",
            FabricPreset::Ipaas => "ipaas",
            FabricPreset::EventBus => "event_bus",
            FabricPreset::DataWarehouse => "data_warehouse",
        }
    }
}
