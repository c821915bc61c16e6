//! Vector-store lookup for previously-seen field mappings, filtered by tenant.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::resilience::{DependencyKind, ResilienceStack};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagHit {
    pub canonical_field: String,
    pub similarity: f64,
}

pub const RAG_SHORT_CIRCUIT_THRESHOLD: f64 = 0.90;

#[derive(Debug, Clone)]
pub struct RagQuery<'a> {
    pub tenant_id: &'a str,
    pub connector: &'a str,
    pub table: &'a str,
    pub field: &'a str,
}

#[async_trait]
pub trait RagStore: Send + Sync {
    async fn best_match(&self, query: RagQuery<'_>) -> anyhow::Result<Option<RagHit>>;
}

/// In-memory lexicon used when no real vector store is wired up, and in tests.
pub struct StaticRagStore {
    entries: Vec<(String, String, String, RagHit)>,
}

impl StaticRagStore {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn seed(mut self, table: &str, field: &str, hit: RagHit) -> Self {
        self.entries.push((table.to_string(), field.to_string(), String::new(), hit));
        self
    }
}

impl Default for StaticRagStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RagStore for StaticRagStore {
    async fn best_match(&self, query: RagQuery<'_>) -> anyhow::Result<Option<RagHit>> {
        Ok(self
            .entries
            .iter()
            .find(|(table, field, _, _)| table == query.table && field == query.field)
            .map(|(_, _, _, hit)| hit.clone()))
    }
}

pub async fn lookup(store: &dyn RagStore, query: RagQuery<'_>) -> anyhow::Result<Option<RagHit>> {
    let tenant = query.tenant_id.to_string();
    let connector = query.connector.to_string();
    let table = query.table.to_string();
    let field = query.field.to_string();
    ResilienceStack::global()
        .call(DependencyKind::Rag, "rag_lookup", move || {
            let tenant = tenant.clone();
            let connector = connector.clone();
            let table = table.clone();
            let field = field.clone();
            async move {
                let q = RagQuery { tenant_id: &tenant, connector: &connector, table: &table, field: &field };
                store.best_match(q).await
            }
        })
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn high_similarity_hit_is_returned() {
        let store = StaticRagStore::new().seed(
            "orders",
            "cust_id",
            RagHit { canonical_field: "customer_id".to_string(), similarity: 0.95 },
        );
        let hit = lookup(
            &store,
            RagQuery { tenant_id: "t1", connector: "salesforce", table: "orders", field: "cust_id" },
        )
        .await
        .unwrap();
        assert!(hit.unwrap().similarity >= RAG_SHORT_CIRCUIT_THRESHOLD);
    }

    #[tokio::test]
    async fn unknown_field_returns_none() {
        let store = StaticRagStore::new();
        let hit = lookup(
            &store,
            RagQuery { tenant_id: "t1", connector: "salesforce", table: "orders", field: "unknown_field" },
        )
        .await
        .unwrap();
        assert!(hit.is_none());
    }
}
