//! Agent Discovery (C8): a thread-safe registry keyed by agent id, with
//! secondary indexes by tenant, capability id, and capability tag.

mod agent_card;

pub use agent_card::{
    create_agent_card, AgentCapability, AgentCard, AgentEndpoint, AuthScheme, CapabilityType,
    CertificationStatus, ProtocolVersion,
};

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone, Copy)]
pub struct AgentHealth {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub last_checked: DateTime<Utc>,
}

impl Default for AgentHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::Unknown,
            consecutive_failures: 0,
            last_checked: Utc::now(),
        }
    }
}

/// Predicate set for [`AgentDiscovery::discover`]. Every field is
/// optional; an absent field imposes no constraint.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryFilter {
    pub ids: Option<Vec<String>>,
    pub tenant_id: Option<String>,
    pub capability_ids: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub agent_type: Option<String>,
    pub role: Option<String>,
    pub min_trust_level: Option<u8>,
    pub certification_status: Option<CertificationStatus>,
    pub can_delegate: Option<bool>,
    pub can_accept_delegation: Option<bool>,
    pub exclude_unhealthy: bool,
    pub offset: usize,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct DiscoveryResult {
    pub cards: Vec<AgentCard>,
    pub total_matched: usize,
}

type HealthCallback = Box<dyn Fn(&str, HealthStatus, HealthStatus) + Send + Sync>;

#[derive(Default)]
struct Indexes {
    by_tenant: HashMap<String, HashSet<String>>,
    by_capability: HashMap<String, HashSet<String>>,
    by_tag: HashMap<String, HashSet<String>>,
}

struct Inner {
    agents: HashMap<String, AgentCard>,
    health: HashMap<String, AgentHealth>,
    indexes: Indexes,
}

#[derive(Default)]
pub struct AgentDiscovery {
    inner: RwLock<Inner>,
    on_health_change: RwLock<Vec<HealthCallback>>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            agents: HashMap::new(),
            health: HashMap::new(),
            indexes: Indexes::default(),
        }
    }
}

impl AgentDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, card: AgentCard) {
        let mut inner = self.inner.write().unwrap();
        inner.indexes.by_tenant.entry(card.tenant_id.clone()).or_default().insert(card.id.clone());
        for cap in &card.capabilities {
            inner.indexes.by_capability.entry(cap.id.clone()).or_default().insert(card.id.clone());
            for tag in &cap.tags {
                inner.indexes.by_tag.entry(tag.clone()).or_default().insert(card.id.clone());
            }
        }
        for tag in &card.tags {
            inner.indexes.by_tag.entry(tag.clone()).or_default().insert(card.id.clone());
        }
        inner.health.entry(card.id.clone()).or_default();
        inner.agents.insert(card.id.clone(), card);
    }

    pub fn unregister(&self, id: &str) {
        let mut inner = self.inner.write().unwrap();
        if let Some(card) = inner.agents.remove(id) {
            if let Some(set) = inner.indexes.by_tenant.get_mut(&card.tenant_id) {
                set.remove(id);
            }
            for cap in &card.capabilities {
                if let Some(set) = inner.indexes.by_capability.get_mut(&cap.id) {
                    set.remove(id);
                }
            }
            for (_, set) in inner.indexes.by_tag.iter_mut() {
                set.remove(id);
            }
        }
        inner.health.remove(id);
    }

    pub fn update(&self, card: AgentCard) {
        self.unregister(&card.id);
        self.register(card);
    }

    pub fn get(&self, id: &str) -> Option<AgentCard> {
        self.inner.read().unwrap().agents.get(id).cloned()
    }

    pub fn get_health(&self, id: &str) -> Option<AgentHealth> {
        self.inner.read().unwrap().health.get(id).cloned()
    }

    pub fn on_health_change<F>(&self, f: F)
    where
        F: Fn(&str, HealthStatus, HealthStatus) + Send + Sync + 'static,
    {
        self.on_health_change.write().unwrap().push(Box::new(f));
    }

    pub fn update_health(&self, id: &str, status: HealthStatus) {
        let previous = {
            let mut inner = self.inner.write().unwrap();
            let entry = inner.health.entry(id.to_string()).or_default();
            let previous = entry.status;
            if status == HealthStatus::Unhealthy || status == HealthStatus::Degraded {
                entry.consecutive_failures += 1;
            } else {
                entry.consecutive_failures = 0;
            }
            entry.status = status;
            entry.last_checked = Utc::now();
            previous
        };

        if previous != status {
            for cb in self.on_health_change.read().unwrap().iter() {
                cb(id, previous, status);
            }
        }
    }

    /// Invoke an externally supplied check and record its result.
    /// Callback failures never propagate; a checker error is recorded as
    /// `Unhealthy`.
    pub fn check_health<F>(&self, id: &str, checker: F)
    where
        F: FnOnce() -> bool,
    {
        let healthy = std::panic::catch_unwind(std::panic::AssertUnwindSafe(checker)).unwrap_or(false);
        self.update_health(id, if healthy { HealthStatus::Healthy } else { HealthStatus::Unhealthy });
    }

    pub fn find_by_capability(&self, capability_id: &str) -> Vec<AgentCard> {
        let inner = self.inner.read().unwrap();
        inner
            .indexes
            .by_capability
            .get(capability_id)
            .map(|ids| ids.iter().filter_map(|id| inner.agents.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    pub fn find_by_tag(&self, tag: &str) -> Vec<AgentCard> {
        let inner = self.inner.read().unwrap();
        inner
            .indexes
            .by_tag
            .get(tag)
            .map(|ids| ids.iter().filter_map(|id| inner.agents.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    pub fn discover(&self, filter: &DiscoveryFilter) -> DiscoveryResult {
        let inner = self.inner.read().unwrap();

        let mut candidates: Option<HashSet<String>> = None;
        let intersect = |current: &mut Option<HashSet<String>>, set: HashSet<String>| match current.take() {
            Some(existing) => *current = Some(existing.intersection(&set).cloned().collect()),
            None => *current = Some(set),
        };

        if let Some(ids) = &filter.ids {
            intersect(&mut candidates, ids.iter().cloned().collect());
        }
        if let Some(tenant) = &filter.tenant_id {
            intersect(&mut candidates, inner.indexes.by_tenant.get(tenant).cloned().unwrap_or_default());
        }
        if let Some(cap_ids) = &filter.capability_ids {
            let mut set = HashSet::new();
            for cap_id in cap_ids {
                if let Some(ids) = inner.indexes.by_capability.get(cap_id) {
                    set.extend(ids.iter().cloned());
                }
            }
            intersect(&mut candidates, set);
        }
        if let Some(tags) = &filter.tags {
            let mut set = HashSet::new();
            for tag in tags {
                if let Some(ids) = inner.indexes.by_tag.get(tag) {
                    set.extend(ids.iter().cloned());
                }
            }
            intersect(&mut candidates, set);
        }

        let candidate_ids: Vec<String> = match candidates {
            Some(set) => set.into_iter().collect(),
            None => inner.agents.keys().cloned().collect(),
        };

        let mut matched: Vec<AgentCard> = candidate_ids
            .into_iter()
            .filter_map(|id| {
                let card = inner.agents.get(&id)?;
                if let Some(t) = &filter.agent_type {
                    if &card.agent_type != t {
                        return None;
                    }
                }
                if let Some(r) = &filter.role {
                    if &card.role != r {
                        return None;
                    }
                }
                if let Some(min_trust) = filter.min_trust_level {
                    if card.trust_level < min_trust {
                        return None;
                    }
                }
                if let Some(cert) = filter.certification_status {
                    if card.certification_status != cert {
                        return None;
                    }
                }
                if let Some(cd) = filter.can_delegate {
                    if card.can_delegate != cd {
                        return None;
                    }
                }
                if let Some(cad) = filter.can_accept_delegation {
                    if card.can_accept_delegation != cad {
                        return None;
                    }
                }
                if filter.exclude_unhealthy {
                    let health = inner.health.get(&id).map(|h| h.status).unwrap_or(HealthStatus::Unknown);
                    if health == HealthStatus::Unhealthy {
                        return None;
                    }
                }
                Some(card.clone())
            })
            .collect();

        matched.sort_by(|a, b| b.trust_level.cmp(&a.trust_level));
        let total_matched = matched.len();

        let page: Vec<AgentCard> = matched
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();

        DiscoveryResult { cards: page, total_matched }
    }

    /// Healthy agents with `capability_id`, accepting delegation, minus
    /// `excluding`.
    pub fn find_delegatees(&self, capability_id: &str, excluding: Option<&str>, tenant_id: Option<&str>) -> Vec<AgentCard> {
        let filter = DiscoveryFilter {
            capability_ids: Some(vec![capability_id.to_string()]),
            tenant_id: tenant_id.map(|s| s.to_string()),
            can_accept_delegation: Some(true),
            exclude_unhealthy: true,
            ..Default::default()
        };
        self.discover(&filter)
            .cards
            .into_iter()
            .filter(|c| Some(c.id.as_str()) != excluding)
            .collect()
    }

    pub fn get_statistics(&self) -> serde_json::Value {
        let inner = self.inner.read().unwrap();
        serde_json::json!({
            "total_agents": inner.agents.len(),
            "tenants": inner.indexes.by_tenant.len(),
            "capabilities": inner.indexes.by_capability.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_sorts_by_trust_level_descending() {
        let discovery = AgentDiscovery::new();
        let mut low = create_agent_card("a1", "Low", "t1", "http://a1");
        low.trust_level = 10;
        let mut high = create_agent_card("a2", "High", "t1", "http://a2");
        high.trust_level = 90;
        discovery.register(low);
        discovery.register(high);

        let result = discovery.discover(&DiscoveryFilter::default());
        assert_eq!(result.cards[0].id, "a2");
        assert_eq!(result.cards[1].id, "a1");
    }

    #[test]
    fn find_delegatees_excludes_the_given_agent_and_unhealthy_ones() {
        let discovery = AgentDiscovery::new();
        let a1 = create_agent_card("a1", "A1", "t1", "http://a1");
        let a2 = create_agent_card("a2", "A2", "t1", "http://a2");
        let cap_id = a1.capabilities[0].id.clone();
        discovery.register(a1);
        discovery.register(a2.clone());
        discovery.update_health("a2", HealthStatus::Unhealthy);

        let delegatees = discovery.find_delegatees(&cap_id, Some("a1"), Some("t1"));
        assert!(delegatees.iter().all(|c| c.id != "a1" && c.id != "a2"));
    }

    #[test]
    fn health_change_callback_fires_only_on_transition() {
        let discovery = AgentDiscovery::new();
        discovery.register(create_agent_card("a1", "A1", "t1", "http://a1"));
        let transitions = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let t2 = transitions.clone();
        discovery.on_health_change(move |id, from, to| {
            t2.lock().unwrap().push((id.to_string(), from, to));
        });
        discovery.update_health("a1", HealthStatus::Healthy);
        discovery.update_health("a1", HealthStatus::Healthy);
        discovery.update_health("a1", HealthStatus::Unhealthy);
        assert_eq!(transitions.lock().unwrap().len(), 2);
    }
}
