//! Cacheable resources and their static cache policy.
//!
//! Every resource the dashboard may cache is a [`Resource`] variant. The
//! [`ResourceTable`] maps each one to a [`ResourceCacheConfig`] and is built
//! once, before the manager exists; a resource with no entry is not cacheable.

use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Analytics and API resources served through the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    /// Headline KPI tiles on the overview dashboard.
    Kpis,
    /// Per-agent throughput and latency series.
    AgentMetrics,
    /// Registered agents and their capabilities.
    AgentList,
    /// Recent workflow executions.
    WorkflowRuns,
    /// Chat transcripts for a conversation.
    ConversationHistory,
    /// Token usage per model.
    ModelUsage,
    /// Spend grouped by agent, model and workflow.
    CostBreakdown,
    /// Service health probes.
    SystemHealth,
    /// Real-time event feed. Never cached by default.
    LiveEvents,
}

impl Resource {
    pub const ALL: [Resource; 9] = [
        Resource::Kpis,
        Resource::AgentMetrics,
        Resource::AgentList,
        Resource::WorkflowRuns,
        Resource::ConversationHistory,
        Resource::ModelUsage,
        Resource::CostBreakdown,
        Resource::SystemHealth,
        Resource::LiveEvents,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Resource::Kpis => "kpis",
            Resource::AgentMetrics => "agent_metrics",
            Resource::AgentList => "agent_list",
            Resource::WorkflowRuns => "workflow_runs",
            Resource::ConversationHistory => "conversation_history",
            Resource::ModelUsage => "model_usage",
            Resource::CostBreakdown => "cost_breakdown",
            Resource::SystemHealth => "system_health",
            Resource::LiveEvents => "live_events",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resource `{0}`")]
pub struct UnknownResource(pub String);

impl FromStr for Resource {
    type Err = UnknownResource;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Resource::ALL
            .into_iter()
            .find(|resource| resource.as_str() == value)
            .ok_or_else(|| UnknownResource(value.to_string()))
    }
}

/// Which tiers a resource is written to and read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierStrategy {
    FastOnly,
    DurableOnly,
    /// Both tiers; durable hits are promoted into the fast tier.
    Hybrid,
}

impl TierStrategy {
    pub fn uses_fast(self) -> bool {
        matches!(self, TierStrategy::FastOnly | TierStrategy::Hybrid)
    }

    pub fn uses_durable(self) -> bool {
        matches!(self, TierStrategy::DurableOnly | TierStrategy::Hybrid)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TierStrategy::FastOnly => "fast_only",
            TierStrategy::DurableOnly => "durable_only",
            TierStrategy::Hybrid => "hybrid",
        }
    }
}

/// Cache policy for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceCacheConfig {
    pub ttl: Duration,
    pub tier: TierStrategy,
    /// Fast-tier capacity for this resource; the tier default applies when unset.
    pub max_entries: Option<NonZeroUsize>,
}

impl ResourceCacheConfig {
    pub const fn new(ttl: Duration, tier: TierStrategy, max_entries: Option<NonZeroUsize>) -> Self {
        Self {
            ttl,
            tier,
            max_entries,
        }
    }
}

const fn capacity(value: usize) -> Option<NonZeroUsize> {
    NonZeroUsize::new(value)
}

/// Immutable resource → policy table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceTable {
    entries: BTreeMap<Resource, ResourceCacheConfig>,
}

impl ResourceTable {
    /// A table with no cacheable resources.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The dashboard's built-in policies.
    pub fn builtin() -> Self {
        use TierStrategy::*;

        const MINUTE: u64 = 60;
        let entries = [
            (Resource::Kpis, 5 * MINUTE, Hybrid, capacity(20)),
            (Resource::AgentMetrics, 2 * MINUTE, FastOnly, capacity(50)),
            (Resource::AgentList, 10 * MINUTE, Hybrid, capacity(10)),
            (Resource::WorkflowRuns, MINUTE, FastOnly, capacity(100)),
            (Resource::ConversationHistory, 30 * MINUTE, DurableOnly, None),
            (Resource::ModelUsage, 15 * MINUTE, Hybrid, capacity(30)),
            (Resource::CostBreakdown, 60 * MINUTE, DurableOnly, None),
            (Resource::SystemHealth, 30, FastOnly, capacity(5)),
        ];

        Self {
            entries: entries
                .into_iter()
                .map(|(resource, ttl_secs, tier, max_entries)| {
                    (
                        resource,
                        ResourceCacheConfig::new(Duration::from_secs(ttl_secs), tier, max_entries),
                    )
                })
                .collect(),
        }
    }

    /// Add or replace a policy. Only meant for building the table.
    pub fn with(mut self, resource: Resource, config: ResourceCacheConfig) -> Self {
        self.entries.insert(resource, config);
        self
    }

    /// Make a resource uncacheable. Only meant for building the table.
    pub fn without(mut self, resource: Resource) -> Self {
        self.entries.remove(&resource);
        self
    }

    pub fn get(&self, resource: Resource) -> Option<&ResourceCacheConfig> {
        self.entries.get(&resource)
    }

    pub fn is_cacheable(&self, resource: Resource) -> bool {
        self.entries.contains_key(&resource)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Resource, &ResourceCacheConfig)> {
        self.entries.iter().map(|(resource, config)| (*resource, config))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_names_roundtrip() {
        for resource in Resource::ALL {
            assert_eq!(resource.as_str().parse::<Resource>(), Ok(resource));
        }
        assert_eq!(
            "kpi".parse::<Resource>(),
            Err(UnknownResource("kpi".to_string()))
        );
    }

    #[test]
    fn serde_name_matches_display() {
        let json = serde_json::to_string(&Resource::AgentMetrics).expect("serialize");
        assert_eq!(json, "\"agent_metrics\"");
    }

    #[test]
    fn builtin_table_leaves_live_events_uncacheable() {
        let table = ResourceTable::builtin();
        assert!(!table.is_cacheable(Resource::LiveEvents));
        assert_eq!(table.len(), Resource::ALL.len() - 1);

        let kpis = table.get(Resource::Kpis).expect("kpis policy");
        assert_eq!(kpis.ttl, Duration::from_secs(300));
        assert_eq!(kpis.tier, TierStrategy::Hybrid);
        assert_eq!(kpis.max_entries.map(NonZeroUsize::get), Some(20));
    }

    #[test]
    fn tier_selection() {
        assert!(TierStrategy::Hybrid.uses_fast());
        assert!(TierStrategy::Hybrid.uses_durable());
        assert!(TierStrategy::FastOnly.uses_fast());
        assert!(!TierStrategy::FastOnly.uses_durable());
        assert!(!TierStrategy::DurableOnly.uses_fast());
        assert!(TierStrategy::DurableOnly.uses_durable());
    }

    #[test]
    fn builder_overrides_and_removes() {
        let table = ResourceTable::builtin()
            .with(
                Resource::LiveEvents,
                ResourceCacheConfig::new(Duration::from_secs(5), TierStrategy::FastOnly, None),
            )
            .without(Resource::Kpis);

        assert!(table.is_cacheable(Resource::LiveEvents));
        assert!(!table.is_cacheable(Resource::Kpis));
    }

    #[test]
    fn iter_yields_policies_in_resource_order() {
        let table = ResourceTable::builtin().without(Resource::AgentList);
        let resources: Vec<Resource> = table.iter().map(|(resource, _)| resource).collect();

        assert_eq!(resources.first(), Some(&Resource::Kpis));
        assert!(!resources.contains(&Resource::AgentList));
        assert!(resources.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(ResourceTable::empty().is_empty());
        assert!(!table.is_empty());
    }
}
