// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use nightframe_cortex::{
    DiscoveredSkill, InMemorySkillRepository, PatternCluster, SkillId,
};
use parking_lot::RwLock;

use crate::domain::capability::{CapabilityDomain, MetricId, PerformanceMetric};
use crate::domain::metacognition::{
    AdaptationStrategy, GapId, LearningGap, LearningObjective, ObjectiveId, StrategyId,
};
use crate::domain::plugin::{PluginId, PluginInfo};
use crate::domain::repository::{
    CapabilityRepository, MetacognitionRepository, PluginRepository, RepositoryError,
    SkillRepository,
};

#[derive(Default)]
struct Tables {
    capabilities: BTreeMap<CapabilityDomain, f64>,
    metrics: Vec<PerformanceMetric>,
    metric_ids: HashSet<MetricId>,
    gaps: HashMap<GapId, LearningGap>,
    objectives: HashMap<ObjectiveId, LearningObjective>,
    strategies: HashMap<StrategyId, AdaptationStrategy>,
    plugins: HashMap<PluginId, PluginInfo>,
}

/// Thread-safe in-memory store. Clones share the same tables.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    skills: InMemorySkillRepository,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CapabilityRepository for InMemoryStore {
    fn save_capabilities(
        &self,
        capabilities: &BTreeMap<CapabilityDomain, f64>,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write();
        for (domain, confidence) in capabilities {
            tables.capabilities.insert(*domain, *confidence);
        }
        Ok(())
    }

    fn load_capabilities(&self) -> Result<BTreeMap<CapabilityDomain, f64>, RepositoryError> {
        Ok(self.tables.read().capabilities.clone())
    }

    fn append_metrics(&self, metrics: &[PerformanceMetric]) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write();
        for metric in metrics {
            if tables.metric_ids.insert(metric.id) {
                tables.metrics.push(metric.clone());
            }
        }
        Ok(())
    }

    fn recent_metrics(&self, limit: usize) -> Result<Vec<PerformanceMetric>, RepositoryError> {
        let tables = self.tables.read();
        let start = tables.metrics.len().saturating_sub(limit);
        Ok(tables.metrics[start..].to_vec())
    }
}

impl MetacognitionRepository for InMemoryStore {
    fn save_gaps(&self, gaps: &[LearningGap]) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write();
        for gap in gaps {
            tables.gaps.insert(gap.id, gap.clone());
        }
        Ok(())
    }

    fn load_gaps(&self) -> Result<Vec<LearningGap>, RepositoryError> {
        let mut gaps: Vec<LearningGap> = self.tables.read().gaps.values().cloned().collect();
        gaps.sort_by(|a, b| a.discovered_at.cmp(&b.discovered_at));
        Ok(gaps)
    }

    fn save_objectives(&self, objectives: &[LearningObjective]) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write();
        for objective in objectives {
            tables.objectives.insert(objective.id, objective.clone());
        }
        Ok(())
    }

    fn load_objectives(&self) -> Result<Vec<LearningObjective>, RepositoryError> {
        let mut objectives: Vec<LearningObjective> =
            self.tables.read().objectives.values().cloned().collect();
        objectives.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(objectives)
    }

    fn save_strategies(&self, strategies: &[AdaptationStrategy]) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write();
        for strategy in strategies {
            tables.strategies.insert(strategy.id, strategy.clone());
        }
        Ok(())
    }

    fn load_strategies(&self) -> Result<Vec<AdaptationStrategy>, RepositoryError> {
        let mut strategies: Vec<AdaptationStrategy> =
            self.tables.read().strategies.values().cloned().collect();
        strategies.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(strategies)
    }
}

impl PluginRepository for InMemoryStore {
    fn save_plugin(&self, info: &PluginInfo) -> Result<(), RepositoryError> {
        self.tables.write().plugins.insert(info.id.clone(), info.clone());
        Ok(())
    }

    fn find_plugin(&self, id: &PluginId) -> Result<Option<PluginInfo>, RepositoryError> {
        Ok(self.tables.read().plugins.get(id).cloned())
    }

    fn list_plugins(&self) -> Result<Vec<PluginInfo>, RepositoryError> {
        let mut plugins: Vec<PluginInfo> = self.tables.read().plugins.values().cloned().collect();
        plugins.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(plugins)
    }
}

impl SkillRepository for InMemoryStore {
    fn save_skill(&self, skill: &DiscoveredSkill) -> Result<(), RepositoryError> {
        self.skills.save_skill(skill)
    }

    fn find_skill(&self, id: SkillId) -> Result<Option<DiscoveredSkill>, RepositoryError> {
        self.skills.find_skill(id)
    }

    fn list_skills(&self) -> Result<Vec<DiscoveredSkill>, RepositoryError> {
        self.skills.list_skills()
    }

    fn save_cluster(&self, cluster: &PatternCluster) -> Result<(), RepositoryError> {
        self.skills.save_cluster(cluster)
    }

    fn list_clusters(&self, domain: Option<&str>) -> Result<Vec<PatternCluster>, RepositoryError> {
        self.skills.list_clusters(domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_append_is_idempotent_and_ordered() {
        let store = InMemoryStore::new();
        let first = PerformanceMetric::new(CapabilityDomain::Lte, "confidence", 0.1);
        let second = PerformanceMetric::new(CapabilityDomain::Lte, "confidence", 0.2);

        store.append_metrics(&[first.clone(), second.clone()]).unwrap();
        store.append_metrics(&[second.clone()]).unwrap();

        let recent = store.recent_metrics(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, first.id);
        assert_eq!(store.recent_metrics(1).unwrap()[0].id, second.id);
    }

    #[test]
    fn test_clones_share_tables() {
        let store = InMemoryStore::new();
        let clone = store.clone();
        let mut caps = BTreeMap::new();
        caps.insert(CapabilityDomain::MeshRouting, 0.4);
        clone.save_capabilities(&caps).unwrap();
        assert_eq!(store.load_capabilities().unwrap(), caps);
    }
}
