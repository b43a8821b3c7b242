// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory skill storage for development and tests.
//! Durable storage lives in the engine crate's sled backend.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::domain::{ClusterId, DiscoveredSkill, PatternCluster, RepositoryError, SkillId, SkillRepository};

#[derive(Clone, Default)]
pub struct InMemorySkillRepository {
    skills: Arc<RwLock<HashMap<SkillId, DiscoveredSkill>>>,
    clusters: Arc<RwLock<HashMap<ClusterId, PatternCluster>>>,
}

impl InMemorySkillRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SkillRepository for InMemorySkillRepository {
    fn save_skill(&self, skill: &DiscoveredSkill) -> Result<(), RepositoryError> {
        self.skills.write().insert(skill.id, skill.clone());
        Ok(())
    }

    fn find_skill(&self, id: SkillId) -> Result<Option<DiscoveredSkill>, RepositoryError> {
        Ok(self.skills.read().get(&id).cloned())
    }

    fn list_skills(&self) -> Result<Vec<DiscoveredSkill>, RepositoryError> {
        Ok(self.skills.read().values().cloned().collect())
    }

    fn save_cluster(&self, cluster: &PatternCluster) -> Result<(), RepositoryError> {
        self.clusters.write().insert(cluster.id, cluster.clone());
        Ok(())
    }

    fn list_clusters(&self, domain: Option<&str>) -> Result<Vec<PatternCluster>, RepositoryError> {
        Ok(self
            .clusters
            .read()
            .values()
            .filter(|c| domain.map_or(true, |d| c.domain == d))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DiscoveryMethod;

    #[test]
    fn test_save_and_find_skill() {
        let repo = InMemorySkillRepository::new();
        let skill = DiscoveredSkill::new("Auto_5g_nr_0", "test", "5g_nr", DiscoveryMethod::Manual);
        repo.save_skill(&skill).unwrap();

        let found = repo.find_skill(skill.id).unwrap().unwrap();
        assert_eq!(found.name, "Auto_5g_nr_0");
        assert_eq!(repo.list_skills().unwrap().len(), 1);
    }

    #[test]
    fn test_list_clusters_by_domain() {
        let repo = InMemorySkillRepository::new();
        repo.save_cluster(&PatternCluster::new("4g_lte", vec![0.0], vec![0], 0.0)).unwrap();
        repo.save_cluster(&PatternCluster::new("wifi_ap", vec![1.0], vec![1], 0.0)).unwrap();

        assert_eq!(repo.list_clusters(None).unwrap().len(), 2);
        assert_eq!(repo.list_clusters(Some("wifi_ap")).unwrap().len(), 1);
    }
}
