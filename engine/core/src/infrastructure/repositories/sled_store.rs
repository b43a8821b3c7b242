// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! sled-backed store with one tree per table.
//!
//! | Tree | Key | Value |
//! |------|-----|-------|
//! | `capabilities` | domain name | confidence (JSON number) |
//! | `performance_metrics` | big-endian recorded-at nanos ++ metric uuid | `PerformanceMetric` |
//! | `learning_gaps` | gap uuid | `LearningGap` |
//! | `objectives` | objective uuid | `LearningObjective` |
//! | `adaptation_strategies` | strategy uuid | `AdaptationStrategy` |
//! | `discovered_skills` | skill uuid | `DiscoveredSkill` |
//! | `pattern_clusters` | cluster uuid | `PatternCluster` |
//! | `plugins` | plugin id | `PluginInfo` |
//!
//! Metric keys sort chronologically, so the most recent metrics are read
//! from the end of the tree.

use std::collections::BTreeMap;
use std::path::Path;

use nightframe_cortex::{DiscoveredSkill, PatternCluster, SkillId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::domain::capability::{CapabilityDomain, PerformanceMetric};
use crate::domain::metacognition::{AdaptationStrategy, LearningGap, LearningObjective};
use crate::domain::plugin::{PluginId, PluginInfo};
use crate::domain::repository::{
    CapabilityRepository, MetacognitionRepository, PluginRepository, RepositoryError,
    SkillRepository,
};

pub const TREE_NAMES: [&str; 8] = [
    "capabilities",
    "performance_metrics",
    "learning_gaps",
    "objectives",
    "adaptation_strategies",
    "discovered_skills",
    "pattern_clusters",
    "plugins",
];

fn db_err(e: sled::Error) -> RepositoryError {
    RepositoryError::Database(e.to_string())
}

fn put<T: Serialize>(tree: &sled::Tree, key: impl AsRef<[u8]>, value: &T) -> Result<(), RepositoryError> {
    let bytes = serde_json::to_vec(value)?;
    tree.insert(key.as_ref(), bytes).map_err(db_err)?;
    Ok(())
}

fn fetch<T: DeserializeOwned>(tree: &sled::Tree, key: impl AsRef<[u8]>) -> Result<Option<T>, RepositoryError> {
    match tree.get(key.as_ref()).map_err(db_err)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn scan<T: DeserializeOwned>(tree: &sled::Tree) -> Result<Vec<T>, RepositoryError> {
    let mut out = Vec::new();
    for item in tree.iter() {
        let (_, value) = item.map_err(db_err)?;
        out.push(serde_json::from_slice(&value)?);
    }
    Ok(out)
}

fn metric_key(metric: &PerformanceMetric) -> Vec<u8> {
    let nanos = metric.recorded_at.timestamp_nanos_opt().unwrap_or_default().max(0) as u64;
    let mut key = Vec::with_capacity(24);
    key.extend_from_slice(&nanos.to_be_bytes());
    key.extend_from_slice(metric.id.0.as_bytes());
    key
}

pub struct SledStore {
    db: sled::Db,
    capabilities: sled::Tree,
    metrics: sled::Tree,
    gaps: sled::Tree,
    objectives: sled::Tree,
    strategies: sled::Tree,
    skills: sled::Tree,
    clusters: sled::Tree,
    plugins: sled::Tree,
}

impl SledStore {
    /// Open (or create) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| RepositoryError::Database(format!("{}: {}", parent.display(), e)))?;
            }
        }
        let db = sled::open(path).map_err(db_err)?;
        info!(path = %path.display(), "Opened sled store");
        Self::from_db(db)
    }

    /// Database that is removed when dropped
    pub fn temporary() -> Result<Self, RepositoryError> {
        let db = sled::Config::new().temporary(true).open().map_err(db_err)?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, RepositoryError> {
        let tree = |name: &str| db.open_tree(name).map_err(db_err);
        Ok(Self {
            capabilities: tree(TREE_NAMES[0])?,
            metrics: tree(TREE_NAMES[1])?,
            gaps: tree(TREE_NAMES[2])?,
            objectives: tree(TREE_NAMES[3])?,
            strategies: tree(TREE_NAMES[4])?,
            skills: tree(TREE_NAMES[5])?,
            clusters: tree(TREE_NAMES[6])?,
            plugins: tree(TREE_NAMES[7])?,
            db,
        })
    }

    /// Flush dirty buffers to disk
    pub fn flush(&self) -> Result<(), RepositoryError> {
        self.db.flush().map_err(db_err)?;
        Ok(())
    }

    /// Record count per tree, in [`TREE_NAMES`] order
    pub fn table_sizes(&self) -> Vec<(&'static str, usize)> {
        let trees = [
            &self.capabilities,
            &self.metrics,
            &self.gaps,
            &self.objectives,
            &self.strategies,
            &self.skills,
            &self.clusters,
            &self.plugins,
        ];
        TREE_NAMES.iter().copied().zip(trees.iter().map(|t| t.len())).collect()
    }
}

impl CapabilityRepository for SledStore {
    fn save_capabilities(
        &self,
        capabilities: &BTreeMap<CapabilityDomain, f64>,
    ) -> Result<(), RepositoryError> {
        for (domain, confidence) in capabilities {
            put(&self.capabilities, domain.as_str(), confidence)?;
        }
        Ok(())
    }

    fn load_capabilities(&self) -> Result<BTreeMap<CapabilityDomain, f64>, RepositoryError> {
        let mut out = BTreeMap::new();
        for item in self.capabilities.iter() {
            let (key, value) = item.map_err(db_err)?;
            let name = String::from_utf8_lossy(&key);
            let domain = name
                .parse::<CapabilityDomain>()
                .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
            out.insert(domain, serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    fn append_metrics(&self, metrics: &[PerformanceMetric]) -> Result<(), RepositoryError> {
        for metric in metrics {
            put(&self.metrics, metric_key(metric), metric)?;
        }
        Ok(())
    }

    fn recent_metrics(&self, limit: usize) -> Result<Vec<PerformanceMetric>, RepositoryError> {
        let mut out = Vec::with_capacity(limit.min(self.metrics.len()));
        for item in self.metrics.iter().rev().take(limit) {
            let (_, value) = item.map_err(db_err)?;
            out.push(serde_json::from_slice(&value)?);
        }
        out.reverse();
        Ok(out)
    }
}

impl MetacognitionRepository for SledStore {
    fn save_gaps(&self, gaps: &[LearningGap]) -> Result<(), RepositoryError> {
        for gap in gaps {
            put(&self.gaps, gap.id.0.as_bytes(), gap)?;
        }
        Ok(())
    }

    fn load_gaps(&self) -> Result<Vec<LearningGap>, RepositoryError> {
        let mut gaps: Vec<LearningGap> = scan(&self.gaps)?;
        gaps.sort_by(|a, b| a.discovered_at.cmp(&b.discovered_at));
        Ok(gaps)
    }

    fn save_objectives(&self, objectives: &[LearningObjective]) -> Result<(), RepositoryError> {
        for objective in objectives {
            put(&self.objectives, objective.id.0.as_bytes(), objective)?;
        }
        Ok(())
    }

    fn load_objectives(&self) -> Result<Vec<LearningObjective>, RepositoryError> {
        let mut objectives: Vec<LearningObjective> = scan(&self.objectives)?;
        objectives.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(objectives)
    }

    fn save_strategies(&self, strategies: &[AdaptationStrategy]) -> Result<(), RepositoryError> {
        for strategy in strategies {
            put(&self.strategies, strategy.id.0.as_bytes(), strategy)?;
        }
        Ok(())
    }

    fn load_strategies(&self) -> Result<Vec<AdaptationStrategy>, RepositoryError> {
        let mut strategies: Vec<AdaptationStrategy> = scan(&self.strategies)?;
        strategies.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(strategies)
    }
}

impl PluginRepository for SledStore {
    fn save_plugin(&self, info: &PluginInfo) -> Result<(), RepositoryError> {
        put(&self.plugins, info.id.as_str(), info)
    }

    fn find_plugin(&self, id: &PluginId) -> Result<Option<PluginInfo>, RepositoryError> {
        fetch(&self.plugins, id.as_str())
    }

    fn list_plugins(&self) -> Result<Vec<PluginInfo>, RepositoryError> {
        scan(&self.plugins)
    }
}

impl SkillRepository for SledStore {
    fn save_skill(&self, skill: &DiscoveredSkill) -> Result<(), RepositoryError> {
        put(&self.skills, skill.id.0.as_bytes(), skill)
    }

    fn find_skill(&self, id: SkillId) -> Result<Option<DiscoveredSkill>, RepositoryError> {
        fetch(&self.skills, id.0.as_bytes())
    }

    fn list_skills(&self) -> Result<Vec<DiscoveredSkill>, RepositoryError> {
        scan(&self.skills)
    }

    fn save_cluster(&self, cluster: &PatternCluster) -> Result<(), RepositoryError> {
        put(&self.clusters, cluster.id.0.as_bytes(), cluster)
    }

    fn list_clusters(&self, domain: Option<&str>) -> Result<Vec<PatternCluster>, RepositoryError> {
        let clusters: Vec<PatternCluster> = scan(&self.clusters)?;
        Ok(clusters
            .into_iter()
            .filter(|c| domain.map_or(true, |d| c.domain == d))
            .collect())
    }
}
