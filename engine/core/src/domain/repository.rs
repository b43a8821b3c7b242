// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts, one per owning component. Each maps onto one or
//! more keyed tables:
//!
//! | Trait | Tables | Implementations |
//! |-------|--------|-----------------|
//! | `CapabilityRepository` | `capabilities`, `performance_metrics` | `InMemoryStore`, `SledStore` |
//! | `MetacognitionRepository` | `learning_gaps`, `objectives`, `adaptation_strategies` | `InMemoryStore`, `SledStore` |
//! | `PluginRepository` | `plugins` | `InMemoryStore`, `SledStore` |
//! | `SkillRepository` (cortex) | `discovered_skills`, `pattern_clusters` | `InMemoryStore`, `SledStore` |
//!
//! The storage backend is chosen from `spec.storage.backend` in the engine
//! configuration. Repositories are synchronous; callers wrap writes in a
//! bounded retry policy and keep in-memory state authoritative on failure.

use std::collections::BTreeMap;

use crate::domain::capability::{CapabilityDomain, PerformanceMetric};
use crate::domain::metacognition::{AdaptationStrategy, LearningGap, LearningObjective};
use crate::domain::plugin::{PluginId, PluginInfo};

pub use nightframe_cortex::domain::{RepositoryError, SkillRepository};

pub trait CapabilityRepository: Send + Sync {
    /// Upsert the confidence for every domain in the map
    fn save_capabilities(&self, capabilities: &BTreeMap<CapabilityDomain, f64>) -> Result<(), RepositoryError>;

    fn load_capabilities(&self) -> Result<BTreeMap<CapabilityDomain, f64>, RepositoryError>;

    /// Append metrics; ids already stored are ignored
    fn append_metrics(&self, metrics: &[PerformanceMetric]) -> Result<(), RepositoryError>;

    /// Most recent metrics, oldest first
    fn recent_metrics(&self, limit: usize) -> Result<Vec<PerformanceMetric>, RepositoryError>;
}

pub trait MetacognitionRepository: Send + Sync {
    fn save_gaps(&self, gaps: &[LearningGap]) -> Result<(), RepositoryError>;

    /// All gaps ordered by discovery time
    fn load_gaps(&self) -> Result<Vec<LearningGap>, RepositoryError>;

    fn save_objectives(&self, objectives: &[LearningObjective]) -> Result<(), RepositoryError>;

    fn load_objectives(&self) -> Result<Vec<LearningObjective>, RepositoryError>;

    fn save_strategies(&self, strategies: &[AdaptationStrategy]) -> Result<(), RepositoryError>;

    fn load_strategies(&self) -> Result<Vec<AdaptationStrategy>, RepositoryError>;
}

pub trait PluginRepository: Send + Sync {
    fn save_plugin(&self, info: &PluginInfo) -> Result<(), RepositoryError>;

    fn find_plugin(&self, id: &PluginId) -> Result<Option<PluginInfo>, RepositoryError>;

    fn list_plugins(&self) -> Result<Vec<PluginInfo>, RepositoryError>;
}
