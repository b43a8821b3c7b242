// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository interfaces for the discovery context.
//!
//! `RepositoryError` is shared with the engine crate, whose storage backends
//! implement these traits next to their own tables.

use crate::domain::pattern::PatternCluster;
use crate::domain::skill::{DiscoveredSkill, SkillId};

/// Storage for discovered skills and the clusters they came from
pub trait SkillRepository: Send + Sync {
    /// Save skill (create or update)
    fn save_skill(&self, skill: &DiscoveredSkill) -> Result<(), RepositoryError>;

    fn find_skill(&self, id: SkillId) -> Result<Option<DiscoveredSkill>, RepositoryError>;

    fn list_skills(&self) -> Result<Vec<DiscoveredSkill>, RepositoryError>;

    fn save_cluster(&self, cluster: &PatternCluster) -> Result<(), RepositoryError>;

    /// List clusters, optionally restricted to one domain
    fn list_clusters(&self, domain: Option<&str>) -> Result<Vec<PatternCluster>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
