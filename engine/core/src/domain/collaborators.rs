// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Narrow interfaces to the systems the engine drives but does not own:
//! model training, code generation and feature supply.

use std::path::PathBuf;

use async_trait::async_trait;
use nightframe_cortex::{DiscoveredSkill, SkillId};
use serde::{Deserialize, Serialize};

use crate::domain::capability::CapabilityDomain;
use crate::domain::metacognition::AdaptationStrategy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingOutcome {
    pub loss: f64,
    pub accuracy: f64,
    pub epochs_completed: u32,
}

#[async_trait]
pub trait ModelTrainer: Send + Sync {
    async fn train(
        &self,
        domain: CapabilityDomain,
        features: &[Vec<f64>],
        labels: &[f64],
    ) -> Result<TrainingOutcome, CollaboratorError>;

    /// Apply a freshly synthesized strategy to future training runs.
    fn apply_strategy(&self, _strategy: &AdaptationStrategy) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// Generated module source for one skill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    pub skill_id: SkillId,
    pub skill_name: String,
    pub file_name: String,
    pub content: String,
}

#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(&self, skill: &DiscoveredSkill) -> Result<GeneratedArtifact, CollaboratorError>;

    /// Validation problems; empty when the artifact is deployable
    async fn validate(&self, artifact: &GeneratedArtifact) -> Result<Vec<String>, CollaboratorError>;

    /// Write the artifact where the plugin loader can find it
    async fn deploy(&self, artifact: &GeneratedArtifact) -> Result<PathBuf, CollaboratorError>;
}

/// One batch of observations for discovery and training
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureBatch {
    pub features: Vec<Vec<f64>>,
    #[serde(default)]
    pub labels: Option<Vec<f64>>,
}

#[async_trait]
pub trait FeatureSource: Send + Sync {
    /// Next batch, `None` once the source is exhausted
    async fn next_batch(&self) -> Result<Option<FeatureBatch>, CollaboratorError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("Training failed: {0}")]
    Training(String),

    #[error("Code generation failed: {0}")]
    Generation(String),

    #[error("Deployment failed: {0}")]
    Deployment(String),

    #[error("Feature source failed: {0}")]
    Source(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
