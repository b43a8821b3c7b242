// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-process engine host
//!
//! Every CLI command that touches state builds an [`EmbeddedEngine`], works
//! through it and closes it, so sled sees at most one writer at a time.
//! Only training commands attach a learning loop; plugin loads elsewhere
//! leave capability confidence untouched.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use nightframe_core::application::{Engine, LearningLoop};
use nightframe_core::collaborators::{CollaboratorError, FeatureBatch, FeatureSource};
use nightframe_core::config::EngineConfigManifest;
use nightframe_core::infrastructure::codegen::TemplateCodeGenerator;
use nightframe_core::infrastructure::trainer::LinearTrainer;

pub struct EmbeddedEngine {
    pub engine: Arc<Engine>,
}

impl EmbeddedEngine {
    pub fn open(config_path: Option<PathBuf>) -> Result<Self> {
        let config = EngineConfigManifest::load_or_default(config_path)
            .context("Failed to load configuration")?;
        Self::from_config(config)
    }

    pub fn from_config(config: EngineConfigManifest) -> Result<Self> {
        config
            .validate()
            .context("Configuration validation failed")?;

        let engine = Arc::new(Engine::from_config(config).context("Failed to start engine")?);
        info!("Embedded engine ready");
        Ok(Self { engine })
    }

    /// Wire a learning loop with the linear trainer and template generator.
    /// Call once per engine: every call registers another set of callbacks.
    pub fn learning_loop(&self) -> Arc<LearningLoop> {
        let plugin_dir = self.engine.config().spec.plugins.directory.clone();
        Arc::new(LearningLoop::new(
            self.engine.clone(),
            Some(Arc::new(LinearTrainer::default())),
            Some(Arc::new(TemplateCodeGenerator::new(plugin_dir))),
        ))
    }

    pub fn close(&self) -> Result<()> {
        self.engine.close().context("Failed to close engine")
    }
}

/// Read a `{"features": [[...]], "labels": [...]}` document.
pub fn read_batch(path: &Path) -> Result<FeatureBatch> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read feature batch {:?}", path))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse feature batch {:?}", path))
}

/// Feeds the same batch to every cycle.
pub struct RepeatingSource {
    batch: FeatureBatch,
}

impl RepeatingSource {
    pub fn new(batch: FeatureBatch) -> Self {
        Self { batch }
    }
}

#[async_trait]
impl FeatureSource for RepeatingSource {
    async fn next_batch(&self) -> Result<Option<FeatureBatch>, CollaboratorError> {
        Ok(Some(self.batch.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nightframe_core::config::StorageBackendKind;
    use tempfile::TempDir;

    #[test]
    fn test_read_batch_accepts_missing_labels() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("batch.json");
        std::fs::write(&path, r#"{"features": [[1.0, 2.0], [3.0, 4.0]]}"#).unwrap();

        let batch = read_batch(&path).unwrap();
        assert_eq!(batch.features.len(), 2);
        assert!(batch.labels.is_none());
    }

    #[test]
    fn test_read_batch_reports_the_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "features: nope").unwrap();

        let err = read_batch(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("broken.json"));
    }

    #[test]
    fn test_invalid_config_is_refused() {
        let mut config = EngineConfigManifest::default();
        config.spec.storage.backend = StorageBackendKind::Memory;
        config.spec.scheduler.interval_seconds = 0;
        assert!(EmbeddedEngine::from_config(config).is_err());
    }

    #[tokio::test]
    async fn test_repeating_source_never_runs_dry() {
        let source = RepeatingSource::new(FeatureBatch {
            features: vec![vec![0.5]],
            labels: None,
        });
        for _ in 0..3 {
            assert!(source.next_batch().await.unwrap().is_some());
        }
    }
}
