// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Engine Context
//!
//! Builds every engine component once from an [`EngineConfigManifest`] and
//! hands them out by reference. There are no process-wide singletons: two
//! engines in one process share nothing unless they share a storage path.
//!
//! Construction order:
//!
//! 1. storage backend (`sled` tree set or in-memory tables)
//! 2. [`CapabilityStore`], then [`MetacognitiveScheduler`] over it
//! 3. [`SkillDiscoveryEngine`] publishing to the [`EventBus`]
//! 4. [`PluginLoader`] over the configured plugin directory
//! 5. callback → event bus bridges
//!
//! [`Engine::close`] shuts plugins down and flushes all state. It is
//! idempotent.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Composition root for the adaptation engine

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use nightframe_cortex::{DiscoveryError, SkillDiscoveryEngine};
use serde::Serialize;
use tracing::info;

use crate::application::capability_store::CapabilityStore;
use crate::application::plugin_loader::PluginLoader;
use crate::application::scheduler::MetacognitiveScheduler;
use crate::domain::config::{EngineConfigManifest, StorageBackendKind};
use crate::domain::events::EngineEvent;
use crate::domain::metacognition::MetacognitiveState;
use crate::domain::plugin::{PluginRuntime, PluginStats};
use crate::domain::repository::{
    CapabilityRepository, MetacognitionRepository, PluginRepository, RepositoryError,
    SkillRepository,
};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::persistence::PersistencePolicy;
use crate::infrastructure::plugins::DefaultPluginRuntime;
use crate::infrastructure::repositories::{InMemoryStore, SledStore};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Storage error: {0}")]
    Storage(#[from] RepositoryError),

    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),
}

enum Storage {
    Sled(Arc<SledStore>),
    Memory(Arc<InMemoryStore>),
}

struct Repositories {
    capabilities: Arc<dyn CapabilityRepository>,
    metacognition: Arc<dyn MetacognitionRepository>,
    plugins: Arc<dyn PluginRepository>,
    skills: Arc<dyn SkillRepository>,
}

impl Storage {
    fn open(config: &EngineConfigManifest) -> Result<Self, RepositoryError> {
        match config.spec.storage.backend {
            StorageBackendKind::Sled => Ok(Storage::Sled(Arc::new(SledStore::open(
                &config.spec.storage.path,
            )?))),
            StorageBackendKind::Memory => Ok(Storage::Memory(Arc::new(InMemoryStore::new()))),
        }
    }

    fn repositories(&self) -> Repositories {
        match self {
            Storage::Sled(store) => Repositories {
                capabilities: store.clone(),
                metacognition: store.clone(),
                plugins: store.clone(),
                skills: store.clone(),
            },
            Storage::Memory(store) => Repositories {
                capabilities: store.clone(),
                metacognition: store.clone(),
                plugins: store.clone(),
                skills: store.clone(),
            },
        }
    }

    fn flush(&self) -> Result<(), RepositoryError> {
        match self {
            Storage::Sled(store) => store.flush(),
            Storage::Memory(_) => Ok(()),
        }
    }

    fn kind(&self) -> StorageBackendKind {
        match self {
            Storage::Sled(_) => StorageBackendKind::Sled,
            Storage::Memory(_) => StorageBackendKind::Memory,
        }
    }
}

/// Point-in-time view of the whole engine
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub name: String,
    pub storage_backend: StorageBackendKind,
    pub storage_path: Option<PathBuf>,
    pub autonomous: bool,
    pub metacognition: MetacognitiveState,
    pub plugins: PluginStats,
    pub active_skills: usize,
    pub candidate_skills: usize,
    pub known_patterns: usize,
}

pub struct Engine {
    config: EngineConfigManifest,
    storage: Storage,
    capability_store: Arc<CapabilityStore>,
    scheduler: Arc<MetacognitiveScheduler>,
    discovery: Arc<SkillDiscoveryEngine>,
    loader: Arc<PluginLoader>,
    event_bus: EventBus,
    closed: AtomicBool,
}

impl Engine {
    pub fn from_config(config: EngineConfigManifest) -> Result<Self, EngineError> {
        Self::with_runtime(config, Arc::new(DefaultPluginRuntime::default()))
    }

    /// Build with a custom plugin runtime, e.g. one with extra factories.
    pub fn with_runtime(
        config: EngineConfigManifest,
        runtime: Arc<dyn PluginRuntime>,
    ) -> Result<Self, EngineError> {
        config
            .validate()
            .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;

        let storage = Storage::open(&config)?;
        let repositories = storage.repositories();
        let policy = PersistencePolicy::from(&config.spec.persistence);
        let event_bus = EventBus::with_default_capacity();

        let capability_store = Arc::new(CapabilityStore::new(repositories.capabilities, policy));
        let scheduler = Arc::new(MetacognitiveScheduler::new(
            capability_store.clone(),
            repositories.metacognition,
            policy,
        ));
        let discovery = Arc::new(
            SkillDiscoveryEngine::new(repositories.skills, config.spec.discovery.to_discovery_config())
                .with_publisher(Arc::new(event_bus.clone())),
        );
        let loader = Arc::new(PluginLoader::new(
            config.spec.plugins.directory.clone(),
            config.spec.plugins.config.clone(),
            runtime,
            repositories.plugins,
            policy,
        ));

        let engine = Self {
            config,
            storage,
            capability_store,
            scheduler,
            discovery,
            loader,
            event_bus,
            closed: AtomicBool::new(false),
        };
        engine.bridge_events();

        info!(
            name = %engine.config.metadata.name,
            backend = ?engine.storage.kind(),
            plugin_dir = %engine.loader.plugin_dir().display(),
            "NIGHTFRAME engine initialized"
        );
        Ok(engine)
    }

    /// Mirror every callback channel onto the event bus.
    fn bridge_events(&self) {
        let bus = self.event_bus.clone();
        self.scheduler.on_gap_identified(move |gap| {
            bus.publish(EngineEvent::GapIdentified {
                gap_id: gap.id,
                domain: gap.domain,
                severity: gap.severity,
                identified_at: gap.discovered_at,
            });
            Ok(())
        });

        let bus = self.event_bus.clone();
        self.scheduler.on_skill_discovered(move |crossing| {
            bus.publish(EngineEvent::SkillThresholdCrossed {
                domain: crossing.domain,
                previous: crossing.previous,
                confidence: crossing.confidence,
                crossed_at: crossing.crossed_at,
            });
            Ok(())
        });

        let bus = self.event_bus.clone();
        self.scheduler.on_adaptation(move |strategy| {
            bus.publish(EngineEvent::AdaptationCreated {
                strategy_id: strategy.id,
                name: strategy.name.clone(),
                target_domain: strategy.target_domain(),
                created_at: strategy.created_at,
            });
            Ok(())
        });

        let bus = self.event_bus.clone();
        self.scheduler.on_cycle_completed(move |report| {
            bus.publish(EngineEvent::CycleCompleted {
                cycle: report.cycle,
                gaps: report.gaps_identified.len(),
                objectives: report.objectives_created.len(),
                adaptations: report.adaptations_made.len(),
                error: report.error.clone(),
                completed_at: report.completed_at.unwrap_or_else(Utc::now),
            });
            Ok(())
        });

        let bus = self.event_bus.clone();
        self.loader.on_plugin_loaded(move |info| {
            bus.publish(EngineEvent::PluginLoaded {
                plugin_id: info.id.clone(),
                name: info.name.clone(),
                capabilities: info.capabilities.clone(),
                loaded_at: info.last_loaded.unwrap_or_else(Utc::now),
            });
            Ok(())
        });

        let bus = self.event_bus.clone();
        self.loader.on_plugin_error(move |failure| {
            bus.publish(EngineEvent::PluginFailed {
                plugin_id: failure.plugin_id.clone(),
                error: failure.error.clone(),
                failed_at: failure.failed_at,
            });
            Ok(())
        });

        let bus = self.event_bus.clone();
        self.loader.on_plugin_unloaded(move |id| {
            bus.publish(EngineEvent::PluginUnloaded {
                plugin_id: id.clone(),
                unloaded_at: Utc::now(),
            });
            Ok(())
        });
    }

    pub fn config(&self) -> &EngineConfigManifest {
        &self.config
    }

    pub fn capability_store(&self) -> &Arc<CapabilityStore> {
        &self.capability_store
    }

    pub fn scheduler(&self) -> &Arc<MetacognitiveScheduler> {
        &self.scheduler
    }

    pub fn discovery(&self) -> &Arc<SkillDiscoveryEngine> {
        &self.discovery
    }

    pub fn loader(&self) -> &Arc<PluginLoader> {
        &self.loader
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn status(&self) -> EngineStatus {
        let storage_path = match self.storage.kind() {
            StorageBackendKind::Sled => Some(self.config.spec.storage.path.clone()),
            StorageBackendKind::Memory => None,
        };
        EngineStatus {
            name: self.config.metadata.name.clone(),
            storage_backend: self.storage.kind(),
            storage_path,
            autonomous: self.config.spec.scheduler.autonomous,
            metacognition: self.scheduler.state(),
            plugins: self.loader.stats(),
            active_skills: self.discovery.active_skills().len(),
            candidate_skills: self.discovery.candidate_skills().len(),
            known_patterns: self.discovery.known_pattern_count(),
        }
    }

    /// Write all in-memory state through to storage.
    pub fn flush(&self) -> Result<(), EngineError> {
        self.capability_store.flush()?;
        self.scheduler.persist()?;
        self.discovery.flush()?;
        self.loader.persist_all()?;
        self.storage.flush()?;
        Ok(())
    }

    /// Shut plugins down and flush everything. Later calls do nothing.
    pub fn close(&self) -> Result<(), EngineError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("Closing NIGHTFRAME engine");
        self.loader.shutdown();
        self.flush()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::capability::CapabilityDomain;

    fn memory_config() -> EngineConfigManifest {
        let mut config = EngineConfigManifest::default();
        config.spec.storage.backend = StorageBackendKind::Memory;
        config.spec.plugins.directory = PathBuf::from("/nonexistent/nightframe/plugins");
        config
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = memory_config();
        config.kind = "NodeConfig".to_string();
        assert!(matches!(
            Engine::from_config(config),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_threshold_crossing_reaches_bus() {
        let engine = Engine::from_config(memory_config()).unwrap();
        let mut events = engine.event_bus().subscribe();

        engine
            .capability_store()
            .update(CapabilityDomain::MeshRouting, 0.7, "test")
            .unwrap();

        match events.try_recv().unwrap() {
            EngineEvent::SkillThresholdCrossed { domain, confidence, .. } => {
                assert_eq!(domain, CapabilityDomain::MeshRouting);
                assert!((confidence - 0.7).abs() < 1e-12);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_close_is_idempotent() {
        let engine = Engine::from_config(memory_config()).unwrap();
        engine.close().unwrap();
        engine.close().unwrap();
        assert!(engine.is_closed());
        assert_eq!(engine.status().plugins.total_plugins, 0);
    }
}
