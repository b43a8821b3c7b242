// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use nightframe_core::application::{
    Engine, LearningLoop, LearningLoopError, LearningLoopRunner, RunnerConfig,
};
use nightframe_core::capability::CapabilityDomain;
use nightframe_core::collaborators::{CodeGenerator, FeatureSource, ModelTrainer};
use nightframe_core::config::{EngineConfigManifest, StorageBackendKind};
use nightframe_core::infrastructure::codegen::TemplateCodeGenerator;
use nightframe_core::infrastructure::synthetic::SyntheticFeatureSource;
use nightframe_core::infrastructure::trainer::LinearTrainer;
use nightframe_core::plugin::PluginStatus;
use nightframe_cortex::SkillStatus;
use tempfile::TempDir;

fn config(plugin_dir: &Path, autonomous: bool) -> EngineConfigManifest {
    let mut config = EngineConfigManifest::default();
    config.spec.storage.backend = StorageBackendKind::Memory;
    config.spec.plugins.directory = plugin_dir.to_path_buf();
    config.spec.scheduler.autonomous = autonomous;
    config.spec.discovery.seed = Some(1234);
    config.spec.discovery.domains = vec!["5g_nr".to_string()];
    config
}

fn engine(plugin_dir: &Path, autonomous: bool) -> Arc<Engine> {
    Arc::new(Engine::from_config(config(plugin_dir, autonomous)).unwrap())
}

fn generator(plugin_dir: &Path) -> Option<Arc<dyn CodeGenerator>> {
    Some(Arc::new(TemplateCodeGenerator::new(plugin_dir)))
}

#[tokio::test]
async fn autonomous_cycle_deploys_and_loads_discovered_skills() {
    let dir = TempDir::new().unwrap();
    let engine = engine(dir.path(), true);
    let learning_loop = LearningLoop::new(engine.clone(), None, generator(dir.path()));
    let batch = SyntheticFeatureSource::new(40, 16, Some(7)).generate();

    let report = learning_loop.run_training_cycle(Some(batch)).await.unwrap();
    assert!(report.is_clean(), "errors: {:?}", report.errors);
    assert!(report.clusters_analyzed >= 2);
    assert!(!report.skills_registered.is_empty());
    assert!(report.deployed.len() >= report.skills_registered.len());

    for path in &report.deployed {
        assert!(path.starts_with(dir.path()));
        assert!(path.exists(), "missing artifact {}", path.display());
    }

    let stats = engine.loader().stats();
    assert_eq!(stats.active_plugins, report.deployed.len());
    assert_eq!(stats.capabilities, vec!["5g_nr".to_string()]);

    // Every loaded skill provides 5g_nr and adds to its confidence
    let expected = (report.deployed.len() as f64 * 0.1).min(1.0);
    let confidence = engine.capability_store().get(CapabilityDomain::NewRadio);
    assert!((confidence - expected).abs() < 1e-9, "confidence {}", confidence);

    let active = engine.discovery().active_skills();
    assert!(active.iter().all(|s| s.artifact_path.is_some()));
    assert_eq!(learning_loop.stats().plugins_deployed, report.deployed.len() as u64);
}

#[tokio::test]
async fn supervised_mode_registers_without_generating() {
    let dir = TempDir::new().unwrap();
    let engine = engine(dir.path(), false);
    let learning_loop = LearningLoop::new(engine.clone(), None, generator(dir.path()));
    let batch = SyntheticFeatureSource::new(40, 16, Some(7)).generate();

    let report = learning_loop.run_training_cycle(Some(batch)).await.unwrap();
    assert!(!report.skills_registered.is_empty());
    assert!(report.deployed.is_empty());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    assert_eq!(learning_loop.stats().skills_generated, 0);
}

#[tokio::test]
async fn loading_a_plugin_boosts_named_domains() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("rf_locator.yaml"),
        "name: rf-locator
runtime:
  type: builtin
  factory: pattern_skill
config:
  domain: rf_fingerprinting
  centroid: [0.1, 0.2]
  capabilities: [rf_fingerprinting, mesh_routing, beam_steering]
",
    )
    .unwrap();

    let engine = engine(dir.path(), true);
    let learning_loop = LearningLoop::new(engine.clone(), None, None);
    let report = learning_loop.run_training_cycle(None).await.unwrap();

    assert_eq!(report.plugins_total, 1);
    assert_eq!(report.plugins_loaded, 1);
    let store = engine.capability_store();
    assert!((store.get(CapabilityDomain::RfFingerprinting) - 0.1).abs() < 1e-9);
    assert!((store.get(CapabilityDomain::MeshRouting) - 0.1).abs() < 1e-9);
    assert_eq!(store.get(CapabilityDomain::Lte), 0.0);

    let boosts = store
        .recent_metrics(10)
        .into_iter()
        .filter(|m| m.context.get("source") == Some(&serde_json::json!("plugin_loaded")))
        .count();
    assert_eq!(boosts, 2);
}

#[tokio::test]
async fn threshold_crossings_wait_for_the_next_cycle() {
    let dir = TempDir::new().unwrap();
    let engine = engine(dir.path(), false);
    let learning_loop = LearningLoop::new(engine.clone(), None, None);

    engine
        .capability_store()
        .update(CapabilityDomain::Lte, 0.65, "field_test")
        .unwrap();
    assert_eq!(learning_loop.pending_crossings(), 1);

    let report = learning_loop.run_training_cycle(None).await.unwrap();
    assert_eq!(report.threshold_skills.len(), 1);
    assert!(report.threshold_skills[0].starts_with("Auto_4g_lte_threshold_"));
    assert_eq!(learning_loop.pending_crossings(), 0);

    let report = learning_loop.run_training_cycle(None).await.unwrap();
    assert!(report.threshold_skills.is_empty());
}

#[tokio::test]
async fn supervised_threshold_crossing_registers_a_skill() {
    let dir = TempDir::new().unwrap();
    let engine = engine(dir.path(), false);
    let learning_loop = LearningLoop::new(engine.clone(), None, generator(dir.path()));

    engine
        .capability_store()
        .update(CapabilityDomain::Lte, 0.8, "field_test")
        .unwrap();
    let report = learning_loop.run_training_cycle(None).await.unwrap();
    assert_eq!(report.threshold_skills.len(), 1);
    assert!(report.deployed.is_empty());

    let skills = engine.discovery().skills_by_domain("4g_lte");
    assert_eq!(skills.len(), 1);
    assert_eq!(skills[0].name, report.threshold_skills[0]);
    assert_eq!(skills[0].status, SkillStatus::Active);
    assert!(skills[0].artifact_path.is_none());
    assert_eq!(engine.discovery().pending_skills(), 0);
    assert_eq!(learning_loop.stats().skills_registered, 1);
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn threshold_skill_reuses_latest_domain_pattern() {
    let dir = TempDir::new().unwrap();
    // Few enough clusters that the first cycle stays below the threshold
    let mut config = config(dir.path(), true);
    config.spec.discovery.max_clusters = 3;
    let engine = Arc::new(Engine::from_config(config).unwrap());
    let learning_loop = LearningLoop::new(engine.clone(), None, generator(dir.path()));

    let batch = SyntheticFeatureSource::new(40, 16, Some(7)).generate();
    let first = learning_loop.run_training_cycle(Some(batch)).await.unwrap();
    assert!(first.threshold_skills.is_empty());
    let before = engine.loader().stats().active_plugins;

    // Drop below the threshold, then cross it again from outside a cycle
    let store = engine.capability_store();
    store.update(CapabilityDomain::NewRadio, 0.2, "test").unwrap();
    store.update(CapabilityDomain::NewRadio, 0.7, "test").unwrap();

    let report = learning_loop.run_training_cycle(None).await.unwrap();
    assert!(report.is_clean(), "errors: {:?}", report.errors);
    assert_eq!(report.threshold_skills.len(), 1);
    assert_eq!(report.deployed.len(), 1);
    assert_eq!(engine.loader().stats().active_plugins, before + 1);

    let threshold_skill = engine
        .discovery()
        .skills_by_domain("5g_nr")
        .into_iter()
        .find(|s| s.name == report.threshold_skills[0])
        .unwrap();
    assert!(threshold_skill.parent_skill.is_some());
    assert!(!threshold_skill.pattern_features.is_empty());
    assert_eq!(threshold_skill.artifact_path.as_ref(), report.deployed.first());
}

#[tokio::test]
async fn training_feeds_the_next_evaluation() {
    let dir = TempDir::new().unwrap();
    let engine = engine(dir.path(), true);
    let trainer: Arc<dyn ModelTrainer> = Arc::new(LinearTrainer::default());
    let learning_loop = LearningLoop::new(engine.clone(), Some(trainer), None);

    let batch = SyntheticFeatureSource::new(40, 16, Some(11)).generate();
    let first = learning_loop.run_training_cycle(Some(batch)).await.unwrap();
    let outcome = first.training.clone().unwrap();
    assert_eq!(
        engine.capability_store().get(CapabilityDomain::RfFingerprinting),
        outcome.accuracy
    );
    assert!(first.metacognition.evaluation.is_none());

    let second = learning_loop.run_training_cycle(None).await.unwrap();
    let evaluation = second.metacognition.evaluation.unwrap();
    assert_eq!(evaluation.metrics["rf_fingerprinting.accuracy"], outcome.accuracy);
    assert_eq!(evaluation.metrics["rf_fingerprinting.loss"], outcome.loss);
}

#[tokio::test]
async fn closed_engine_refuses_cycles() {
    let dir = TempDir::new().unwrap();
    let engine = engine(dir.path(), true);
    let learning_loop = LearningLoop::new(engine.clone(), None, None);

    engine.close().unwrap();
    assert!(matches!(
        learning_loop.run_training_cycle(None).await,
        Err(LearningLoopError::Closed)
    ));
}

#[tokio::test]
async fn runner_stops_at_cycle_limit() {
    let dir = TempDir::new().unwrap();
    let learning_loop = Arc::new(LearningLoop::new(engine(dir.path(), false), None, None));
    let source: Arc<dyn FeatureSource> = Arc::new(SyntheticFeatureSource::new(20, 8, Some(3)));
    let runner = LearningLoopRunner::new(
        learning_loop.clone(),
        Some(source),
        RunnerConfig {
            interval: Duration::from_millis(5),
            max_cycles: Some(3),
            error_backoff: Duration::from_millis(5),
        },
    );

    tokio::time::timeout(Duration::from_secs(30), runner.run())
        .await
        .unwrap();
    assert_eq!(runner.cycles_completed(), 3);
    assert_eq!(runner.cycles_failed(), 0);
    assert_eq!(learning_loop.stats().cycles_completed, 3);
}

#[tokio::test]
async fn runner_stops_when_source_is_exhausted() {
    let dir = TempDir::new().unwrap();
    let learning_loop = Arc::new(LearningLoop::new(engine(dir.path(), false), None, None));
    let source: Arc<dyn FeatureSource> =
        Arc::new(SyntheticFeatureSource::new(20, 8, Some(3)).with_max_batches(2));
    let runner = LearningLoopRunner::new(
        learning_loop,
        Some(source),
        RunnerConfig {
            interval: Duration::from_millis(5),
            max_cycles: None,
            error_backoff: Duration::from_millis(5),
        },
    );

    tokio::time::timeout(Duration::from_secs(30), runner.run())
        .await
        .unwrap();
    assert_eq!(runner.cycles_completed(), 2);
}

#[tokio::test]
async fn runner_honours_cancellation() {
    let dir = TempDir::new().unwrap();
    let learning_loop = Arc::new(LearningLoop::new(engine(dir.path(), false), None, None));
    let runner = Arc::new(LearningLoopRunner::new(
        learning_loop,
        None,
        RunnerConfig {
            interval: Duration::from_secs(3600),
            max_cycles: None,
            error_backoff: Duration::from_secs(3600),
        },
    ));
    let token = runner.shutdown_token();
    let handle = runner.clone().start();

    // The first tick is immediate; the second is an hour away
    for _ in 0..200 {
        if runner.cycles_completed() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    token.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(runner.cycles_completed(), 1);
}

#[tokio::test]
async fn deployed_skills_survive_a_loader_reload() {
    let dir = TempDir::new().unwrap();
    let engine = engine(dir.path(), true);
    let learning_loop = LearningLoop::new(engine.clone(), None, generator(dir.path()));
    let batch = SyntheticFeatureSource::new(40, 16, Some(7)).generate();
    let report = learning_loop.run_training_cycle(Some(batch)).await.unwrap();

    let loader = engine.loader();
    let plugin = loader.registry().active_plugins().remove(0);
    assert!(loader.reload(&plugin.id));
    let reloaded = loader.registry().get(&plugin.id).unwrap();
    assert_eq!(reloaded.status, PluginStatus::Active);
    assert_eq!(reloaded.load_count, 2);
    assert_eq!(loader.stats().active_plugins, report.deployed.len());
}
