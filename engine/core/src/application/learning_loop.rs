// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Learning Loop
//!
//! Drives the engine components through one training cycle and wires their
//! callbacks together.
//!
//! ## Callback wiring
//!
//! | Source | Reaction |
//! |--------|----------|
//! | plugin loaded | +0.1 confidence for every capability that names a domain (source `plugin_loaded`) |
//! | threshold crossed | queue the crossing; drained into a skill after discovery |
//! | adaptation | forward the strategy to the trainer |
//! | gap identified | log |
//!
//! Crossing handlers only enqueue. They run inside capability updates,
//! which may be nested in a plugin load or a scheduler cycle.
//!
//! ## Cycle
//!
//! 1. metacognitive cycle, fed with the previous cycle's training results
//! 2. discovery per configured domain: analyze → candidates → utility →
//!    register above the threshold → (autonomous) generate, validate, deploy, load
//! 3. training, when a trainer is attached and the batch has labels; the
//!    accuracy becomes `rf_fingerprinting` confidence
//! 4. queued threshold crossings become skill candidates (deployed in
//!    autonomous mode)
//! 5. `load_all` over the plugin directory
//! 6. flush
//!
//! Failures inside a step are recorded in the report and the cycle goes on.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Orchestrates scheduler, discovery, training and plugins

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use nightframe_cortex::{DiscoveredSkill, DiscoveryMethod, SkillStatus};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::application::capability_store::ThresholdCrossing;
use crate::application::engine::Engine;
use crate::application::scheduler::CycleError;
use crate::domain::capability::CapabilityDomain;
use crate::domain::collaborators::{CodeGenerator, FeatureBatch, ModelTrainer, TrainingOutcome};
use crate::domain::metacognition::{CycleReport, TrainingFeedback};

/// Confidence added per capability when a plugin providing it loads
pub const PLUGIN_LOAD_BOOST: f64 = 0.1;

/// Domain whose confidence tracks training accuracy
pub const TRAINING_DOMAIN: CapabilityDomain = CapabilityDomain::RfFingerprinting;

#[derive(Debug, thiserror::Error)]
pub enum LearningLoopError {
    #[error("Engine is closed")]
    Closed,

    #[error(transparent)]
    Cycle(#[from] CycleError),
}

/// Everything one training cycle did
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingCycleReport {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub metacognition: CycleReport,
    pub clusters_analyzed: usize,
    pub candidates_proposed: usize,
    pub skills_registered: Vec<String>,
    pub threshold_skills: Vec<String>,
    pub deployed: Vec<PathBuf>,
    pub training: Option<TrainingOutcome>,
    pub plugins_loaded: usize,
    pub plugins_total: usize,
    pub errors: Vec<String>,
}

impl TrainingCycleReport {
    fn new(cycle: u64, metacognition: CycleReport) -> Self {
        Self {
            cycle,
            started_at: Utc::now(),
            duration_seconds: 0.0,
            metacognition,
            clusters_analyzed: 0,
            candidates_proposed: 0,
            skills_registered: Vec::new(),
            threshold_skills: Vec::new(),
            deployed: Vec::new(),
            training: None,
            plugins_loaded: 0,
            plugins_total: 0,
            errors: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.metacognition.is_success()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopStats {
    pub cycles_completed: u64,
    pub skills_registered: u64,
    pub skills_generated: u64,
    pub plugins_deployed: u64,
}

pub struct LearningLoop {
    engine: Arc<Engine>,
    trainer: Option<Arc<dyn ModelTrainer>>,
    generator: Option<Arc<dyn CodeGenerator>>,
    autonomous: bool,
    utility_threshold: f64,
    domains: Vec<CapabilityDomain>,
    pending_crossings: Arc<Mutex<VecDeque<ThresholdCrossing>>>,
    feedback: Mutex<Vec<TrainingFeedback>>,
    cycles: AtomicU64,
    skills_registered: AtomicU64,
    skills_generated: AtomicU64,
    plugins_deployed: Arc<AtomicU64>,
}

impl LearningLoop {
    pub fn new(
        engine: Arc<Engine>,
        trainer: Option<Arc<dyn ModelTrainer>>,
        generator: Option<Arc<dyn CodeGenerator>>,
    ) -> Self {
        let config = &engine.config().spec;
        let autonomous = config.scheduler.autonomous;
        let utility_threshold = config.discovery.utility_threshold;
        let domains = config.discovery.parsed_domains();

        let learning_loop = Self {
            engine,
            trainer,
            generator,
            autonomous,
            utility_threshold,
            domains,
            pending_crossings: Arc::new(Mutex::new(VecDeque::new())),
            feedback: Mutex::new(Vec::new()),
            cycles: AtomicU64::new(0),
            skills_registered: AtomicU64::new(0),
            skills_generated: AtomicU64::new(0),
            plugins_deployed: Arc::new(AtomicU64::new(0)),
        };
        learning_loop.wire_callbacks();

        info!(
            autonomous,
            trainer = learning_loop.trainer.is_some(),
            generator = learning_loop.generator.is_some(),
            domains = learning_loop.domains.len(),
            "Learning loop initialized"
        );
        learning_loop
    }

    fn wire_callbacks(&self) {
        let store = self.engine.capability_store().clone();
        let deployed = self.plugins_deployed.clone();
        self.engine.loader().on_plugin_loaded(move |info| {
            deployed.fetch_add(1, Ordering::Relaxed);
            for capability in &info.capabilities {
                let Ok(domain) = capability.parse::<CapabilityDomain>() else {
                    debug!(plugin_id = %info.id, capability = %capability, "Capability names no domain");
                    continue;
                };
                let boosted = (store.get(domain) + PLUGIN_LOAD_BOOST).min(1.0);
                store.update(domain, boosted, "plugin_loaded")?;
            }
            Ok(())
        });

        let pending = self.pending_crossings.clone();
        self.engine.scheduler().on_skill_discovered(move |crossing| {
            pending.lock().push_back(crossing.clone());
            Ok(())
        });

        self.engine.scheduler().on_gap_identified(|gap| {
            info!(domain = %gap.domain, severity = gap.severity, "Learning gap identified");
            Ok(())
        });

        if let Some(trainer) = self.trainer.clone() {
            let autonomous = self.autonomous;
            self.engine.scheduler().on_adaptation(move |strategy| {
                if autonomous {
                    trainer.apply_strategy(strategy)?;
                }
                Ok(())
            });
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn is_autonomous(&self) -> bool {
        self.autonomous
    }

    pub fn stats(&self) -> LoopStats {
        LoopStats {
            cycles_completed: self.cycles.load(Ordering::Relaxed),
            skills_registered: self.skills_registered.load(Ordering::Relaxed),
            skills_generated: self.skills_generated.load(Ordering::Relaxed),
            plugins_deployed: self.plugins_deployed.load(Ordering::Relaxed),
        }
    }

    /// Threshold crossings waiting for the next cycle
    pub fn pending_crossings(&self) -> usize {
        self.pending_crossings.lock().len()
    }

    pub async fn run_training_cycle(
        &self,
        batch: Option<FeatureBatch>,
    ) -> Result<TrainingCycleReport, LearningLoopError> {
        if self.engine.is_closed() {
            return Err(LearningLoopError::Closed);
        }
        let cycle = self.cycles.fetch_add(1, Ordering::AcqRel) + 1;
        let started = Utc::now();
        info!(cycle, "Training cycle starting");

        let feedback = std::mem::take(&mut *self.feedback.lock());
        let feedback = (!feedback.is_empty()).then_some(feedback);
        let metacognition = self.engine.scheduler().run_cycle(feedback.as_deref())?;

        let mut report = TrainingCycleReport::new(cycle, metacognition);
        report.started_at = started;
        if let Some(e) = &report.metacognition.error {
            report.errors.push(format!("metacognition: {}", e));
        }

        if let Some(batch) = &batch {
            self.discover(batch, &mut report).await;
            self.train(batch, &mut report).await;
        }
        self.drain_crossings(&mut report).await;

        let loaded = self.engine.loader().load_all();
        report.plugins_total = loaded.len();
        report.plugins_loaded = loaded.values().filter(|ok| **ok).count();

        if let Err(e) = self.engine.flush() {
            warn!(cycle, error = %e, "State flush failed; keeping in-memory state");
            report.errors.push(format!("flush: {}", e));
        }

        report.duration_seconds = (Utc::now() - started).num_milliseconds() as f64 / 1000.0;
        let stats = self.stats();
        info!(
            cycle,
            duration_seconds = report.duration_seconds,
            skills_generated = stats.skills_generated,
            plugins_deployed = stats.plugins_deployed,
            errors = report.errors.len(),
            "Training cycle complete"
        );
        Ok(report)
    }

    async fn discover(&self, batch: &FeatureBatch, report: &mut TrainingCycleReport) {
        let discovery = self.engine.discovery();
        for domain in &self.domains {
            let clusters =
                match discovery.analyze_patterns(&batch.features, domain.as_str(), batch.labels.as_deref()) {
                    Ok(clusters) => clusters,
                    Err(e) => {
                        warn!(domain = %domain, error = %e, "Pattern analysis failed");
                        report.errors.push(format!("discovery {}: {}", domain, e));
                        continue;
                    }
                };
            report.clusters_analyzed += clusters.len();

            let candidates = discovery.identify_skill_candidates(Some(&clusters));
            report.candidates_proposed += candidates.len();

            for mut skill in candidates {
                skill.utility_score = discovery.evaluate_utility(&skill);
                if skill.utility_score <= self.utility_threshold {
                    debug!(skill = %skill.name, utility = skill.utility_score, "Candidate below utility threshold");
                    continue;
                }
                let registered = match discovery.register_skill(&skill) {
                    Ok(registered) => registered,
                    Err(e) => {
                        report.errors.push(format!("register {}: {}", skill.name, e));
                        continue;
                    }
                };
                self.skills_registered.fetch_add(1, Ordering::Relaxed);
                report.skills_registered.push(registered.name.clone());

                if !self.autonomous {
                    continue;
                }
                if let Some(path) = self.deploy(&registered, report).await {
                    if let Err(e) = discovery.set_artifact_path(registered.id, path) {
                        warn!(skill = %registered.name, error = %e, "Failed to record artifact path");
                    }
                }
            }
        }
    }

    async fn train(&self, batch: &FeatureBatch, report: &mut TrainingCycleReport) {
        let (Some(trainer), Some(labels)) = (&self.trainer, &batch.labels) else {
            return;
        };

        match trainer.train(TRAINING_DOMAIN, &batch.features, labels).await {
            Ok(outcome) => {
                if let Err(e) = self
                    .engine
                    .capability_store()
                    .update(TRAINING_DOMAIN, outcome.accuracy, "training")
                {
                    report.errors.push(format!("training: {}", e));
                }
                let mut feedback = self.feedback.lock();
                feedback.push(TrainingFeedback::new(Some(TRAINING_DOMAIN), "accuracy", outcome.accuracy));
                feedback.push(TrainingFeedback::new(Some(TRAINING_DOMAIN), "loss", outcome.loss));
                report.training = Some(outcome);
            }
            Err(e) => {
                error!(domain = %TRAINING_DOMAIN, error = %e, "Training failed");
                report.errors.push(format!("training: {}", e));
            }
        }
    }

    /// Register a skill for every queued threshold crossing. In autonomous
    /// mode a skill with known pattern features is also deployed.
    async fn drain_crossings(&self, report: &mut TrainingCycleReport) {
        let crossings: Vec<ThresholdCrossing> = self.pending_crossings.lock().drain(..).collect();
        let discovery = self.engine.discovery();
        for crossing in crossings {
            let skill = self.threshold_skill(&crossing);
            let registered = match discovery.register_skill(&skill) {
                Ok(registered) => registered,
                Err(e) => {
                    report.errors.push(format!("register {}: {}", skill.name, e));
                    continue;
                }
            };
            self.skills_registered.fetch_add(1, Ordering::Relaxed);
            info!(domain = %crossing.domain, skill = %registered.name, "Skill registered from capability threshold");
            report.threshold_skills.push(registered.name.clone());

            if !self.autonomous {
                continue;
            }
            if registered.pattern_features.is_empty() {
                debug!(domain = %crossing.domain, "No pattern known for domain; nothing to generate");
                continue;
            }
            if let Some(path) = self.deploy(&registered, report).await {
                if let Err(e) = discovery.set_artifact_path(registered.id, path) {
                    warn!(skill = %registered.name, error = %e, "Failed to record artifact path");
                }
            }
        }
    }

    /// Candidate for a domain that crossed the threshold, reusing the
    /// centroid of the domain's most recent discovered skill.
    fn threshold_skill(&self, crossing: &ThresholdCrossing) -> DiscoveredSkill {
        let domain = crossing.domain.as_str();
        let latest = self
            .engine
            .discovery()
            .skills_by_domain(domain)
            .into_iter()
            .filter(|s| s.status != SkillStatus::Failed && !s.pattern_features.is_empty())
            .max_by_key(|s| s.discovered_at);

        let mut skill = DiscoveredSkill::new(
            format!("Auto_{}_threshold_{}", domain, crossing.crossed_at.format("%Y%m%d%H%M%S")),
            format!("Skill for {} after confidence reached {:.2}", domain, crossing.confidence),
            domain,
            DiscoveryMethod::CapabilityThreshold,
        );
        skill.utility_score = crossing.confidence;
        skill.confidence = crossing.confidence;
        if let Some(parent) = latest {
            skill.pattern_features = parent.pattern_features.clone();
            skill.pattern_signature = None;
            skill.parent_skill = Some(parent.id);
        }
        skill
    }

    /// generate → validate → deploy → load. Returns the deployed path;
    /// failures are recorded in the report.
    async fn deploy(&self, skill: &DiscoveredSkill, report: &mut TrainingCycleReport) -> Option<PathBuf> {
        let generator = self.generator.as_ref()?;

        let artifact = match generator.generate(skill).await {
            Ok(artifact) => artifact,
            Err(e) => {
                error!(skill = %skill.name, error = %e, "Skill generation failed");
                report.errors.push(format!("generate {}: {}", skill.name, e));
                return None;
            }
        };

        match generator.validate(&artifact).await {
            Ok(problems) if problems.is_empty() => {}
            Ok(problems) => {
                warn!(skill = %skill.name, problems = ?problems, "Generated skill failed validation");
                report.errors.push(format!("validate {}: {}", skill.name, problems.join("; ")));
                return None;
            }
            Err(e) => {
                report.errors.push(format!("validate {}: {}", skill.name, e));
                return None;
            }
        }

        let path = match generator.deploy(&artifact).await {
            Ok(path) => path,
            Err(e) => {
                warn!(skill = %skill.name, error = %e, "Deployment failed");
                report.errors.push(format!("deploy {}: {}", skill.name, e));
                return None;
            }
        };
        self.skills_generated.fetch_add(1, Ordering::Relaxed);
        info!(skill = %skill.name, path = %path.display(), "Skill deployed");

        if let Err(e) = self.engine.loader().load(&path) {
            report.errors.push(format!("load {}: {}", skill.name, e));
        }
        report.deployed.push(path.clone());
        Some(path)
    }
}
