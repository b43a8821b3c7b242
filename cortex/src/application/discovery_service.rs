// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # SkillDiscoveryEngine: Pattern Analysis & Skill Proposal
//!
//! Application service for the discovery half of the adaptation loop:
//! a batch of feature vectors for one capability domain is normalized and
//! clustered, each cluster gets a [`PatternSignature`], and clusters whose
//! signature has never been seen become [`DiscoveredSkill`] candidates.
//!
//! ## Novelty
//!
//! The engine keeps a set of known signatures, seeded at construction from
//! every stored skill that is not deprecated. A signature joins the set the
//! moment a candidate is proposed for it, so the same pattern is proposed
//! at most once per process lifetime even if the candidate is never
//! registered.
//!
//! ## Utility
//!
//! Candidates carry an initial score from cluster shape (size, coherence,
//! novelty). [`SkillDiscoveryEngine::evaluate_utility`] re-scores a skill
//! from its domain priority and the spread of its features; the learning
//! loop registers skills above a configurable threshold.
//!
//! ## Persistence
//!
//! Memory is authoritative. Status changes land in memory first and are
//! then saved; a skill whose save fails stays pending until
//! [`SkillDiscoveryEngine::flush`] writes it.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Implements the discovery pipeline over a `SkillRepository`

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::domain::clustering::{self, KMeansResult};
use crate::domain::{
    ClusterId, DiscoveredSkill, DiscoveryError, DiscoveryEvent, DiscoveryMethod, PatternCluster,
    PatternSignature, SkillId, SkillRepository, SkillStatus,
};

/// Receives discovery events; implemented by the engine's event bus.
pub trait DiscoveryPublisher: Send + Sync {
    fn publish(&self, event: DiscoveryEvent);
}

/// Tuning for the discovery pipeline
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Batches smaller than this are not clustered
    pub min_samples: usize,

    /// Upper bound on k; the effective k is `min(max_clusters, samples / 2)`
    pub max_clusters: usize,

    /// k-means iteration cap
    pub max_iterations: usize,

    /// Seed for centroid initialization; `None` draws from the OS
    pub seed: Option<u64>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            min_samples: 10,
            max_clusters: 5,
            max_iterations: 20,
            seed: None,
        }
    }
}

/// Utility bonus per capability domain, 0.05 for anything not listed.
pub fn domain_priority_bonus(domain: &str) -> f64 {
    match domain {
        "4g_lte" | "5g_nr" | "internet_provision" => 0.2,
        "network_handover" | "wifi_ap" => 0.15,
        "rf_fingerprinting" => 0.1,
        _ => 0.05,
    }
}

struct DiscoveryState {
    known_patterns: HashSet<PatternSignature>,
    skills: HashMap<SkillId, DiscoveredSkill>,
    clusters: HashMap<ClusterId, PatternCluster>,
    unsaved: HashSet<SkillId>,
    rng: StdRng,
}

pub struct SkillDiscoveryEngine {
    repository: Arc<dyn SkillRepository>,
    publisher: Option<Arc<dyn DiscoveryPublisher>>,
    config: DiscoveryConfig,
    state: Mutex<DiscoveryState>,
}

impl SkillDiscoveryEngine {
    /// Build the engine and load stored skills. Deprecated skills are neither
    /// loaded nor counted as known patterns. An unreadable repository
    /// starts the engine empty.
    pub fn new(repository: Arc<dyn SkillRepository>, config: DiscoveryConfig) -> Self {
        let mut skills = HashMap::new();
        let mut known_patterns = HashSet::new();

        let stored = repository.list_skills().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load stored skills, starting empty");
            Vec::new()
        });
        for skill in stored {
            if skill.status == SkillStatus::Deprecated {
                continue;
            }
            if let Some(signature) = &skill.pattern_signature {
                known_patterns.insert(signature.clone());
            }
            skills.insert(skill.id, skill);
        }

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        info!(
            skills = skills.len(),
            known_patterns = known_patterns.len(),
            "Skill discovery engine initialized"
        );

        Self {
            repository,
            publisher: None,
            config,
            state: Mutex::new(DiscoveryState {
                known_patterns,
                skills,
                clusters: HashMap::new(),
                unsaved: HashSet::new(),
                rng,
            }),
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn DiscoveryPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Cluster a feature batch for one domain.
    ///
    /// Batches below `min_samples` yield no clusters. Malformed input (ragged
    /// rows, non-finite values, label count mismatch) is rejected.
    pub fn analyze_patterns(
        &self,
        features: &[Vec<f64>],
        domain: &str,
        labels: Option<&[f64]>,
    ) -> Result<Vec<PatternCluster>, DiscoveryError> {
        clustering::validate_matrix(features)?;
        if let Some(labels) = labels {
            if labels.len() != features.len() {
                return Err(DiscoveryError::LabelMismatch {
                    samples: features.len(),
                    labels: labels.len(),
                });
            }
        }

        if features.len() < self.config.min_samples {
            warn!(
                domain,
                samples = features.len(),
                min_samples = self.config.min_samples,
                "Insufficient data for pattern analysis"
            );
            return Ok(Vec::new());
        }

        let k = self.config.max_clusters.min(features.len() / 2);
        if k < 2 {
            return Ok(Vec::new());
        }

        let normalized = clustering::normalize(features);

        let mut state = self.state.lock();
        let result = clustering::kmeans(&normalized, k, self.config.max_iterations, &mut state.rng);
        debug!(
            domain,
            k,
            iterations = result.iterations,
            converged = result.converged,
            "k-means finished"
        );

        let mut clusters = build_clusters(&normalized, &result, domain, labels);
        state.clusters.retain(|_, c| c.domain != domain);
        for cluster in clusters.iter_mut() {
            cluster.is_novel = !state.known_patterns.contains(&cluster.signature);
            state.clusters.insert(cluster.id, cluster.clone());
        }
        drop(state);

        for cluster in &clusters {
            if let Err(e) = self.repository.save_cluster(cluster) {
                warn!(cluster_id = %cluster.id, "Failed to persist pattern cluster: {}", e);
            }
        }

        let novel = clusters.iter().filter(|c| c.is_novel).count();
        info!(domain, clusters = clusters.len(), novel, "Pattern analysis complete");
        self.publish(DiscoveryEvent::PatternsAnalyzed {
            domain: domain.to_string(),
            clusters: clusters.len(),
            novel,
            analyzed_at: Utc::now(),
        });

        Ok(clusters)
    }

    /// Propose one candidate per novel cluster whose signature is still unknown.
    ///
    /// With `None`, every novel cluster retained from earlier analyses is
    /// considered.
    pub fn identify_skill_candidates(
        &self,
        clusters: Option<&[PatternCluster]>,
    ) -> Vec<DiscoveredSkill> {
        let mut state = self.state.lock();
        let pool: Vec<PatternCluster> = match clusters {
            Some(clusters) => clusters.to_vec(),
            None => state.clusters.values().filter(|c| c.is_novel).cloned().collect(),
        };

        let mut candidates = Vec::new();
        for cluster in pool {
            if !cluster.is_novel || state.known_patterns.contains(&cluster.signature) {
                continue;
            }

            let mut skill = DiscoveredSkill::new(
                format!("Auto_{}_{}", cluster.domain, state.skills.len()),
                format!("Automatically discovered skill for {}", cluster.domain),
                cluster.domain.clone(),
                DiscoveryMethod::PatternClustering,
            )
            .with_features(&cluster.centroid);
            skill.pattern_signature = Some(cluster.signature.clone());
            skill.source_data = Some(format!("cluster:{}", cluster.id));
            skill.utility_score = estimate_cluster_utility(&cluster);

            state.known_patterns.insert(cluster.signature.clone());
            state.skills.insert(skill.id, skill.clone());
            candidates.push(skill);
        }
        drop(state);

        for skill in &candidates {
            metrics::counter!("nightframe_skill_candidates_total").increment(1);
            self.publish(DiscoveryEvent::CandidateProposed {
                skill_id: skill.id,
                name: skill.name.clone(),
                domain: skill.domain.clone(),
                utility_score: skill.utility_score,
            });
        }

        info!(candidates = candidates.len(), "Generated skill candidates");
        candidates
    }

    /// Score a skill in [0, 1] from its domain priority and feature spread.
    pub fn evaluate_utility(&self, skill: &DiscoveredSkill) -> f64 {
        let mut score = 0.5 + domain_priority_bonus(&skill.domain);
        if !skill.pattern_features.is_empty() {
            score += skill.feature_variance().min(0.2);
        }
        score.clamp(0.0, 1.0)
    }

    /// Mark a skill active and persist it. Candidates are promoted directly;
    /// skills under validation are promoted as well.
    pub fn register_skill(&self, skill: &DiscoveredSkill) -> Result<DiscoveredSkill, DiscoveryError> {
        let mut registered = skill.clone();
        if let Some(stored) = self.skill(skill.id) {
            registered.status = stored.status;
        }
        self.change_status(&mut registered, SkillStatus::Active)?;
        metrics::counter!("nightframe_skills_registered_total").increment(1);
        info!(skill = %registered.name, domain = %registered.domain, "Registered skill");
        Ok(registered)
    }

    /// Move a stored skill into validation.
    pub fn begin_validation(&self, id: SkillId) -> Result<DiscoveredSkill, DiscoveryError> {
        let mut skill = self.skill(id).ok_or(DiscoveryError::SkillNotFound(id))?;
        self.change_status(&mut skill, SkillStatus::Testing)?;
        Ok(skill)
    }

    /// Record one validation outcome. A skill under validation is failed when
    /// the run did not pass and it has never passed.
    pub fn record_validation(&self, id: SkillId, passed: bool) -> Result<DiscoveredSkill, DiscoveryError> {
        let mut skill = self.skill(id).ok_or(DiscoveryError::SkillNotFound(id))?;
        skill.record_validation(passed);
        if skill.status == SkillStatus::Testing && skill.success_count == 0 {
            self.change_status(&mut skill, SkillStatus::Failed)?;
        } else {
            self.store(&skill);
        }
        Ok(skill)
    }

    pub fn deprecate_skill(&self, id: SkillId) -> Result<DiscoveredSkill, DiscoveryError> {
        let mut skill = self.skill(id).ok_or(DiscoveryError::SkillNotFound(id))?;
        self.change_status(&mut skill, SkillStatus::Deprecated)?;
        Ok(skill)
    }

    /// Attach the deployed artifact location to a skill.
    pub fn set_artifact_path(
        &self,
        id: SkillId,
        path: std::path::PathBuf,
    ) -> Result<DiscoveredSkill, DiscoveryError> {
        let mut skill = self.skill(id).ok_or(DiscoveryError::SkillNotFound(id))?;
        skill.artifact_path = Some(path);
        self.store(&skill);
        Ok(skill)
    }

    pub fn skill(&self, id: SkillId) -> Option<DiscoveredSkill> {
        self.state.lock().skills.get(&id).cloned()
    }

    pub fn skills_by_domain(&self, domain: &str) -> Vec<DiscoveredSkill> {
        self.filtered(|s| s.domain == domain)
    }

    pub fn active_skills(&self) -> Vec<DiscoveredSkill> {
        self.filtered(|s| s.status == SkillStatus::Active)
    }

    pub fn candidate_skills(&self) -> Vec<DiscoveredSkill> {
        self.filtered(|s| s.status == SkillStatus::Candidate)
    }

    pub fn known_pattern_count(&self) -> usize {
        self.state.lock().known_patterns.len()
    }

    /// Skills changed in memory whose latest state is not yet saved
    pub fn pending_skills(&self) -> usize {
        self.state.lock().unsaved.len()
    }

    /// Save every pending skill. Skills that fail again stay pending and the
    /// last error is returned.
    pub fn flush(&self) -> Result<(), DiscoveryError> {
        let pending: Vec<DiscoveredSkill> = {
            let mut state = self.state.lock();
            let ids: Vec<SkillId> = state.unsaved.drain().collect();
            let skills: Vec<DiscoveredSkill> =
                ids.iter().filter_map(|id| state.skills.get(id).cloned()).collect();
            skills
        };

        let mut last_error = None;
        for skill in &pending {
            if let Err(e) = self.repository.save_skill(skill) {
                metrics::counter!("nightframe_persistence_failures_total", "operation" => "save_skill")
                    .increment(1);
                self.state.lock().unsaved.insert(skill.id);
                last_error = Some(e);
            }
        }

        match last_error {
            Some(e) => {
                warn!(pending = self.pending_skills(), error = %e, "Skill flush failed, will retry");
                Err(e.into())
            }
            None => {
                debug!(skills = pending.len(), "Skill discovery flushed");
                Ok(())
            }
        }
    }

    fn filtered(&self, predicate: impl Fn(&DiscoveredSkill) -> bool) -> Vec<DiscoveredSkill> {
        let state = self.state.lock();
        let mut skills: Vec<DiscoveredSkill> =
            state.skills.values().filter(|s| predicate(s)).cloned().collect();
        skills.sort_by(|a, b| a.discovered_at.cmp(&b.discovered_at));
        skills
    }

    fn change_status(&self, skill: &mut DiscoveredSkill, next: SkillStatus) -> Result<(), DiscoveryError> {
        let from = skill.status;
        skill.transition_to(next)?;
        self.store(skill);
        if from != next {
            self.publish(DiscoveryEvent::SkillStatusChanged {
                skill_id: skill.id,
                name: skill.name.clone(),
                from,
                to: next,
                changed_at: Utc::now(),
            });
        }
        Ok(())
    }

    fn store(&self, skill: &DiscoveredSkill) {
        {
            let mut state = self.state.lock();
            if let Some(signature) = &skill.pattern_signature {
                state.known_patterns.insert(signature.clone());
            }
            state.skills.insert(skill.id, skill.clone());
        }

        if let Err(e) = self.repository.save_skill(skill) {
            metrics::counter!("nightframe_persistence_failures_total", "operation" => "save_skill")
                .increment(1);
            warn!(skill_id = %skill.id, error = %e, "Failed to persist skill, keeping it pending");
            self.state.lock().unsaved.insert(skill.id);
        }
    }

    fn publish(&self, event: DiscoveryEvent) {
        if let Some(publisher) = &self.publisher {
            publisher.publish(event);
        }
    }
}

/// Initial candidate score: larger and tighter clusters score higher, novel
/// ones get a flat bonus.
fn estimate_cluster_utility(cluster: &PatternCluster) -> f64 {
    let size_score = (cluster.size as f64 / 100.0).min(1.0);
    let variance_score = (1.0 - cluster.variance).max(0.0);
    let novelty_bonus = if cluster.is_novel { 0.2 } else { 0.0 };
    size_score * 0.4 + variance_score * 0.4 + novelty_bonus
}

fn build_clusters(
    data: &[Vec<f64>],
    result: &KMeansResult,
    domain: &str,
    labels: Option<&[f64]>,
) -> Vec<PatternCluster> {
    result
        .centroids
        .iter()
        .enumerate()
        .filter_map(|(k, centroid)| {
            let members = result.members(k);
            if members.is_empty() {
                return None;
            }
            let variance = clustering::cluster_variance(data, &members);
            let label_mean = labels.map(|labels| {
                members.iter().map(|&i| labels[i]).sum::<f64>() / members.len() as f64
            });
            let mut cluster = PatternCluster::new(domain, centroid.clone(), members, variance);
            cluster.label_mean = label_mean;
            Some(cluster)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::InMemorySkillRepository;

    fn engine() -> SkillDiscoveryEngine {
        let config = DiscoveryConfig {
            seed: Some(42),
            ..Default::default()
        };
        SkillDiscoveryEngine::new(Arc::new(InMemorySkillRepository::new()), config)
    }

    fn blobs(per_blob: usize) -> Vec<Vec<f64>> {
        let mut rows = Vec::new();
        for i in 0..per_blob {
            let j = i as f64 * 0.01;
            rows.push(vec![j, 1.0 - j, 0.5]);
            rows.push(vec![5.0 + j, -3.0 - j, 0.5]);
        }
        rows
    }

    #[test]
    fn test_small_batch_yields_no_clusters() {
        let engine = engine();
        let clusters = engine.analyze_patterns(&blobs(4), "4g_lte", None).unwrap();
        assert!(clusters.is_empty());
    }

    #[test]
    fn test_label_mismatch_is_rejected() {
        let engine = engine();
        let err = engine
            .analyze_patterns(&blobs(10), "4g_lte", Some(&[1.0, 2.0]))
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::LabelMismatch { samples: 20, labels: 2 }));
    }

    #[test]
    fn test_first_analysis_is_novel_and_sizes_add_up() {
        let engine = engine();
        let clusters = engine.analyze_patterns(&blobs(10), "5g_nr", None).unwrap();
        assert!(!clusters.is_empty() && clusters.len() <= 5);
        assert!(clusters.iter().all(|c| c.is_novel && c.size >= 1));
        assert_eq!(clusters.iter().map(|c| c.size).sum::<usize>(), 20);
    }

    #[test]
    fn test_candidates_are_proposed_once_per_signature() {
        let engine = engine();
        let clusters = engine.analyze_patterns(&blobs(10), "wifi_ap", None).unwrap();

        let distinct: HashSet<_> = clusters.iter().map(|c| c.signature.clone()).collect();

        let first = engine.identify_skill_candidates(Some(&clusters));
        assert_eq!(first.len(), distinct.len());
        assert!(first.iter().all(|s| s.status == SkillStatus::Candidate));
        assert!(first[0].name.starts_with("Auto_wifi_ap_"));

        let second = engine.identify_skill_candidates(Some(&clusters));
        assert!(second.is_empty());
        assert_eq!(engine.candidate_skills().len(), first.len());
    }

    #[test]
    fn test_evaluate_utility_uses_domain_bonus() {
        let engine = engine();
        let skill = DiscoveredSkill::new("s", "d", "4g_lte", DiscoveryMethod::Manual).with_features(&[1.0, 1.0]);
        assert!((engine.evaluate_utility(&skill) - 0.7).abs() < 1e-12);

        let other = DiscoveredSkill::new("s", "d", "swarm_coordination", DiscoveryMethod::Manual)
            .with_features(&[0.0, 10.0]);
        // variance 25 is capped at 0.2
        assert!((engine.evaluate_utility(&other) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_register_and_deprecate() {
        let engine = engine();
        let clusters = engine.analyze_patterns(&blobs(10), "5g_nr", None).unwrap();
        let candidate = engine.identify_skill_candidates(Some(&clusters)).remove(0);

        let active = engine.register_skill(&candidate).unwrap();
        assert_eq!(active.status, SkillStatus::Active);
        assert_eq!(engine.active_skills().len(), 1);

        engine.deprecate_skill(active.id).unwrap();
        assert!(engine.register_skill(&engine.skill(active.id).unwrap()).is_err());
    }

    #[test]
    fn test_failed_validation_marks_skill_failed() {
        let engine = engine();
        let clusters = engine.analyze_patterns(&blobs(10), "5g_nr", None).unwrap();
        let candidate = engine.identify_skill_candidates(Some(&clusters)).remove(0);

        engine.begin_validation(candidate.id).unwrap();
        let skill = engine.record_validation(candidate.id, false).unwrap();
        assert_eq!(skill.status, SkillStatus::Failed);
        assert_eq!(skill.validation_count, 1);
    }
}
