// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nightframe_cortex::{
    DiscoveredSkill, DiscoveryConfig, InMemorySkillRepository, PatternCluster, RepositoryError,
    SkillDiscoveryEngine, SkillId, SkillRepository, SkillStatus,
};

/// Wraps the in-memory repository with switchable write and read failures.
#[derive(Default)]
struct FlakyRepository {
    inner: InMemorySkillRepository,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl FlakyRepository {
    fn check(flag: &AtomicBool) -> Result<(), RepositoryError> {
        if flag.load(Ordering::SeqCst) {
            Err(RepositoryError::Database("disk full".into()))
        } else {
            Ok(())
        }
    }
}

impl SkillRepository for FlakyRepository {
    fn save_skill(&self, skill: &DiscoveredSkill) -> Result<(), RepositoryError> {
        Self::check(&self.fail_writes)?;
        self.inner.save_skill(skill)
    }

    fn find_skill(&self, id: SkillId) -> Result<Option<DiscoveredSkill>, RepositoryError> {
        Self::check(&self.fail_reads)?;
        self.inner.find_skill(id)
    }

    fn list_skills(&self) -> Result<Vec<DiscoveredSkill>, RepositoryError> {
        Self::check(&self.fail_reads)?;
        self.inner.list_skills()
    }

    fn save_cluster(&self, cluster: &PatternCluster) -> Result<(), RepositoryError> {
        Self::check(&self.fail_writes)?;
        self.inner.save_cluster(cluster)
    }

    fn list_clusters(&self, domain: Option<&str>) -> Result<Vec<PatternCluster>, RepositoryError> {
        Self::check(&self.fail_reads)?;
        self.inner.list_clusters(domain)
    }
}

fn batch() -> Vec<Vec<f64>> {
    (0..40)
        .map(|i| {
            let group = (i % 4) as f64;
            let jitter = (i / 4) as f64 * 0.05;
            vec![group * 3.0 + jitter, -group * 2.0 + jitter, group]
        })
        .collect()
}

fn config() -> DiscoveryConfig {
    DiscoveryConfig {
        seed: Some(1234),
        ..Default::default()
    }
}

#[test]
fn registered_signatures_survive_restart() {
    let repo = Arc::new(InMemorySkillRepository::new());

    let first = SkillDiscoveryEngine::new(repo.clone(), config());
    let clusters = first.analyze_patterns(&batch(), "4g_lte", None).unwrap();
    assert!(!clusters.is_empty());

    let candidates = first.identify_skill_candidates(None);
    assert!(!candidates.is_empty());
    for candidate in &candidates {
        first.register_skill(candidate).unwrap();
    }
    assert_eq!(repo.list_clusters(Some("4g_lte")).unwrap().len(), clusters.len());

    // Same seed and data reproduce the same clusters, now known
    let second = SkillDiscoveryEngine::new(repo.clone(), config());
    assert_eq!(second.active_skills().len(), candidates.len());
    let again = second.analyze_patterns(&batch(), "4g_lte", None).unwrap();
    assert!(again.iter().all(|c| !c.is_novel));
    assert!(second.identify_skill_candidates(Some(&again)).is_empty());
}

#[test]
fn deprecated_skills_are_not_reloaded() {
    let repo = Arc::new(InMemorySkillRepository::new());
    let engine = SkillDiscoveryEngine::new(repo.clone(), config());
    let clusters = engine.analyze_patterns(&batch(), "5g_nr", None).unwrap();
    let candidate = engine.identify_skill_candidates(Some(&clusters)).remove(0);

    let active = engine.register_skill(&candidate).unwrap();
    engine.deprecate_skill(active.id).unwrap();

    let stored = repo.find_skill(active.id).unwrap().unwrap();
    assert_eq!(stored.status, SkillStatus::Deprecated);

    let reloaded = SkillDiscoveryEngine::new(repo, config());
    assert!(reloaded.skill(active.id).is_none());
    assert_eq!(reloaded.known_pattern_count(), 0);
}

#[test]
fn labels_attach_member_means() {
    let repo = Arc::new(InMemorySkillRepository::new());
    let engine = SkillDiscoveryEngine::new(repo, config());
    let labels: Vec<f64> = (0..40).map(|i| (i % 4) as f64).collect();

    let clusters = engine.analyze_patterns(&batch(), "wifi_ap", Some(&labels)).unwrap();
    assert!(clusters.iter().all(|c| c.label_mean.is_some()));
}

#[test]
fn registration_survives_a_failed_save_and_flush_retries_it() {
    let repo = Arc::new(FlakyRepository::default());
    let engine = SkillDiscoveryEngine::new(repo.clone(), config());
    let clusters = engine.analyze_patterns(&batch(), "4g_lte", None).unwrap();
    let candidate = engine.identify_skill_candidates(Some(&clusters)).remove(0);

    repo.fail_writes.store(true, Ordering::SeqCst);
    let registered = engine.register_skill(&candidate).unwrap();
    assert_eq!(registered.status, SkillStatus::Active);
    assert_eq!(engine.skill(candidate.id).unwrap().status, SkillStatus::Active);
    assert_eq!(engine.active_skills().len(), 1);
    assert_eq!(engine.pending_skills(), 1);
    assert!(repo.inner.find_skill(candidate.id).unwrap().is_none());

    // Still failing: the skill stays pending
    assert!(engine.flush().is_err());
    assert_eq!(engine.pending_skills(), 1);

    repo.fail_writes.store(false, Ordering::SeqCst);
    engine.flush().unwrap();
    assert_eq!(engine.pending_skills(), 0);
    let stored = repo.inner.find_skill(candidate.id).unwrap().unwrap();
    assert_eq!(stored.status, SkillStatus::Active);
}

#[test]
fn unreadable_repository_starts_empty() {
    let repo = Arc::new(FlakyRepository::default());
    repo.fail_reads.store(true, Ordering::SeqCst);

    let engine = SkillDiscoveryEngine::new(repo, config());
    assert!(engine.active_skills().is_empty());
    assert_eq!(engine.known_pattern_count(), 0);

    // The engine stays usable
    let clusters = engine.analyze_patterns(&batch(), "5g_nr", None).unwrap();
    assert!(clusters.iter().all(|c| c.is_novel));
}
