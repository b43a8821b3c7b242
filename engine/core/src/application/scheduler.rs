// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # MetacognitiveScheduler: Reflect / Plan / Evaluate / Adapt
//!
//! Drives one traversal of the cognitive state machine per
//! [`MetacognitiveScheduler::run_cycle`]:
//!
//! 1. **Reflect** – every priority domain below its target yields a
//!    [`LearningGap`]. Gaps accumulate across cycles.
//! 2. **Plan** – the five most severe gaps of this cycle become objectives one
//!    step above the current confidence.
//! 3. **Evaluate** – with training feedback, open objectives whose domain
//!    reached the target are marked achieved. The summary counts this pass
//!    only.
//! 4. **Adapt** – failing strategies are deactivated and up to three
//!    unresolved gaps get a fresh strategy with escalating multipliers.
//!
//! A phase error stops the cycle and is captured in the [`CycleReport`].
//! Whatever the outcome, changed entities are persisted and the capability
//! store is flushed before the report is returned.
//!
//! ## Locking
//!
//! Cycles are serialized by a re-entrant cycle lock; a nested call from a
//! callback on the cycling thread is rejected with
//! [`CycleError::AlreadyRunning`]. Entity state sits behind a second
//! re-entrant lock that is never held while calling into the capability
//! store or while delivering callbacks.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Implements the metacognitive cycle over a `MetacognitionRepository`

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{ReentrantMutex, RwLock};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::application::callbacks::Callbacks;
use crate::application::capability_store::{CapabilityStore, ThresholdCrossing};
use crate::domain::capability::PRIORITY_TARGETS;
use crate::domain::metacognition::{
    AdaptationStrategy, CognitivePhase, CycleReport, EvaluationSummary, GapId, LearningGap,
    LearningObjective, MetacognitiveState, ObjectiveId, StrategyId, TrainingFeedback,
};
use crate::domain::repository::{MetacognitionRepository, RepositoryError};
use crate::infrastructure::persistence::PersistencePolicy;

pub const MAX_OBJECTIVES_PER_CYCLE: usize = 5;
pub const MAX_ADAPTATIONS_PER_CYCLE: usize = 3;
pub const MAX_RESOLUTION_ATTEMPTS: u32 = 3;
pub const OBJECTIVE_STEP: f64 = 0.10;

/// Metrics included in state snapshots
const SNAPSHOT_METRICS: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("A metacognitive cycle is already running on this thread")]
    AlreadyRunning,

    #[error("Training feedback '{key}' is not a finite number")]
    InvalidFeedback { key: String },

    #[error("Learning gap not found: {0}")]
    GapNotFound(GapId),

    #[error("Adaptation strategy not found: {0}")]
    StrategyNotFound(StrategyId),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] RepositoryError),
}

#[derive(Default)]
struct SchedulerState {
    gaps: Vec<LearningGap>,
    objectives: Vec<LearningObjective>,
    strategies: Vec<AdaptationStrategy>,
    dirty_gaps: HashSet<GapId>,
    dirty_objectives: HashSet<ObjectiveId>,
    dirty_strategies: HashSet<StrategyId>,
    cycles_completed: u64,
    adaptations_made: u64,
    last_reflection: Option<DateTime<Utc>>,
    last_adaptation: Option<DateTime<Utc>>,
    last_report: Option<CycleReport>,
}

/// Clears the in-cycle flag when the cycle ends, even by unwinding.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct MetacognitiveScheduler {
    store: Arc<CapabilityStore>,
    repository: Arc<dyn MetacognitionRepository>,
    policy: PersistencePolicy,
    phase: RwLock<CognitivePhase>,
    cycle_lock: ReentrantMutex<()>,
    in_cycle: AtomicBool,
    state: ReentrantMutex<RefCell<SchedulerState>>,
    on_gap: Callbacks<LearningGap>,
    on_adaptation: Callbacks<AdaptationStrategy>,
    on_cycle: Callbacks<CycleReport>,
}

impl MetacognitiveScheduler {
    /// Build the scheduler and load stored gaps, objectives and strategies.
    /// A failed load is logged and the scheduler starts empty.
    pub fn new(
        store: Arc<CapabilityStore>,
        repository: Arc<dyn MetacognitionRepository>,
        policy: PersistencePolicy,
    ) -> Self {
        let mut state = SchedulerState::default();

        match repository.load_gaps() {
            Ok(gaps) => state.gaps = gaps,
            Err(e) => warn!(error = %e, "Failed to load learning gaps"),
        }
        match repository.load_objectives() {
            Ok(objectives) => state.objectives = objectives,
            Err(e) => warn!(error = %e, "Failed to load objectives"),
        }
        match repository.load_strategies() {
            Ok(strategies) => state.strategies = strategies,
            Err(e) => warn!(error = %e, "Failed to load adaptation strategies"),
        }
        state.adaptations_made = state.strategies.len() as u64;

        info!(
            gaps = state.gaps.len(),
            objectives = state.objectives.len(),
            strategies = state.strategies.len(),
            "Metacognitive scheduler initialized"
        );

        Self {
            store,
            repository,
            policy,
            phase: RwLock::new(CognitivePhase::default()),
            cycle_lock: ReentrantMutex::new(()),
            in_cycle: AtomicBool::new(false),
            state: ReentrantMutex::new(RefCell::new(state)),
            on_gap: Callbacks::new("gap_identified"),
            on_adaptation: Callbacks::new("adaptation"),
            on_cycle: Callbacks::new("cycle_completed"),
        }
    }

    pub fn capability_store(&self) -> &Arc<CapabilityStore> {
        &self.store
    }

    /// Current phase; readable from any thread while a cycle runs.
    pub fn phase(&self) -> CognitivePhase {
        *self.phase.read()
    }

    fn enter(&self, phase: CognitivePhase) {
        *self.phase.write() = phase;
        debug!(phase = %phase, "Entering cognitive phase");
    }

    /// Run one full cycle. Phase failures are reported in the returned
    /// report; only a nested call fails outright.
    pub fn run_cycle(&self, feedback: Option<&[TrainingFeedback]>) -> Result<CycleReport, CycleError> {
        let _cycle = self.cycle_lock.lock();
        if self.in_cycle.swap(true, Ordering::AcqRel) {
            return Err(CycleError::AlreadyRunning);
        }
        let _guard = CycleGuard(&self.in_cycle);

        let cycle = {
            let guard = self.state.lock();
            let next = guard.borrow().cycles_completed + 1;
            next
        };
        let mut report = CycleReport::new(cycle);
        info!(cycle, "Starting metacognitive cycle");
        metrics::counter!("nightframe_cycles_total").increment(1);

        if let Err((phase, e)) = self.run_phases(feedback, &mut report) {
            error!(cycle, phase = %phase, error = %e, "Metacognitive cycle failed");
            metrics::counter!("nightframe_cycle_failures_total").increment(1);
            report.failed_phase = Some(phase);
            report.error = Some(e.to_string());
        }
        report.completed_at = Some(Utc::now());

        {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            state.cycles_completed = cycle;
            state.last_report = Some(report.clone());
        }

        if let Err(e) = self.persist() {
            warn!(cycle, error = %e, "Scheduler state kept in memory");
        }
        if let Err(e) = self.store.flush() {
            warn!(cycle, error = %e, "Capability store kept in memory");
        }

        info!(
            cycle,
            gaps = report.gaps_identified.len(),
            objectives = report.objectives_created.len(),
            adaptations = report.adaptations_made.len(),
            duration_seconds = report.duration_seconds().unwrap_or_default(),
            "Metacognitive cycle complete"
        );
        self.on_cycle.emit(&report);
        Ok(report)
    }

    fn run_phases(
        &self,
        feedback: Option<&[TrainingFeedback]>,
        report: &mut CycleReport,
    ) -> Result<(), (CognitivePhase, CycleError)> {
        self.enter(CognitivePhase::Reflecting);
        report.gaps_identified = self.reflect();

        self.enter(CognitivePhase::Planning);
        report.objectives_created = self.plan(&report.gaps_identified);

        self.enter(CognitivePhase::Evaluating);
        if let Some(feedback) = feedback {
            let summary = self
                .evaluate(feedback)
                .map_err(|e| (CognitivePhase::Evaluating, e))?;
            report.evaluation = Some(summary);
        }

        self.enter(CognitivePhase::Adapting);
        let (deactivated, created) = self.adapt();
        report.strategies_deactivated = deactivated;
        report.adaptations_made = created;
        Ok(())
    }

    fn reflect(&self) -> Vec<LearningGap> {
        let capabilities = self.store.all();
        let gaps: Vec<LearningGap> = PRIORITY_TARGETS
            .iter()
            .filter_map(|(domain, target)| {
                let current = capabilities.get(domain).copied().unwrap_or(0.0);
                (current < *target).then(|| LearningGap::new(*domain, current, *target))
            })
            .collect();

        {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            for gap in &gaps {
                state.dirty_gaps.insert(gap.id);
                state.gaps.push(gap.clone());
            }
            state.last_reflection = Some(Utc::now());
        }

        for gap in &gaps {
            debug!(domain = %gap.domain, severity = gap.severity, "Learning gap identified");
            metrics::counter!("nightframe_gaps_identified_total").increment(1);
            self.on_gap.emit(gap);
        }
        info!(gaps = gaps.len(), "Reflection complete");
        gaps
    }

    fn plan(&self, gaps: &[LearningGap]) -> Vec<LearningObjective> {
        let capabilities = self.store.all();
        let mut ranked: Vec<&LearningGap> = gaps.iter().collect();
        ranked.sort_by(|a, b| b.severity.total_cmp(&a.severity));

        let objectives: Vec<LearningObjective> = ranked
            .into_iter()
            .take(MAX_OBJECTIVES_PER_CYCLE)
            .map(|gap| {
                let current = capabilities.get(&gap.domain).copied().unwrap_or(0.0);
                LearningObjective {
                    id: ObjectiveId::new(),
                    domain: gap.domain,
                    description: format!("Improve {} capability", gap.domain),
                    target_metric: format!("{}_accuracy", gap.domain),
                    target_value: (current + OBJECTIVE_STEP).min(1.0),
                    priority: (gap.severity * 10.0).round().clamp(1.0, 10.0) as u8,
                    created_at: Utc::now(),
                    deadline: None,
                    achieved: false,
                    achieved_at: None,
                    source_gap: Some(gap.id),
                }
            })
            .collect();

        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        for objective in &objectives {
            state.dirty_objectives.insert(objective.id);
            state.objectives.push(objective.clone());
        }
        info!(objectives = objectives.len(), "Planning complete");
        objectives
    }

    fn evaluate(&self, feedback: &[TrainingFeedback]) -> Result<EvaluationSummary, CycleError> {
        let mut metrics = BTreeMap::new();
        for item in feedback {
            if !item.value.is_finite() {
                return Err(CycleError::InvalidFeedback { key: item.key() });
            }
            metrics.insert(item.key(), item.value);
        }

        let capabilities = self.store.all();
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let state = &mut *state;

        // Counts cover this pass only: objectives achieved earlier are skipped
        let mut achieved = 0;
        let mut in_progress = 0;
        for objective in state.objectives.iter_mut().filter(|o| !o.achieved) {
            let current = capabilities.get(&objective.domain).copied().unwrap_or(0.0);
            if objective.check(current) {
                info!(domain = %objective.domain, target = objective.target_value, "Objective achieved");
                state.dirty_objectives.insert(objective.id);
                achieved += 1;
            } else {
                in_progress += 1;
            }
        }

        Ok(EvaluationSummary {
            total_objectives: state.objectives.len(),
            achieved,
            in_progress,
            metrics,
        })
    }

    fn adapt(&self) -> (Vec<StrategyId>, Vec<AdaptationStrategy>) {
        let mut deactivated = Vec::new();
        let mut created = Vec::new();

        {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            let state = &mut *state;

            for strategy in state.strategies.iter_mut() {
                if strategy.should_deactivate() {
                    strategy.active = false;
                    state.dirty_strategies.insert(strategy.id);
                    deactivated.push(strategy.id);
                    info!(strategy = %strategy.name, success_rate = strategy.success_rate, "Deactivated strategy");
                }
            }

            let eligible = state
                .gaps
                .iter_mut()
                .filter(|g| !g.resolved && g.resolution_attempts < MAX_RESOLUTION_ATTEMPTS)
                .take(MAX_ADAPTATIONS_PER_CYCLE);

            for gap in eligible {
                let attempts = gap.resolution_attempts as f64;
                let mut parameters = BTreeMap::new();
                parameters.insert("learning_rate_multiplier".to_string(), json!(1.0 + attempts * 0.5));
                parameters.insert("batch_size_multiplier".to_string(), json!(1.0 + attempts * 0.25));
                parameters.insert("epochs_multiplier".to_string(), json!(1.0 + attempts * 0.5));
                parameters.insert("target_domain".to_string(), json!(gap.domain.as_str()));

                let strategy = AdaptationStrategy {
                    id: StrategyId::new(),
                    name: format!("Adaptive_{}", gap.domain),
                    description: format!("Auto-generated strategy for {}", gap.domain),
                    parameters,
                    success_rate: 0.0,
                    usage_count: 0,
                    active: true,
                    created_at: Utc::now(),
                    target_gap: Some(gap.id),
                };

                gap.resolution_attempts += 1;
                state.dirty_gaps.insert(gap.id);
                state.dirty_strategies.insert(strategy.id);
                created.push(strategy);
            }

            state.strategies.extend(created.iter().cloned());
            state.adaptations_made += created.len() as u64;
            state.last_adaptation = Some(Utc::now());
        }

        for strategy in &created {
            metrics::counter!("nightframe_adaptations_total").increment(1);
            self.on_adaptation.emit(strategy);
        }
        info!(
            created = created.len(),
            deactivated = deactivated.len(),
            "Adaptation complete"
        );
        (deactivated, created)
    }

    /// Write every entity changed since the last successful persist.
    pub fn persist(&self) -> Result<(), RepositoryError> {
        let (gaps, objectives, strategies) = {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            let state = &mut *state;
            let gaps: Vec<LearningGap> = state
                .gaps
                .iter()
                .filter(|g| state.dirty_gaps.contains(&g.id))
                .cloned()
                .collect();
            let objectives: Vec<LearningObjective> = state
                .objectives
                .iter()
                .filter(|o| state.dirty_objectives.contains(&o.id))
                .cloned()
                .collect();
            let strategies: Vec<AdaptationStrategy> = state
                .strategies
                .iter()
                .filter(|s| state.dirty_strategies.contains(&s.id))
                .cloned()
                .collect();
            state.dirty_gaps.clear();
            state.dirty_objectives.clear();
            state.dirty_strategies.clear();
            (gaps, objectives, strategies)
        };

        let gaps_saved = self.policy.run("save_gaps", || self.repository.save_gaps(&gaps));
        let objectives_saved = self
            .policy
            .run("save_objectives", || self.repository.save_objectives(&objectives));
        let strategies_saved = self
            .policy
            .run("save_strategies", || self.repository.save_strategies(&strategies));

        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let mut first_error = None;
        if let Err(e) = gaps_saved {
            state.dirty_gaps.extend(gaps.iter().map(|g| g.id));
            first_error.get_or_insert(e);
        }
        if let Err(e) = objectives_saved {
            state.dirty_objectives.extend(objectives.iter().map(|o| o.id));
            first_error.get_or_insert(e);
        }
        if let Err(e) = strategies_saved {
            state.dirty_strategies.extend(strategies.iter().map(|s| s.id));
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Read-only snapshot of the scheduler and capability store.
    pub fn state(&self) -> MetacognitiveState {
        let capabilities = self.store.all();
        let recent_metrics = self.store.recent_metrics(SNAPSHOT_METRICS);
        let skills_discovered = self.store.threshold_crossings();
        let phase = self.phase();

        let guard = self.state.lock();
        let state = guard.borrow();
        MetacognitiveState {
            phase,
            capabilities,
            active_objectives: state.objectives.iter().filter(|o| !o.achieved).cloned().collect(),
            open_gaps: state.gaps.iter().filter(|g| !g.resolved).cloned().collect(),
            active_strategies: state.strategies.iter().filter(|s| s.active).cloned().collect(),
            recent_metrics,
            cycles_completed: state.cycles_completed,
            skills_discovered,
            adaptations_made: state.adaptations_made,
            last_reflection: state.last_reflection,
            last_adaptation: state.last_adaptation,
        }
    }

    pub fn active_objectives(&self) -> Vec<LearningObjective> {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.objectives.iter().filter(|o| !o.achieved).cloned().collect()
    }

    pub fn unresolved_gaps(&self) -> Vec<LearningGap> {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.gaps.iter().filter(|g| !g.resolved).cloned().collect()
    }

    pub fn strategies(&self) -> Vec<AdaptationStrategy> {
        let guard = self.state.lock();
        let strategies = guard.borrow().strategies.clone();
        strategies
    }

    pub fn last_report(&self) -> Option<CycleReport> {
        let guard = self.state.lock();
        let report = guard.borrow().last_report.clone();
        report
    }

    /// Mark a gap resolved. Gaps are only ever resolved this way. A failed
    /// save leaves the change in memory for the next persist.
    pub fn resolve_gap(&self, id: GapId) -> Result<LearningGap, CycleError> {
        let resolved = {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            let gap = state
                .gaps
                .iter_mut()
                .find(|g| g.id == id)
                .ok_or(CycleError::GapNotFound(id))?;
            gap.resolve();
            let resolved = gap.clone();
            state.dirty_gaps.insert(id);
            resolved
        };
        info!(domain = %resolved.domain, "Learning gap resolved");
        if let Err(e) = self.persist() {
            warn!(gap_id = %id, error = %e, "Resolved gap not persisted, will retry on next persist");
        }
        Ok(resolved)
    }

    /// Fold one training outcome into a strategy's success rate.
    pub fn record_strategy_outcome(
        &self,
        id: StrategyId,
        success: bool,
    ) -> Result<AdaptationStrategy, CycleError> {
        let updated = {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            let strategy = state
                .strategies
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or(CycleError::StrategyNotFound(id))?;
            strategy.record_outcome(success);
            let updated = strategy.clone();
            state.dirty_strategies.insert(id);
            updated
        };
        if let Err(e) = self.persist() {
            warn!(strategy_id = %id, error = %e, "Strategy outcome not persisted, will retry on next persist");
        }
        Ok(updated)
    }

    pub fn on_gap_identified<F>(&self, handler: F)
    where
        F: Fn(&LearningGap) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_gap.subscribe(handler);
    }

    /// Fires when a domain's confidence crosses the skill threshold upward.
    pub fn on_skill_discovered<F>(&self, handler: F)
    where
        F: Fn(&ThresholdCrossing) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.store.on_threshold_crossed(handler);
    }

    pub fn on_adaptation<F>(&self, handler: F)
    where
        F: Fn(&AdaptationStrategy) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_adaptation.subscribe(handler);
    }

    pub fn on_cycle_completed<F>(&self, handler: F)
    where
        F: Fn(&CycleReport) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_cycle.subscribe(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::InMemoryStore;
    use parking_lot::Mutex;
    use crate::domain::capability::CapabilityDomain;

    fn scheduler() -> (Arc<CapabilityStore>, MetacognitiveScheduler, InMemoryStore) {
        let repo = InMemoryStore::new();
        let store = Arc::new(CapabilityStore::new(
            Arc::new(repo.clone()),
            PersistencePolicy::no_retry(),
        ));
        let scheduler = MetacognitiveScheduler::new(
            store.clone(),
            Arc::new(repo.clone()),
            PersistencePolicy::no_retry(),
        );
        (store, scheduler, repo)
    }

    /// Metacognition storage whose writes fail while `failing` is set
    #[derive(Default)]
    struct FlakyMetacognition {
        inner: InMemoryStore,
        failing: AtomicBool,
    }

    impl FlakyMetacognition {
        fn check(&self) -> Result<(), RepositoryError> {
            if self.failing.load(Ordering::SeqCst) {
                Err(RepositoryError::Database("disk full".into()))
            } else {
                Ok(())
            }
        }
    }

    impl MetacognitionRepository for FlakyMetacognition {
        fn save_gaps(&self, gaps: &[LearningGap]) -> Result<(), RepositoryError> {
            self.check()?;
            self.inner.save_gaps(gaps)
        }

        fn load_gaps(&self) -> Result<Vec<LearningGap>, RepositoryError> {
            self.inner.load_gaps()
        }

        fn save_objectives(&self, objectives: &[LearningObjective]) -> Result<(), RepositoryError> {
            self.check()?;
            self.inner.save_objectives(objectives)
        }

        fn load_objectives(&self) -> Result<Vec<LearningObjective>, RepositoryError> {
            self.inner.load_objectives()
        }

        fn save_strategies(&self, strategies: &[AdaptationStrategy]) -> Result<(), RepositoryError> {
            self.check()?;
            self.inner.save_strategies(strategies)
        }

        fn load_strategies(&self) -> Result<Vec<AdaptationStrategy>, RepositoryError> {
            self.inner.load_strategies()
        }
    }

    fn at_target(store: &CapabilityStore) {
        for (domain, target) in PRIORITY_TARGETS {
            store.update(domain, target, "test").unwrap();
        }
    }

    #[test]
    fn test_reflect_zero_confidence_has_full_severity() {
        let (_store, scheduler, _) = scheduler();
        let report = scheduler.run_cycle(None).unwrap();

        assert_eq!(report.gaps_identified.len(), PRIORITY_TARGETS.len());
        let lte = report
            .gaps_identified
            .iter()
            .find(|g| g.domain == CapabilityDomain::Lte)
            .unwrap();
        assert!((lte.severity - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_plan_takes_top_five_by_severity() {
        let (store, scheduler, _) = scheduler();
        store.update(CapabilityDomain::Lte, 0.6, "test").unwrap();
        store.update(CapabilityDomain::NewRadio, 0.7, "test").unwrap();
        store.update(CapabilityDomain::InternetProvision, 0.9, "test").unwrap();

        let report = scheduler.run_cycle(None).unwrap();
        assert_eq!(report.gaps_identified.len(), 8);
        assert_eq!(report.objectives_created.len(), MAX_OBJECTIVES_PER_CYCLE);

        let planned: HashSet<CapabilityDomain> =
            report.objectives_created.iter().map(|o| o.domain).collect();
        assert!(!planned.contains(&CapabilityDomain::Lte));
        assert!(!planned.contains(&CapabilityDomain::NewRadio));
        assert!(!planned.contains(&CapabilityDomain::InternetProvision));
        assert!(report
            .objectives_created
            .iter()
            .all(|o| o.priority == 10 && (o.target_value - OBJECTIVE_STEP).abs() < 1e-12));
    }

    #[test]
    fn test_evaluate_marks_achieved_objectives() {
        let (store, scheduler, _) = scheduler();
        at_target(&store);
        store.update(CapabilityDomain::WifiAccessPoint, 0.5, "test").unwrap();
        let first = scheduler.run_cycle(None).unwrap();
        assert_eq!(first.objectives_created.len(), 1);

        store.update(CapabilityDomain::WifiAccessPoint, 0.65, "test").unwrap();
        let feedback = [TrainingFeedback::new(Some(CapabilityDomain::WifiAccessPoint), "accuracy", 0.65)];
        let second = scheduler.run_cycle(Some(&feedback)).unwrap();

        let evaluation = second.evaluation.unwrap();
        assert_eq!(evaluation.achieved, 1);
        assert_eq!(evaluation.metrics["wifi_ap.accuracy"], 0.65);
        // The second cycle planned a fresh objective from 0.65
        assert_eq!(evaluation.in_progress, 1);
    }

    #[test]
    fn test_evaluate_counts_only_the_current_pass() {
        let (store, scheduler, _) = scheduler();
        at_target(&store);
        store.update(CapabilityDomain::WifiAccessPoint, 0.5, "test").unwrap();
        scheduler.run_cycle(None).unwrap();

        store.update(CapabilityDomain::WifiAccessPoint, 0.65, "test").unwrap();
        let feedback = [TrainingFeedback::new(Some(CapabilityDomain::WifiAccessPoint), "accuracy", 0.65)];
        let second = scheduler.run_cycle(Some(&feedback)).unwrap().evaluation.unwrap();
        assert_eq!((second.achieved, second.in_progress), (1, 1));

        // Nothing new reaches its target; the earlier achievement is not recounted
        let third = scheduler.run_cycle(Some(&feedback)).unwrap().evaluation.unwrap();
        assert_eq!(third.achieved, 0);
        assert_eq!(third.in_progress, 2);
        assert_eq!(third.total_objectives, 3);
    }

    #[test]
    fn test_mutations_survive_a_failed_save() {
        let store = Arc::new(CapabilityStore::new(
            Arc::new(InMemoryStore::new()),
            PersistencePolicy::no_retry(),
        ));
        let repo = Arc::new(FlakyMetacognition::default());
        let scheduler = MetacognitiveScheduler::new(store.clone(), repo.clone(), PersistencePolicy::no_retry());
        at_target(&store);
        store.update(CapabilityDomain::Lte, 0.3, "test").unwrap();
        let report = scheduler.run_cycle(None).unwrap();
        let gap_id = report.gaps_identified[0].id;
        let strategy_id = report.adaptations_made[0].id;

        repo.failing.store(true, Ordering::SeqCst);
        let resolved = scheduler.resolve_gap(gap_id).unwrap();
        assert!(resolved.resolved);
        let updated = scheduler.record_strategy_outcome(strategy_id, true).unwrap();
        assert_eq!(updated.usage_count, 1);
        assert!(scheduler.unresolved_gaps().is_empty());
        assert!(repo.inner.load_gaps().unwrap().iter().all(|g| !g.resolved));

        repo.failing.store(false, Ordering::SeqCst);
        scheduler.persist().unwrap();
        assert!(repo.inner.load_gaps().unwrap().iter().all(|g| g.resolved));
        let stored = repo.inner.load_strategies().unwrap();
        assert_eq!(stored[0].usage_count, 1);
    }

    #[test]
    fn test_invalid_feedback_fails_evaluate_and_still_persists() {
        let (_store, scheduler, repo) = scheduler();
        let feedback = [TrainingFeedback::new(None, "loss", f64::NAN)];
        let report = scheduler.run_cycle(Some(&feedback)).unwrap();

        assert!(!report.is_success());
        assert_eq!(report.failed_phase, Some(CognitivePhase::Evaluating));
        assert!(report.adaptations_made.is_empty());
        assert_eq!(repo.load_gaps().unwrap().len(), PRIORITY_TARGETS.len());
        assert_eq!(repo.load_objectives().unwrap().len(), MAX_OBJECTIVES_PER_CYCLE);
    }

    #[test]
    fn test_adapt_caps_attempts_per_gap() {
        let (store, scheduler, _) = scheduler();
        at_target(&store);
        store.update(CapabilityDomain::MeshRouting, 0.2, "test").unwrap();

        let first = scheduler.run_cycle(None).unwrap();
        let gap_id = first.gaps_identified[0].id;
        scheduler.resolve_gap(gap_id).unwrap();

        // Only new gaps from later cycles are eligible
        let mut multipliers = Vec::new();
        for _ in 0..3 {
            let report = scheduler.run_cycle(None).unwrap();
            multipliers.extend(
                report
                    .adaptations_made
                    .iter()
                    .map(|s| s.multiplier("learning_rate_multiplier").unwrap()),
            );
        }
        // Cycle 2: gap#2 (0). Cycle 3: gap#2 (1), gap#3 (0). Cycle 4: gap#2 (2), gap#3 (1), gap#4 (0).
        assert_eq!(multipliers, vec![1.0, 1.5, 1.0, 2.0, 1.5, 1.0]);

        let report = scheduler.run_cycle(None).unwrap();
        let attempts: Vec<f64> = report
            .adaptations_made
            .iter()
            .map(|s| s.multiplier("learning_rate_multiplier").unwrap())
            .collect();
        // gap#2 is exhausted after three attempts
        assert_eq!(attempts, vec![2.0, 1.5, 1.0]);
    }

    #[test]
    fn test_failing_strategy_is_deactivated() {
        let (store, scheduler, _) = scheduler();
        at_target(&store);
        store.update(CapabilityDomain::Lte, 0.3, "test").unwrap();
        let report = scheduler.run_cycle(None).unwrap();
        let strategy_id = report.adaptations_made[0].id;

        for _ in 0..5 {
            scheduler.record_strategy_outcome(strategy_id, false).unwrap();
        }
        let report = scheduler.run_cycle(None).unwrap();
        assert_eq!(report.strategies_deactivated, vec![strategy_id]);
        assert!(scheduler.state().active_strategies.iter().all(|s| s.id != strategy_id));
    }

    #[test]
    fn test_nested_cycle_is_rejected_and_callbacks_observe_phases() {
        let (store, scheduler, _) = scheduler();
        at_target(&store);
        store.update(CapabilityDomain::RfFingerprinting, 0.5, "test").unwrap();
        let scheduler = Arc::new(scheduler);

        let observed = Arc::new(Mutex::new(Vec::new()));
        let nested_rejected = Arc::new(AtomicBool::new(false));
        let (s, o, n) = (scheduler.clone(), observed.clone(), nested_rejected.clone());
        scheduler.on_gap_identified(move |_| {
            o.lock().push(s.phase());
            if matches!(s.run_cycle(None), Err(CycleError::AlreadyRunning)) {
                n.store(true, Ordering::SeqCst);
            }
            Ok(())
        });
        let (s, o) = (scheduler.clone(), observed.clone());
        scheduler.on_adaptation(move |_| {
            o.lock().push(s.phase());
            Ok(())
        });

        scheduler.run_cycle(None).unwrap();
        assert!(nested_rejected.load(Ordering::SeqCst));
        assert_eq!(
            *observed.lock(),
            vec![CognitivePhase::Reflecting, CognitivePhase::Adapting]
        );
        assert_eq!(scheduler.state().cycles_completed, 1);
    }

    #[test]
    fn test_state_reloads_from_repository() {
        let (store, scheduler, repo) = scheduler();
        at_target(&store);
        store.update(CapabilityDomain::LocationPrediction, 0.1, "test").unwrap();
        scheduler.run_cycle(None).unwrap();

        let reopened = MetacognitiveScheduler::new(store, Arc::new(repo), PersistencePolicy::no_retry());
        assert_eq!(reopened.unresolved_gaps().len(), 1);
        assert_eq!(reopened.active_objectives().len(), 1);
        assert_eq!(reopened.strategies().len(), 1);
        assert_eq!(reopened.unresolved_gaps()[0].resolution_attempts, 1);
    }
}
