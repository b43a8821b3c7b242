// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Metacognition Aggregates
//!
//! Gaps, objectives and adaptation strategies produced by the
//! REFLECT → PLAN → EVALUATE → ADAPT cycle, plus the cycle report and the
//! state snapshot exposed to observers.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Defines the entities owned by the metacognitive scheduler

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::capability::{CapabilityDomain, PerformanceMetric};

macro_rules! entity_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(GapId);
entity_id!(ObjectiveId);
entity_id!(StrategyId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CognitivePhase {
    #[default]
    Reflecting,
    Planning,
    Evaluating,
    Adapting,
}

impl fmt::Display for CognitivePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CognitivePhase::Reflecting => "reflecting",
            CognitivePhase::Planning => "planning",
            CognitivePhase::Evaluating => "evaluating",
            CognitivePhase::Adapting => "adapting",
        };
        f.write_str(name)
    }
}

/// A priority domain found below its confidence target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningGap {
    pub id: GapId,
    pub domain: CapabilityDomain,
    pub description: String,
    /// `(target - current) / target`
    pub severity: f64,
    pub current: f64,
    pub target: f64,
    pub discovered_at: DateTime<Utc>,
    pub resolution_attempts: u32,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl LearningGap {
    /// Callers only create gaps when `current < target` and `target > 0`.
    pub fn new(domain: CapabilityDomain, current: f64, target: f64) -> Self {
        Self {
            id: GapId::new(),
            domain,
            description: format!(
                "Capability {} at {:.1}%, target {:.1}%",
                domain,
                current * 100.0,
                target * 100.0
            ),
            severity: (target - current) / target,
            current,
            target,
            discovered_at: Utc::now(),
            resolution_attempts: 0,
            resolved: false,
            resolved_at: None,
        }
    }

    pub fn resolve(&mut self) {
        if !self.resolved {
            self.resolved = true;
            self.resolved_at = Some(Utc::now());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningObjective {
    pub id: ObjectiveId,
    pub domain: CapabilityDomain,
    pub description: String,
    pub target_metric: String,
    pub target_value: f64,
    /// 1 (lowest) to 10 (highest)
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    pub achieved: bool,
    pub achieved_at: Option<DateTime<Utc>>,
    pub source_gap: Option<GapId>,
}

impl LearningObjective {
    /// Flip to achieved once `current` reaches the target. Returns true only on
    /// the evaluation that achieves it.
    pub fn check(&mut self, current: f64) -> bool {
        if self.achieved || current < self.target_value {
            return false;
        }
        self.achieved = true;
        self.achieved_at = Some(Utc::now());
        true
    }
}

/// Tuning parameters synthesized for an unresolved gap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationStrategy {
    pub id: StrategyId,
    pub name: String,
    pub description: String,
    /// Numeric multipliers plus `target_domain`
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub success_rate: f64,
    pub usage_count: u32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub target_gap: Option<GapId>,
}

impl AdaptationStrategy {
    pub const DEACTIVATION_RATE: f64 = 0.3;
    pub const DEACTIVATION_MIN_USES: u32 = 5;

    pub fn multiplier(&self, key: &str) -> Option<f64> {
        self.parameters.get(key).and_then(|v| v.as_f64())
    }

    pub fn target_domain(&self) -> Option<CapabilityDomain> {
        self.parameters
            .get("target_domain")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    }

    /// Fold one outcome into the running success rate.
    pub fn record_outcome(&mut self, success: bool) {
        let outcome = if success { 1.0 } else { 0.0 };
        self.usage_count += 1;
        self.success_rate += (outcome - self.success_rate) / self.usage_count as f64;
    }

    pub fn should_deactivate(&self) -> bool {
        self.active
            && self.usage_count >= Self::DEACTIVATION_MIN_USES
            && self.success_rate < Self::DEACTIVATION_RATE
    }
}

/// Externally supplied training measurement for the EVALUATE phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingFeedback {
    pub domain: Option<CapabilityDomain>,
    pub metric: String,
    pub value: f64,
}

impl TrainingFeedback {
    pub fn new(domain: Option<CapabilityDomain>, metric: impl Into<String>, value: f64) -> Self {
        Self {
            domain,
            metric: metric.into(),
            value,
        }
    }

    /// `domain.metric`, or the bare metric name without a domain.
    pub fn key(&self) -> String {
        match self.domain {
            Some(domain) => format!("{}.{}", domain, self.metric),
            None => self.metric.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub total_objectives: usize,
    pub achieved: usize,
    pub in_progress: usize,
    pub metrics: BTreeMap<String, f64>,
}

/// Everything one cycle produced. A failed phase leaves `error` set and the
/// remaining phases unrun; earlier results stay in the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub gaps_identified: Vec<LearningGap>,
    pub objectives_created: Vec<LearningObjective>,
    pub evaluation: Option<EvaluationSummary>,
    pub adaptations_made: Vec<AdaptationStrategy>,
    pub strategies_deactivated: Vec<StrategyId>,
    pub failed_phase: Option<CognitivePhase>,
    pub error: Option<String>,
}

impl CycleReport {
    pub fn new(cycle: u64) -> Self {
        Self {
            cycle,
            started_at: Utc::now(),
            completed_at: None,
            gaps_identified: Vec::new(),
            objectives_created: Vec::new(),
            evaluation: None,
            adaptations_made: Vec::new(),
            strategies_deactivated: Vec::new(),
            failed_phase: None,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
    }
}

/// Read-only snapshot of the scheduler and capability store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetacognitiveState {
    pub phase: CognitivePhase,
    pub capabilities: BTreeMap<CapabilityDomain, f64>,
    pub active_objectives: Vec<LearningObjective>,
    pub open_gaps: Vec<LearningGap>,
    pub active_strategies: Vec<AdaptationStrategy>,
    pub recent_metrics: Vec<PerformanceMetric>,
    pub cycles_completed: u64,
    pub skills_discovered: u64,
    pub adaptations_made: u64,
    pub last_reflection: Option<DateTime<Utc>>,
    pub last_adaptation: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gap_severity() {
        let gap = LearningGap::new(CapabilityDomain::Lte, 0.0, 0.9);
        assert!((gap.severity - 1.0).abs() < 1e-12);

        let gap = LearningGap::new(CapabilityDomain::RfFingerprinting, 0.5, 0.75);
        assert!((gap.severity - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_objective_achieved_once() {
        let mut objective = LearningObjective {
            id: ObjectiveId::new(),
            domain: CapabilityDomain::WifiAccessPoint,
            description: String::new(),
            target_metric: "wifi_ap_accuracy".into(),
            target_value: 0.6,
            priority: 3,
            created_at: Utc::now(),
            deadline: None,
            achieved: false,
            achieved_at: None,
            source_gap: None,
        };
        assert!(!objective.check(0.59));
        assert!(objective.check(0.6));
        assert!(!objective.check(0.9));
        assert!(objective.achieved);
    }

    #[test]
    fn test_strategy_deactivation_rule() {
        let mut strategy = AdaptationStrategy {
            id: StrategyId::new(),
            name: "Adaptive_5g_nr".into(),
            description: String::new(),
            parameters: BTreeMap::new(),
            success_rate: 0.0,
            usage_count: 0,
            active: true,
            created_at: Utc::now(),
            target_gap: None,
        };
        for _ in 0..4 {
            strategy.record_outcome(false);
        }
        assert!(!strategy.should_deactivate());
        strategy.record_outcome(true);
        assert_eq!(strategy.usage_count, 5);
        assert!((strategy.success_rate - 0.2).abs() < 1e-12);
        assert!(strategy.should_deactivate());
    }
}
