// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::DiscoveryError;
use crate::domain::pattern::PatternSignature;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SkillId(pub Uuid);

impl SkillId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SkillId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SkillId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillStatus {
    /// Proposed from a novel cluster, not validated
    Candidate,
    /// Under validation
    Testing,
    /// Validated and in use
    Active,
    /// No longer useful
    Deprecated,
    /// Validation failed
    Failed,
}

impl SkillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkillStatus::Candidate => "candidate",
            SkillStatus::Testing => "testing",
            SkillStatus::Active => "active",
            SkillStatus::Deprecated => "deprecated",
            SkillStatus::Failed => "failed",
        }
    }

    /// Whether a skill in this status may move to `next`.
    ///
    /// Registration may promote a candidate straight to `Active` without
    /// passing through `Testing`.
    pub fn can_transition_to(&self, next: SkillStatus) -> bool {
        use SkillStatus::*;
        match (self, next) {
            (a, b) if *a == b => matches!(a, Candidate | Testing | Active),
            (Candidate, Testing | Active | Failed | Deprecated) => true,
            (Testing, Active | Failed | Deprecated) => true,
            (Active, Deprecated) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SkillStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    PatternClustering,
    /// Created when a capability crossed the skill confidence threshold
    CapabilityThreshold,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredSkill {
    pub id: SkillId,
    pub name: String,
    pub description: String,
    pub domain: String,
    pub discovered_at: DateTime<Utc>,
    pub discovery_method: DiscoveryMethod,
    pub source_data: Option<String>,
    pub pattern_signature: Option<PatternSignature>,
    /// Centroid coordinates keyed `dim_0`, `dim_1`, ...
    pub pattern_features: BTreeMap<String, f64>,
    pub utility_score: f64,
    pub confidence: f64,
    pub validation_count: u32,
    pub success_count: u32,
    pub status: SkillStatus,
    pub artifact_path: Option<PathBuf>,
    pub dependencies: Vec<String>,
    pub parent_skill: Option<SkillId>,
}

impl DiscoveredSkill {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        domain: impl Into<String>,
        discovery_method: DiscoveryMethod,
    ) -> Self {
        Self {
            id: SkillId::new(),
            name: name.into(),
            description: description.into(),
            domain: domain.into(),
            discovered_at: Utc::now(),
            discovery_method,
            source_data: None,
            pattern_signature: None,
            pattern_features: BTreeMap::new(),
            utility_score: 0.0,
            confidence: 0.0,
            validation_count: 0,
            success_count: 0,
            status: SkillStatus::Candidate,
            artifact_path: None,
            dependencies: Vec::new(),
            parent_skill: None,
        }
    }

    pub fn with_features(mut self, centroid: &[f64]) -> Self {
        self.pattern_features = centroid
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("dim_{}", i), *v))
            .collect();
        self
    }

    /// Feature values ordered by dimension index rather than key order.
    pub fn feature_vector(&self) -> Vec<f64> {
        let mut indexed: Vec<(usize, f64)> = self
            .pattern_features
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix("dim_")
                    .and_then(|i| i.parse::<usize>().ok())
                    .map(|i| (i, *value))
            })
            .collect();
        indexed.sort_by_key(|(i, _)| *i);
        indexed.into_iter().map(|(_, v)| v).collect()
    }

    /// Population variance of the feature values, 0 when there are none.
    pub fn feature_variance(&self) -> f64 {
        let values: Vec<f64> = self.pattern_features.values().copied().collect();
        if values.is_empty() {
            return 0.0;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
    }

    pub fn transition_to(&mut self, next: SkillStatus) -> Result<(), DiscoveryError> {
        if !self.status.can_transition_to(next) {
            return Err(DiscoveryError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Records one validation run; confidence becomes the observed pass rate.
    pub fn record_validation(&mut self, passed: bool) {
        self.validation_count += 1;
        if passed {
            self.success_count += 1;
        }
        self.confidence = self.success_count as f64 / self.validation_count as f64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_vector_orders_by_dimension() {
        let values: Vec<f64> = (0..12).map(|i| i as f64).collect();
        let skill = DiscoveredSkill::new("s", "d", "4g_lte", DiscoveryMethod::Manual).with_features(&values);
        assert_eq!(skill.feature_vector(), values);
    }

    #[test]
    fn test_feature_variance() {
        let skill = DiscoveredSkill::new("s", "d", "4g_lte", DiscoveryMethod::Manual).with_features(&[1.0, 3.0]);
        assert!((skill.feature_variance() - 1.0).abs() < 1e-12);

        let empty = DiscoveredSkill::new("s", "d", "4g_lte", DiscoveryMethod::Manual);
        assert_eq!(empty.feature_variance(), 0.0);
    }

    #[test]
    fn test_status_transitions() {
        let mut skill = DiscoveredSkill::new("s", "d", "wifi_ap", DiscoveryMethod::Manual);
        skill.transition_to(SkillStatus::Active).unwrap();
        skill.transition_to(SkillStatus::Active).unwrap();
        skill.transition_to(SkillStatus::Deprecated).unwrap();

        let err = skill.transition_to(SkillStatus::Active).unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidTransition { .. }));
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut skill = DiscoveredSkill::new("s", "d", "wifi_ap", DiscoveryMethod::Manual);
        skill.transition_to(SkillStatus::Testing).unwrap();
        skill.transition_to(SkillStatus::Failed).unwrap();
        assert!(skill.transition_to(SkillStatus::Testing).is_err());
        assert!(skill.transition_to(SkillStatus::Failed).is_err());
    }

    #[test]
    fn test_record_validation_updates_confidence() {
        let mut skill = DiscoveredSkill::new("s", "d", "wifi_ap", DiscoveryMethod::Manual);
        skill.record_validation(true);
        skill.record_validation(false);
        assert_eq!(skill.validation_count, 2);
        assert_eq!(skill.success_count, 1);
        assert!((skill.confidence - 0.5).abs() < 1e-12);
    }
}
