// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Linear regression trainer.
//!
//! Fits `label ≈ w·x + b` by full-batch gradient descent over standardized
//! features and labels. Loss is the mean squared error in standardized label
//! units, so a model that predicts the mean scores 1.0 and accuracy is
//! `1 - loss` clamped to [0, 1].
//!
//! Adaptation strategies scale the learning rate and epoch count of later
//! runs through `learning_rate_multiplier` and `epochs_multiplier`.

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::domain::capability::CapabilityDomain;
use crate::domain::collaborators::{CollaboratorError, ModelTrainer, TrainingOutcome};
use crate::domain::metacognition::AdaptationStrategy;
use nightframe_cortex::domain::clustering;

const MIN_LEARNING_RATE: f64 = 1e-5;
const MAX_LEARNING_RATE: f64 = 1.0;
const MAX_EPOCHS: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainerSettings {
    pub learning_rate: f64,
    pub epochs: u32,
}

impl Default for TrainerSettings {
    fn default() -> Self {
        Self {
            learning_rate: 0.05,
            epochs: 50,
        }
    }
}

pub struct LinearTrainer {
    settings: Mutex<TrainerSettings>,
}

impl LinearTrainer {
    pub fn new(settings: TrainerSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
        }
    }

    pub fn settings(&self) -> TrainerSettings {
        *self.settings.lock()
    }
}

impl Default for LinearTrainer {
    fn default() -> Self {
        Self::new(TrainerSettings::default())
    }
}

fn standardize(values: &[f64]) -> Vec<f64> {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    let std = if std < clustering::NORMALIZATION_EPSILON { 1.0 } else { std };
    values.iter().map(|v| (v - mean) / std).collect()
}

fn fit(features: &[Vec<f64>], labels: &[f64], settings: TrainerSettings) -> f64 {
    let x = clustering::normalize(features);
    let y = standardize(labels);
    let n = x.len() as f64;
    let width = x.first().map(Vec::len).unwrap_or(0);

    let mut weights = vec![0.0; width];
    let mut bias = 0.0;
    let mut loss = f64::INFINITY;

    for _ in 0..settings.epochs {
        let mut grad_w = vec![0.0; width];
        let mut grad_b = 0.0;
        let mut sse = 0.0;
        for (row, target) in x.iter().zip(&y) {
            let prediction: f64 = row.iter().zip(&weights).map(|(a, w)| a * w).sum::<f64>() + bias;
            let error = prediction - target;
            sse += error * error;
            for (g, a) in grad_w.iter_mut().zip(row) {
                *g += error * a;
            }
            grad_b += error;
        }
        loss = sse / n;
        for (w, g) in weights.iter_mut().zip(&grad_w) {
            *w -= settings.learning_rate * 2.0 * g / n;
        }
        bias -= settings.learning_rate * 2.0 * grad_b / n;
    }
    loss
}

#[async_trait]
impl ModelTrainer for LinearTrainer {
    async fn train(
        &self,
        domain: CapabilityDomain,
        features: &[Vec<f64>],
        labels: &[f64],
    ) -> Result<TrainingOutcome, CollaboratorError> {
        if features.is_empty() {
            return Err(CollaboratorError::Training("no training samples".to_string()));
        }
        if features.len() != labels.len() {
            return Err(CollaboratorError::Training(format!(
                "{} samples but {} labels",
                features.len(),
                labels.len()
            )));
        }
        clustering::validate_matrix(features).map_err(|e| CollaboratorError::Training(e.to_string()))?;
        if !labels.iter().all(|v| v.is_finite()) {
            return Err(CollaboratorError::Training("labels must be finite".to_string()));
        }

        let settings = self.settings();
        let loss = fit(features, labels, settings);
        if !loss.is_finite() {
            return Err(CollaboratorError::Training(format!(
                "training diverged at learning rate {}",
                settings.learning_rate
            )));
        }

        let accuracy = (1.0 - loss).clamp(0.0, 1.0);
        info!(domain = %domain, loss, accuracy, epochs = settings.epochs, "Training run complete");
        Ok(TrainingOutcome {
            loss,
            accuracy,
            epochs_completed: settings.epochs,
        })
    }

    fn apply_strategy(&self, strategy: &AdaptationStrategy) -> Result<(), CollaboratorError> {
        let mut settings = self.settings.lock();
        if let Some(multiplier) = strategy.multiplier("learning_rate_multiplier") {
            settings.learning_rate =
                (settings.learning_rate * multiplier).clamp(MIN_LEARNING_RATE, MAX_LEARNING_RATE);
        }
        if let Some(multiplier) = strategy.multiplier("epochs_multiplier") {
            settings.epochs = (settings.epochs as f64 * multiplier).round().clamp(1.0, MAX_EPOCHS) as u32;
        }
        debug!(
            strategy = %strategy.name,
            learning_rate = settings.learning_rate,
            epochs = settings.epochs,
            "Applied adaptation strategy to trainer"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeMap;

    use crate::domain::metacognition::StrategyId;

    #[tokio::test]
    async fn test_learns_linear_relation() {
        let features: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64, (i % 3) as f64]).collect();
        let labels: Vec<f64> = features.iter().map(|row| 2.0 * row[0] + 1.0).collect();

        let trainer = LinearTrainer::new(TrainerSettings {
            learning_rate: 0.1,
            epochs: 200,
        });
        let outcome = trainer
            .train(CapabilityDomain::RfFingerprinting, &features, &labels)
            .await
            .unwrap();
        assert!(outcome.accuracy > 0.95, "accuracy {}", outcome.accuracy);
        assert_eq!(outcome.epochs_completed, 200);
    }

    #[tokio::test]
    async fn test_rejects_label_mismatch() {
        let trainer = LinearTrainer::default();
        let err = trainer
            .train(CapabilityDomain::Lte, &[vec![1.0], vec![2.0]], &[1.0])
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Training(_)));
    }

    #[test]
    fn test_apply_strategy_scales_learning_rate() {
        let trainer = LinearTrainer::default();
        let mut parameters = BTreeMap::new();
        parameters.insert("learning_rate_multiplier".to_string(), json!(2.0));
        parameters.insert("epochs_multiplier".to_string(), json!(1.5));
        let strategy = AdaptationStrategy {
            id: StrategyId::new(),
            name: "Adaptive_rf_fingerprinting".into(),
            description: String::new(),
            parameters,
            success_rate: 0.0,
            usage_count: 0,
            active: true,
            created_at: Utc::now(),
            target_gap: None,
        };
        trainer.apply_strategy(&strategy).unwrap();
        let settings = trainer.settings();
        assert!((settings.learning_rate - 0.1).abs() < 1e-12);
        assert_eq!(settings.epochs, 75);
    }
}
