// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Synthetic RF measurements for demos and the continuous loop when no real
//! feature source is attached.
//!
//! Each sample is two channels (I and Q) of `steps` readings: gaussian noise
//! plus a sinusoid with a random frequency in [0.1, 0.5) and random phase,
//! flattened channel by channel. The label is the sample's frequency.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::domain::collaborators::{CollaboratorError, FeatureBatch, FeatureSource};

const SIGNAL_AMPLITUDE: f64 = 0.5;
const DURATION: f64 = 10.0;

pub struct SyntheticFeatureSource {
    samples: usize,
    steps: usize,
    max_batches: Option<u64>,
    produced: AtomicU64,
    rng: Mutex<StdRng>,
}

impl SyntheticFeatureSource {
    pub fn new(samples: usize, steps: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            samples,
            steps: steps.max(2),
            max_batches: None,
            produced: AtomicU64::new(0),
            rng: Mutex::new(rng),
        }
    }

    /// Stop after `max_batches` batches
    pub fn with_max_batches(mut self, max_batches: u64) -> Self {
        self.max_batches = Some(max_batches);
        self
    }

    pub fn feature_width(&self) -> usize {
        self.steps * 2
    }

    /// One batch, independent of the batch limit
    pub fn generate(&self) -> FeatureBatch {
        let mut rng = self.rng.lock();
        let mut features = Vec::with_capacity(self.samples);
        let mut labels = Vec::with_capacity(self.samples);

        for _ in 0..self.samples {
            let freq: f64 = rng.random_range(0.1..0.5);
            let phase: f64 = rng.random_range(0.0..2.0 * PI);
            let mut row = Vec::with_capacity(self.feature_width());
            let mut quadrature = Vec::with_capacity(self.steps);

            for i in 0..self.steps {
                let t = DURATION * i as f64 / (self.steps - 1) as f64;
                let angle = 2.0 * PI * freq * t + phase;
                row.push(gaussian(&mut *rng) + angle.sin() * SIGNAL_AMPLITUDE);
                quadrature.push(gaussian(&mut *rng) + angle.cos() * SIGNAL_AMPLITUDE);
            }
            row.extend(quadrature);
            features.push(row);
            labels.push(freq);
        }

        FeatureBatch {
            features,
            labels: Some(labels),
        }
    }
}

/// Standard normal sample (Box-Muller)
fn gaussian<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = rng.random_range(f64::EPSILON..1.0);
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

#[async_trait]
impl FeatureSource for SyntheticFeatureSource {
    async fn next_batch(&self) -> Result<Option<FeatureBatch>, CollaboratorError> {
        if let Some(max) = self.max_batches {
            if self.produced.fetch_add(1, Ordering::AcqRel) >= max {
                return Ok(None);
            }
        }
        Ok(Some(self.generate()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_shape() {
        let source = SyntheticFeatureSource::new(12, 16, Some(7));
        let batch = source.generate();
        assert_eq!(batch.features.len(), 12);
        assert!(batch.features.iter().all(|row| row.len() == 32));
        assert!(batch.features.iter().flatten().all(|v| v.is_finite()));

        let labels = batch.labels.unwrap();
        assert!(labels.iter().all(|f| (0.1..0.5).contains(f)));
    }

    #[test]
    fn test_seed_is_reproducible() {
        let a = SyntheticFeatureSource::new(4, 8, Some(42)).generate();
        let b = SyntheticFeatureSource::new(4, 8, Some(42)).generate();
        assert_eq!(a, b);
    }

    #[test]
    fn test_batch_limit() {
        let source = SyntheticFeatureSource::new(2, 4, Some(1)).with_max_batches(2);
        assert!(tokio_test::block_on(source.next_batch()).unwrap().is_some());
        assert!(tokio_test::block_on(source.next_batch()).unwrap().is_some());
        assert!(tokio_test::block_on(source.next_batch()).unwrap().is_none());
    }
}
