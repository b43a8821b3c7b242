// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Feature Clustering
//!
//! Pure numeric routines behind pattern analysis: matrix validation, z-score
//! normalization and Lloyd's k-means with random initial centroids.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Stateless clustering math used by the discovery engine

use rand::seq::index;
use rand::Rng;

use crate::domain::errors::DiscoveryError;

/// Added to every column's standard deviation before dividing.
pub const NORMALIZATION_EPSILON: f64 = 1e-8;

const CONVERGENCE_RTOL: f64 = 1e-5;
const CONVERGENCE_ATOL: f64 = 1e-8;

/// Checks that every row has the same non-zero width and only finite values.
/// Returns the column count.
pub fn validate_matrix(features: &[Vec<f64>]) -> Result<usize, DiscoveryError> {
    let Some(first) = features.first() else {
        return Ok(0);
    };
    let expected = first.len();
    if expected == 0 {
        return Err(DiscoveryError::EmptyFeatures);
    }

    for (row, values) in features.iter().enumerate() {
        if values.len() != expected {
            return Err(DiscoveryError::RaggedFeatures {
                row,
                expected,
                found: values.len(),
            });
        }
        if let Some(column) = values.iter().position(|v| !v.is_finite()) {
            return Err(DiscoveryError::NonFiniteFeature { row, column });
        }
    }

    Ok(expected)
}

/// Z-score normalization per column using the population standard deviation.
pub fn normalize(features: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = features.len();
    if n == 0 {
        return Vec::new();
    }
    let dims = features[0].len();

    let mut mean = vec![0.0; dims];
    for row in features {
        for (m, v) in mean.iter_mut().zip(row) {
            *m += v;
        }
    }
    mean.iter_mut().for_each(|m| *m /= n as f64);

    let mut std = vec![0.0; dims];
    for row in features {
        for ((s, v), m) in std.iter_mut().zip(row).zip(&mean) {
            *s += (v - m).powi(2);
        }
    }
    std.iter_mut()
        .for_each(|s| *s = (*s / n as f64).sqrt() + NORMALIZATION_EPSILON);

    features
        .iter()
        .map(|row| {
            row.iter()
                .zip(&mean)
                .zip(&std)
                .map(|((v, m), s)| (v - m) / s)
                .collect()
        })
        .collect()
}

/// Result of one k-means run
#[derive(Debug, Clone)]
pub struct KMeansResult {
    pub centroids: Vec<Vec<f64>>,
    /// Cluster index for every input row
    pub assignments: Vec<usize>,
    pub iterations: usize,
    pub converged: bool,
}

impl KMeansResult {
    /// Row indices assigned to cluster `k`.
    pub fn members(&self, k: usize) -> Vec<usize> {
        self.assignments
            .iter()
            .enumerate()
            .filter(|(_, a)| **a == k)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Lloyd's algorithm. Initial centroids are `k` distinct rows drawn at random;
/// a centroid whose cluster empties keeps its previous position.
///
/// Callers guarantee `2 <= k <= data.len()`.
pub fn kmeans<R: Rng + ?Sized>(
    data: &[Vec<f64>],
    k: usize,
    max_iterations: usize,
    rng: &mut R,
) -> KMeansResult {
    let mut centroids: Vec<Vec<f64>> = index::sample(rng, data.len(), k)
        .into_iter()
        .map(|i| data[i].clone())
        .collect();
    let mut assignments = vec![0; data.len()];
    let mut iterations = 0;
    let mut converged = false;

    while iterations < max_iterations {
        iterations += 1;

        for (row, assignment) in data.iter().zip(assignments.iter_mut()) {
            *assignment = nearest(row, &centroids);
        }

        let updated = recompute_centroids(data, &assignments, &centroids);
        if all_close(&centroids, &updated) {
            converged = true;
            break;
        }
        centroids = updated;
    }

    KMeansResult {
        centroids,
        assignments,
        iterations,
        converged,
    }
}

/// Population variance over every element of the member rows.
pub fn cluster_variance(data: &[Vec<f64>], members: &[usize]) -> f64 {
    let values: Vec<f64> = members
        .iter()
        .flat_map(|&i| data[i].iter().copied())
        .collect();
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Index of the closest centroid; ties go to the lowest index.
fn nearest(row: &[f64], centroids: &[Vec<f64>]) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (k, centroid) in centroids.iter().enumerate() {
        let distance = squared_distance(row, centroid);
        if distance < best_distance {
            best = k;
            best_distance = distance;
        }
    }
    best
}

fn recompute_centroids(
    data: &[Vec<f64>],
    assignments: &[usize],
    previous: &[Vec<f64>],
) -> Vec<Vec<f64>> {
    let dims = previous.first().map(Vec::len).unwrap_or(0);
    let mut sums = vec![vec![0.0; dims]; previous.len()];
    let mut counts = vec![0usize; previous.len()];

    for (row, &k) in data.iter().zip(assignments) {
        counts[k] += 1;
        for (s, v) in sums[k].iter_mut().zip(row) {
            *s += v;
        }
    }

    sums.into_iter()
        .zip(counts)
        .zip(previous)
        .map(|((sum, count), old)| {
            if count == 0 {
                old.clone()
            } else {
                sum.into_iter().map(|s| s / count as f64).collect()
            }
        })
        .collect()
}

fn all_close(a: &[Vec<f64>], b: &[Vec<f64>]) -> bool {
    a.iter().zip(b).all(|(ra, rb)| {
        ra.iter()
            .zip(rb)
            .all(|(x, y)| (x - y).abs() <= CONVERGENCE_ATOL + CONVERGENCE_RTOL * y.abs())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn two_blobs() -> Vec<Vec<f64>> {
        let mut rows = Vec::new();
        for i in 0..10 {
            let jitter = i as f64 * 0.01;
            rows.push(vec![0.0 + jitter, 0.0 - jitter]);
            rows.push(vec![10.0 + jitter, 10.0 - jitter]);
        }
        rows
    }

    #[test]
    fn test_validate_rejects_ragged_rows() {
        let err = validate_matrix(&[vec![1.0, 2.0], vec![1.0]]).unwrap_err();
        assert!(matches!(err, DiscoveryError::RaggedFeatures { row: 1, expected: 2, found: 1 }));
    }

    #[test]
    fn test_validate_rejects_non_finite() {
        let err = validate_matrix(&[vec![1.0, f64::NAN]]).unwrap_err();
        assert!(matches!(err, DiscoveryError::NonFiniteFeature { row: 0, column: 1 }));
    }

    #[test]
    fn test_normalize_centers_columns() {
        let normalized = normalize(&[vec![1.0, 5.0], vec![3.0, 5.0]]);
        assert!((normalized[0][0] + 1.0).abs() < 1e-6);
        assert!((normalized[1][0] - 1.0).abs() < 1e-6);
        // Constant column stays at zero instead of dividing by zero
        assert_eq!(normalized[0][1], 0.0);
    }

    #[test]
    fn test_kmeans_separates_blobs() {
        let data = two_blobs();
        let mut rng = StdRng::seed_from_u64(7);
        let result = kmeans(&data, 2, 20, &mut rng);

        assert!(result.converged);
        let first = result.members(result.assignments[0]);
        assert_eq!(first.len(), 10);
        assert!(first.iter().all(|i| i % 2 == 0));
    }

    #[test]
    fn test_cluster_variance_over_all_elements() {
        let data = vec![vec![1.0, 3.0], vec![1.0, 3.0]];
        assert!((cluster_variance(&data, &[0, 1]) - 1.0).abs() < 1e-12);
        assert_eq!(cluster_variance(&data, &[]), 0.0);
    }
}
