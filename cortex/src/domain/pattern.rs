// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterId(pub Uuid);

impl ClusterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClusterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content signature of a cluster centroid.
///
/// The centroid is quantized to two decimal places before hashing, so
/// centroids that differ only below that resolution share a signature.
/// Distinct patterns that round to the same grid point also collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternSignature(String);

impl PatternSignature {
    /// Number of hex characters kept from the SHA-256 digest.
    pub const LEN: usize = 16;

    pub fn from_centroid(centroid: &[f64]) -> Self {
        // Integer hundredths avoid "-0.0" vs "0.0" encoding differences.
        let quantized: Vec<String> = centroid
            .iter()
            .map(|v| ((v * 100.0).round() as i64).to_string())
            .collect();
        let encoded = format!("[{}]", quantized.join(","));

        let digest = Sha256::digest(encoded.as_bytes());
        let mut hex = hex::encode(digest);
        hex.truncate(Self::LEN);
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PatternSignature {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for PatternSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A group of similar feature vectors found by clustering one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternCluster {
    pub id: ClusterId,
    pub domain: String,
    /// Centroid in normalized feature space
    pub centroid: Vec<f64>,
    pub size: usize,
    /// Population variance over every element of every member vector
    pub variance: f64,
    /// Row indices of the member samples within the analyzed batch
    pub members: Vec<usize>,
    pub signature: PatternSignature,
    pub is_novel: bool,
    /// Mean of the supplied labels over the members, when labels were given
    pub label_mean: Option<f64>,
    pub discovered_at: DateTime<Utc>,
}

impl PatternCluster {
    pub fn new(domain: impl Into<String>, centroid: Vec<f64>, members: Vec<usize>, variance: f64) -> Self {
        let signature = PatternSignature::from_centroid(&centroid);
        Self {
            id: ClusterId::new(),
            domain: domain.into(),
            size: members.len(),
            centroid,
            variance,
            members,
            signature,
            is_novel: false,
            label_mean: None,
            discovered_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_quantization_stable() {
        let a = PatternSignature::from_centroid(&[1.001, 2.002]);
        let b = PatternSignature::from_centroid(&[1.004, 1.999]);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), PatternSignature::LEN);
    }

    #[test]
    fn test_signature_distinguishes_grid_points() {
        let a = PatternSignature::from_centroid(&[1.00, 2.00]);
        let b = PatternSignature::from_centroid(&[1.01, 2.00]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_signature_ignores_sign_of_zero() {
        let a = PatternSignature::from_centroid(&[-0.001, 0.0]);
        let b = PatternSignature::from_centroid(&[0.001, 0.0]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_cluster_size_tracks_members() {
        let cluster = PatternCluster::new("5g_nr", vec![0.5, -0.5], vec![0, 3, 7], 0.2);
        assert_eq!(cluster.size, 3);
        assert!(!cluster.is_novel);
        assert_eq!(cluster.signature, PatternSignature::from_centroid(&[0.5, -0.5]));
    }
}
