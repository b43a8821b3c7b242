// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Capability Domains
//!
//! The closed set of skill areas the engine tracks, their confidence targets,
//! and the append-only metric records written on every confidence update.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Defines `CapabilityDomain` and `PerformanceMetric`

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CapabilityDomain {
    #[serde(rename = "4g_lte")]
    Lte,
    #[serde(rename = "5g_nr")]
    NewRadio,
    #[serde(rename = "network_handover")]
    NetworkHandover,
    #[serde(rename = "wifi_ap")]
    WifiAccessPoint,
    #[serde(rename = "cellular_intelligence")]
    CellularIntelligence,
    #[serde(rename = "rf_fingerprinting")]
    RfFingerprinting,
    #[serde(rename = "location_prediction")]
    LocationPrediction,
    #[serde(rename = "swarm_coordination")]
    SwarmCoordination,
    #[serde(rename = "internet_provision")]
    InternetProvision,
    #[serde(rename = "mesh_routing")]
    MeshRouting,
}

/// Priority domains with their confidence targets, in reflection order.
pub const PRIORITY_TARGETS: [(CapabilityDomain, f64); 8] = [
    (CapabilityDomain::Lte, 0.90),
    (CapabilityDomain::NewRadio, 0.80),
    (CapabilityDomain::NetworkHandover, 0.85),
    (CapabilityDomain::WifiAccessPoint, 0.90),
    (CapabilityDomain::InternetProvision, 0.95),
    (CapabilityDomain::RfFingerprinting, 0.75),
    (CapabilityDomain::LocationPrediction, 0.70),
    (CapabilityDomain::MeshRouting, 0.80),
];

impl CapabilityDomain {
    pub const ALL: [CapabilityDomain; 10] = [
        CapabilityDomain::Lte,
        CapabilityDomain::NewRadio,
        CapabilityDomain::NetworkHandover,
        CapabilityDomain::WifiAccessPoint,
        CapabilityDomain::CellularIntelligence,
        CapabilityDomain::RfFingerprinting,
        CapabilityDomain::LocationPrediction,
        CapabilityDomain::SwarmCoordination,
        CapabilityDomain::InternetProvision,
        CapabilityDomain::MeshRouting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityDomain::Lte => "4g_lte",
            CapabilityDomain::NewRadio => "5g_nr",
            CapabilityDomain::NetworkHandover => "network_handover",
            CapabilityDomain::WifiAccessPoint => "wifi_ap",
            CapabilityDomain::CellularIntelligence => "cellular_intelligence",
            CapabilityDomain::RfFingerprinting => "rf_fingerprinting",
            CapabilityDomain::LocationPrediction => "location_prediction",
            CapabilityDomain::SwarmCoordination => "swarm_coordination",
            CapabilityDomain::InternetProvision => "internet_provision",
            CapabilityDomain::MeshRouting => "mesh_routing",
        }
    }

    /// Confidence target, for priority domains only.
    pub fn priority_target(&self) -> Option<f64> {
        PRIORITY_TARGETS
            .iter()
            .find(|(domain, _)| domain == self)
            .map(|(_, target)| *target)
    }
}

impl fmt::Display for CapabilityDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityDomain {
    type Err = CapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CapabilityDomain::ALL
            .iter()
            .copied()
            .find(|domain| domain.as_str() == s)
            .ok_or_else(|| CapabilityError::UnknownDomain(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricId(pub Uuid);

impl MetricId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MetricId {
    fn default() -> Self {
        Self::new()
    }
}

/// One recorded measurement. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub id: MetricId,
    pub domain: CapabilityDomain,
    pub metric_name: String,
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
    pub context: BTreeMap<String, serde_json::Value>,
}

impl PerformanceMetric {
    pub fn new(domain: CapabilityDomain, metric_name: impl Into<String>, value: f64) -> Self {
        Self {
            id: MetricId::new(),
            domain,
            metric_name: metric_name.into(),
            value,
            recorded_at: Utc::now(),
            context: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("Unknown capability domain: {0}")]
    UnknownDomain(String),

    #[error("Confidence for {domain} is not a number")]
    InvalidConfidence { domain: CapabilityDomain },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_round_trips_through_name() {
        for domain in CapabilityDomain::ALL {
            assert_eq!(domain.as_str().parse::<CapabilityDomain>().unwrap(), domain);
        }
        assert!("6g_thz".parse::<CapabilityDomain>().is_err());
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let json = serde_json::to_string(&CapabilityDomain::Lte).unwrap();
        assert_eq!(json, "\"4g_lte\"");

        let mut map = BTreeMap::new();
        map.insert(CapabilityDomain::WifiAccessPoint, 0.4);
        assert_eq!(serde_json::to_string(&map).unwrap(), "{\"wifi_ap\":0.4}");
    }

    #[test]
    fn test_priority_targets() {
        assert_eq!(CapabilityDomain::InternetProvision.priority_target(), Some(0.95));
        assert_eq!(CapabilityDomain::SwarmCoordination.priority_target(), None);
        assert_eq!(CapabilityDomain::CellularIntelligence.priority_target(), None);
    }
}
