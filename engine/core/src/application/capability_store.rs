// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # CapabilityStore: Confidence Tracking
//!
//! Owns the confidence value of every capability domain. Each update is
//! clamped to `[0, 1]`, recorded as a `confidence` [`PerformanceMetric`], and
//! checked for an upward crossing of [`SKILL_THRESHOLD`].
//!
//! ## Concurrency
//!
//! All reads and writes go through one re-entrant lock. Threshold handlers run
//! on the updating thread while that lock is held, so a handler may read or
//! update the store; its own update is ordered after the one that fired it.
//!
//! ## Persistence
//!
//! Write-behind: [`CapabilityStore::flush`] writes the capability map and the
//! metrics appended since the last successful flush. On failure the pending
//! metrics are kept for the next flush and memory stays authoritative.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Implements the capability store over a `CapabilityRepository`

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::ReentrantMutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::application::callbacks::Callbacks;
use crate::domain::capability::{CapabilityDomain, CapabilityError, PerformanceMetric};
use crate::domain::repository::{CapabilityRepository, RepositoryError};
use crate::infrastructure::persistence::PersistencePolicy;

/// Confidence at which a domain counts as a usable skill.
pub const SKILL_THRESHOLD: f64 = 0.5;

/// Metrics kept in memory for `recent_metrics`.
const METRIC_HISTORY: usize = 1000;

/// Delivered to `on_threshold_crossed` subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCrossing {
    pub domain: CapabilityDomain,
    pub previous: f64,
    pub confidence: f64,
    pub source: String,
    pub crossed_at: DateTime<Utc>,
}

struct StoreState {
    capabilities: BTreeMap<CapabilityDomain, f64>,
    history: VecDeque<PerformanceMetric>,
    pending: Vec<PerformanceMetric>,
}

pub struct CapabilityStore {
    repository: Arc<dyn CapabilityRepository>,
    policy: PersistencePolicy,
    state: ReentrantMutex<RefCell<StoreState>>,
    on_threshold: Callbacks<ThresholdCrossing>,
    crossings: AtomicU64,
}

impl CapabilityStore {
    /// Start every domain at 0.0, then overlay stored confidences. A failed
    /// load is logged and the store starts empty.
    pub fn new(repository: Arc<dyn CapabilityRepository>, policy: PersistencePolicy) -> Self {
        let mut capabilities: BTreeMap<CapabilityDomain, f64> =
            CapabilityDomain::ALL.iter().map(|d| (*d, 0.0)).collect();

        match repository.load_capabilities() {
            Ok(stored) => {
                for (domain, confidence) in stored {
                    capabilities.insert(domain, confidence.clamp(0.0, 1.0));
                }
            }
            Err(e) => warn!(error = %e, "Failed to load capabilities, starting from zero"),
        }

        let history: VecDeque<PerformanceMetric> = match repository.recent_metrics(METRIC_HISTORY) {
            Ok(metrics) => metrics.into(),
            Err(e) => {
                warn!(error = %e, "Failed to load metric history");
                VecDeque::new()
            }
        };

        info!(
            domains = capabilities.len(),
            metrics = history.len(),
            "Capability store initialized"
        );

        Self {
            repository,
            policy,
            state: ReentrantMutex::new(RefCell::new(StoreState {
                capabilities,
                history,
                pending: Vec::new(),
            })),
            on_threshold: Callbacks::new("skill_threshold_crossed"),
            crossings: AtomicU64::new(0),
        }
    }

    pub fn get(&self, domain: CapabilityDomain) -> f64 {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.capabilities.get(&domain).copied().unwrap_or(0.0)
    }

    /// Lookup by wire name; unknown names read as 0.0.
    pub fn get_by_name(&self, name: &str) -> f64 {
        name.parse::<CapabilityDomain>()
            .map(|domain| self.get(domain))
            .unwrap_or(0.0)
    }

    /// Set a domain's confidence, clamped to `[0, 1]`. Returns the stored value.
    pub fn update(
        &self,
        domain: CapabilityDomain,
        confidence: f64,
        source: &str,
    ) -> Result<f64, CapabilityError> {
        if confidence.is_nan() {
            return Err(CapabilityError::InvalidConfidence { domain });
        }
        let clamped = confidence.clamp(0.0, 1.0);

        let guard = self.state.lock();
        let crossing = {
            let mut state = guard.borrow_mut();
            let previous = state.capabilities.insert(domain, clamped).unwrap_or(0.0);

            let metric = PerformanceMetric::new(domain, "confidence", clamped)
                .with_context("source", source)
                .with_context("previous", previous);
            if state.history.len() == METRIC_HISTORY {
                state.history.pop_front();
            }
            state.history.push_back(metric.clone());
            state.pending.push(metric);

            debug!(domain = %domain, previous, confidence = clamped, source, "Capability updated");
            metrics::gauge!("nightframe_capability_confidence", "domain" => domain.as_str()).set(clamped);

            (previous < SKILL_THRESHOLD && clamped >= SKILL_THRESHOLD).then(|| ThresholdCrossing {
                domain,
                previous,
                confidence: clamped,
                source: source.to_string(),
                crossed_at: Utc::now(),
            })
        };

        if let Some(crossing) = crossing {
            self.crossings.fetch_add(1, Ordering::Relaxed);
            info!(
                domain = %crossing.domain,
                confidence = crossing.confidence,
                "Skill threshold crossed"
            );
            self.on_threshold.emit(&crossing);
        }
        drop(guard);

        Ok(clamped)
    }

    pub fn update_named(&self, name: &str, confidence: f64, source: &str) -> Result<f64, CapabilityError> {
        let domain: CapabilityDomain = name.parse()?;
        self.update(domain, confidence, source)
    }

    pub fn all(&self) -> BTreeMap<CapabilityDomain, f64> {
        let guard = self.state.lock();
        let caps = guard.borrow().capabilities.clone();
        caps
    }

    /// Most recent metrics, oldest first
    pub fn recent_metrics(&self, limit: usize) -> Vec<PerformanceMetric> {
        let guard = self.state.lock();
        let state = guard.borrow();
        let skip = state.history.len().saturating_sub(limit);
        state.history.iter().skip(skip).cloned().collect()
    }

    pub fn on_threshold_crossed<F>(&self, handler: F)
    where
        F: Fn(&ThresholdCrossing) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_threshold.subscribe(handler);
    }

    /// Threshold crossings since construction
    pub fn threshold_crossings(&self) -> u64 {
        self.crossings.load(Ordering::Relaxed)
    }

    pub fn threshold_callbacks(&self) -> &Callbacks<ThresholdCrossing> {
        &self.on_threshold
    }

    /// Metrics not yet written by a successful flush
    pub fn pending_metrics(&self) -> usize {
        let guard = self.state.lock();
        let pending = guard.borrow().pending.len();
        pending
    }

    /// Write capabilities and pending metrics.
    /// The state lock is released while writing; metrics appended meanwhile
    /// stay pending behind the batch being written.
    pub fn flush(&self) -> Result<(), RepositoryError> {
        let (capabilities, pending) = {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            (state.capabilities.clone(), std::mem::take(&mut state.pending))
        };

        let result = self
            .policy
            .run("save_capabilities", || self.repository.save_capabilities(&capabilities))
            .and_then(|_| {
                self.policy
                    .run("append_metrics", || self.repository.append_metrics(&pending))
            });

        if let Err(e) = result {
            warn!(pending = pending.len(), error = %e, "Capability flush failed, will retry");
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            let newer = std::mem::replace(&mut state.pending, pending);
            state.pending.extend(newer);
            return Err(e);
        }

        debug!(metrics = pending.len(), "Capability store flushed");
        Ok(())
    }
}
