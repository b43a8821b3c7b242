// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Engine events carried by the broadcast bus.
//!
//! Synchronous callbacks are the primary notification path; every callback
//! channel is also mirrored here so async observers can stream activity.

use chrono::{DateTime, Utc};
use nightframe_cortex::DiscoveryEvent;
use serde::{Deserialize, Serialize};

use crate::domain::capability::CapabilityDomain;
use crate::domain::metacognition::{GapId, StrategyId};
use crate::domain::plugin::PluginId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    GapIdentified {
        gap_id: GapId,
        domain: CapabilityDomain,
        severity: f64,
        identified_at: DateTime<Utc>,
    },
    SkillThresholdCrossed {
        domain: CapabilityDomain,
        previous: f64,
        confidence: f64,
        crossed_at: DateTime<Utc>,
    },
    AdaptationCreated {
        strategy_id: StrategyId,
        name: String,
        target_domain: Option<CapabilityDomain>,
        created_at: DateTime<Utc>,
    },
    CycleCompleted {
        cycle: u64,
        gaps: usize,
        objectives: usize,
        adaptations: usize,
        error: Option<String>,
        completed_at: DateTime<Utc>,
    },
    PluginLoaded {
        plugin_id: PluginId,
        name: String,
        capabilities: Vec<String>,
        loaded_at: DateTime<Utc>,
    },
    PluginFailed {
        plugin_id: PluginId,
        error: String,
        failed_at: DateTime<Utc>,
    },
    PluginUnloaded {
        plugin_id: PluginId,
        unloaded_at: DateTime<Utc>,
    },
    Discovery(DiscoveryEvent),
}

impl EngineEvent {
    /// Short name used in CLI event streams
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::GapIdentified { .. } => "gap_identified",
            EngineEvent::SkillThresholdCrossed { .. } => "skill_threshold_crossed",
            EngineEvent::AdaptationCreated { .. } => "adaptation_created",
            EngineEvent::CycleCompleted { .. } => "cycle_completed",
            EngineEvent::PluginLoaded { .. } => "plugin_loaded",
            EngineEvent::PluginFailed { .. } => "plugin_failed",
            EngineEvent::PluginUnloaded { .. } => "plugin_unloaded",
            EngineEvent::Discovery(_) => "discovery",
        }
    }
}
