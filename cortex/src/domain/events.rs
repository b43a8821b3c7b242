// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::skill::{SkillId, SkillStatus};

/// Events emitted by the discovery pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DiscoveryEvent {
    PatternsAnalyzed {
        domain: String,
        clusters: usize,
        novel: usize,
        analyzed_at: DateTime<Utc>,
    },
    CandidateProposed {
        skill_id: SkillId,
        name: String,
        domain: String,
        utility_score: f64,
    },
    SkillStatusChanged {
        skill_id: SkillId,
        name: String,
        from: SkillStatus,
        to: SkillStatus,
        changed_at: DateTime<Utc>,
    },
}
