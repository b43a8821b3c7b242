// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::repository::RepositoryError;
use crate::domain::skill::{SkillId, SkillStatus};

/// Errors raised by the discovery pipeline.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Feature matrix is ragged: row {row} has {found} columns, expected {expected}")]
    RaggedFeatures {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Feature matrix has no columns")]
    EmptyFeatures,

    #[error("Non-finite feature value at row {row}, column {column}")]
    NonFiniteFeature { row: usize, column: usize },

    #[error("Label count {labels} does not match sample count {samples}")]
    LabelMismatch { samples: usize, labels: usize },

    #[error("Skill not found: {0}")]
    SkillNotFound(SkillId),

    #[error("Invalid status transition for skill {id}: {from} -> {to}")]
    InvalidTransition {
        id: SkillId,
        from: SkillStatus,
        to: SkillStatus,
    },

    #[error("Skill repository error: {0}")]
    Repository(#[from] RepositoryError),
}
