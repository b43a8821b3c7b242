// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # NIGHTFRAME Cortex
//!
//! Pattern clustering, novelty detection and skill candidate proposal.
//!
//! # Architecture
//!
//! - **Layer:** Learning & Memory Layer
//! - **Purpose:** Turns batches of feature vectors into scored skill candidates

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use application::discovery_service::*;
pub use domain::{errors::*, events::*, pattern::*, repository::*, skill::*};
pub use infrastructure::repository::InMemorySkillRepository;
