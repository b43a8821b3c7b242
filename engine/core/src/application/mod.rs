// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mod
//!
//! Provides mod functionality for the system.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Implements mod

pub mod callbacks;
pub mod capability_store;
pub mod engine;
pub mod learning_loop;
pub mod learning_loop_runner;
pub mod plugin_loader;
pub mod plugin_registry;
pub mod scheduler;

pub use capability_store::{CapabilityStore, ThresholdCrossing, SKILL_THRESHOLD};
pub use engine::{Engine, EngineError, EngineStatus};
pub use learning_loop::{LearningLoop, LearningLoopError, LoopStats, TrainingCycleReport};
pub use learning_loop_runner::{LearningLoopRunner, RunnerConfig};
pub use plugin_loader::PluginLoader;
pub use plugin_registry::{PluginRegistry, PluginSlot};
pub use scheduler::{CycleError, MetacognitiveScheduler};
