// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mod
//!
//! Provides mod functionality for the system.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements mod

pub mod builtin;
pub mod pattern_skill;
pub mod process;

pub use builtin::{BuiltinFactories, DefaultPluginRuntime, PluginFactory, PATTERN_SKILL_FACTORY};
pub use pattern_skill::PatternSkillPlugin;
pub use process::ProcessPlugin;
