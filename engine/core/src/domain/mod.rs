// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mod
//!
//! Provides mod functionality for the system.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Implements mod

pub mod capability;
pub mod metacognition;
pub mod plugin;
pub mod events;
pub mod config;
pub mod repository;
pub mod collaborators;
