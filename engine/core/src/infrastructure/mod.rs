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

pub mod codegen;
pub mod event_bus;
pub mod persistence;
pub mod plugins;
pub mod repositories;
pub mod synthetic;
pub mod trainer;
