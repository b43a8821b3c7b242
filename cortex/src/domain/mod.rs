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

pub mod clustering;
pub mod errors;
pub mod events;
pub mod pattern;
pub mod repository;
pub mod skill;

pub use errors::*;
pub use events::*;
pub use pattern::*;
pub use repository::*;
pub use skill::*;
