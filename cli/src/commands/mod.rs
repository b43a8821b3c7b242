// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for NIGHTFRAME CLI

pub mod capabilities;
pub mod config;
pub mod discover;
pub mod engine;
pub mod plugins;

pub use self::capabilities::CapabilityCommand;
pub use self::config::ConfigCommand;
pub use self::plugins::PluginsCommand;
