// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository abstractions defined in
//! the domain layer.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve engine aggregates
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! ## sled
//!
//! - **SledStore** - one tree per table, JSON-encoded values
//!
//! ## In-Memory
//!
//! - **InMemoryStore** - HashMap-backed storage for tests and development
//!
//! Both implement every engine repository trait plus the cortex
//! `SkillRepository`, so one store instance backs the whole engine.

pub mod in_memory;
pub mod sled_store;

pub use in_memory::InMemoryStore;
pub use sled_store::SledStore;
