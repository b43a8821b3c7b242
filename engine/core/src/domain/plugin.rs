// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Skill Plugins
//!
//! Contracts for hot-loadable capability modules. A module file is a YAML
//! plugin manifest (`<id>.yaml`) naming the runtime that provides the skill
//! instance: a compiled-in factory, or a child process speaking
//! line-delimited JSON. Every runtime produces a [`SkillPlugin`].
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Defines plugin records, the skill interface and the runtime seam

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::domain::repository::RepositoryError;

/// Number of hex characters kept from a module file's SHA-256 digest.
pub const CHECKSUM_LEN: usize = 16;

/// Content checksum used to detect changed module files.
pub fn checksum(bytes: &[u8]) -> String {
    let mut hex = hex::encode(Sha256::digest(bytes));
    hex.truncate(CHECKSUM_LEN);
    hex
}

/// Plugin identifier: the module file stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginId(String);

impl PluginId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the id from a module path, `None` if it has no usable stem.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.file_stem()
            .and_then(|stem| stem.to_str())
            .filter(|stem| !stem.is_empty())
            .map(Self::new)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginStatus {
    Discovered,
    Loading,
    Active,
    Error,
    Disabled,
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PluginStatus::Discovered => "discovered",
            PluginStatus::Loading => "loading",
            PluginStatus::Active => "active",
            PluginStatus::Error => "error",
            PluginStatus::Disabled => "disabled",
        };
        f.write_str(name)
    }
}

/// Registry record for one module. The runtime instance lives separately in
/// the registry's instance slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub id: PluginId,
    pub name: String,
    pub version: String,
    pub capabilities: Vec<String>,
    pub artifact_path: PathBuf,
    pub status: PluginStatus,
    pub load_count: u32,
    pub execution_count: u64,
    pub error_count: u64,
    pub last_loaded: Option<DateTime<Utc>>,
    pub last_executed: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// `None` for failed loads so the file is picked up again by discovery
    pub checksum: Option<String>,
}

impl PluginInfo {
    pub fn failed(id: PluginId, path: &Path, error: impl Into<String>) -> Self {
        Self {
            name: id.to_string(),
            id,
            version: "unknown".to_string(),
            capabilities: Vec::new(),
            artifact_path: path.to_path_buf(),
            status: PluginStatus::Error,
            load_count: 0,
            execution_count: 0,
            error_count: 1,
            last_loaded: None,
            last_executed: None,
            last_error: Some(error.into()),
            checksum: None,
        }
    }
}

/// Execution entry points, in dispatch priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPoint {
    Predict,
    AnalyzeState,
    Execute,
}

impl EntryPoint {
    pub const DISPATCH_ORDER: [EntryPoint; 3] =
        [EntryPoint::Predict, EntryPoint::AnalyzeState, EntryPoint::Execute];

    /// First entry point in dispatch order that the plugin exposes.
    pub fn select(exposed: &[EntryPoint]) -> Option<EntryPoint> {
        Self::DISPATCH_ORDER
            .iter()
            .copied()
            .find(|entry| exposed.contains(entry))
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryPoint::Predict => "predict",
            EntryPoint::AnalyzeState => "analyze_state",
            EntryPoint::Execute => "execute",
        };
        f.write_str(name)
    }
}

/// Handed to a plugin on initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginContext {
    pub plugin_id: PluginId,
    pub plugin_dir: PathBuf,
    /// Loader-wide config overlaid with the manifest's own config
    pub config: BTreeMap<String, Value>,
}

/// The closed interface every loaded skill implements.
pub trait SkillPlugin: Send {
    fn initialize(&mut self, context: &PluginContext) -> Result<(), PluginError>;

    /// Capability names this skill provides; read once after initialization.
    fn capabilities(&self) -> Vec<String>;

    fn entry_points(&self) -> Vec<EntryPoint> {
        vec![EntryPoint::Execute]
    }

    fn invoke(&mut self, entry_point: EntryPoint, input: Value) -> Result<Value, PluginError>;

    fn shutdown(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// How a manifest's skill instance is produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PluginRuntimeSpec {
    /// Resolved against the compiled-in factory table
    Builtin { factory: String },
    /// Spawned as a child process; relative commands resolve against the
    /// manifest's directory
    Process {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        /// Reply deadline per request; the default applies when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
}

/// Parsed module file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    pub runtime: PluginRuntimeSpec,
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl PluginManifest {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn to_yaml_string(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Produces skill instances for parsed manifests.
pub trait PluginRuntime: Send + Sync {
    fn instantiate(
        &self,
        id: &PluginId,
        manifest: &PluginManifest,
        manifest_path: &Path,
    ) -> Result<Box<dyn SkillPlugin>, PluginError>;
}

/// Outcome of one plugin within a capability fan-out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub plugin_id: PluginId,
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// Delivered to `on_plugin_error` subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginFailure {
    pub plugin_id: PluginId,
    pub path: PathBuf,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginStats {
    pub total_plugins: usize,
    pub active_plugins: usize,
    pub error_plugins: usize,
    pub total_executions: u64,
    pub total_errors: u64,
    pub capabilities: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("Failed to read module {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("Invalid plugin manifest {path}: {message}")]
    InvalidManifest { path: PathBuf, message: String },

    #[error("No plugin factory registered under '{0}'")]
    MissingFactory(String),

    #[error("Plugin {plugin_id} failed to initialize: {message}")]
    Initialization { plugin_id: PluginId, message: String },

    #[error("Plugin not found: {0}")]
    NotFound(PluginId),

    #[error("Plugin not loaded: {0}")]
    NotLoaded(PluginId),

    #[error("Plugin {plugin_id} is not active (status: {status})")]
    NotActive { plugin_id: PluginId, status: PluginStatus },

    #[error("Plugin {0} exposes no execution entry point")]
    NoEntryPoint(PluginId),

    #[error("Plugin {plugin_id} execution failed: {message}")]
    Execution { plugin_id: PluginId, message: String },

    #[error("Plugin process protocol error: {0}")]
    Protocol(String),

    #[error("Plugin {plugin_id} panicked: {message}")]
    Panicked { plugin_id: PluginId, message: String },

    #[error("Plugin repository error: {0}")]
    Repository(#[from] RepositoryError),
}
