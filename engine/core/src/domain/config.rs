// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Engine Configuration Types
//
// Defines the configuration schema for a NIGHTFRAME engine, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Storage backend selection (sled or in-memory)
// - Plugin directory and shared plugin config
// - Scheduler cadence and autonomous mode
// - Discovery tuning and persistence retry policy
// - Observability settings

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use nightframe_cortex::DiscoveryConfig;

use crate::domain::capability::CapabilityDomain;

pub const API_VERSION: &str = "nightframe.ai/v1";
pub const KIND: &str = "EngineConfig";

/// Top-level Kubernetes-style engine configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfigManifest {
    /// API version (must be "nightframe.ai/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "EngineConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: EngineConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable engine name
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfigSpec {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub plugins: PluginsConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub discovery: DiscoverySettings,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    Sled,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackendKind,

    /// sled database directory
    #[serde(default = "default_data_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Directory scanned for `*.yaml` / `*.yml` plugin manifests
    #[serde(default = "default_plugin_dir")]
    pub directory: PathBuf,

    /// Passed to every plugin; manifest config wins on key collisions
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between training cycles in continuous mode
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,

    /// Stop after this many cycles (unbounded when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cycles: Option<u64>,

    /// Generate, deploy and load skills without operator action
    #[serde(default = "default_true")]
    pub autonomous: bool,

    /// Pause after a failed cycle before the next attempt
    #[serde(default = "default_error_backoff")]
    pub error_backoff_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    #[serde(default = "default_max_clusters")]
    pub max_clusters: usize,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Skills scoring strictly above this are registered
    #[serde(default = "default_utility_threshold")]
    pub utility_threshold: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// Domains analyzed for every feature batch
    #[serde(default = "default_discovery_domains")]
    pub domains: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_true() -> bool {
    true
}

fn default_backend() -> StorageBackendKind {
    StorageBackendKind::Sled
}

fn default_data_path() -> PathBuf {
    PathBuf::from("./data/nightframe")
}

fn default_plugin_dir() -> PathBuf {
    PathBuf::from("./plugins")
}

fn default_interval() -> u64 {
    60
}

fn default_error_backoff() -> u64 {
    10
}

fn default_min_samples() -> usize {
    10
}

fn default_max_clusters() -> usize {
    5
}

fn default_max_iterations() -> usize {
    20
}

fn default_utility_threshold() -> f64 {
    0.5
}

fn default_discovery_domains() -> Vec<String> {
    vec![
        CapabilityDomain::Lte.to_string(),
        CapabilityDomain::NewRadio.to_string(),
        CapabilityDomain::NetworkHandover.to_string(),
        CapabilityDomain::WifiAccessPoint.to_string(),
    ]
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_data_path(),
        }
    }
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            directory: default_plugin_dir(),
            config: BTreeMap::new(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval(),
            max_cycles: None,
            autonomous: true,
            error_backoff_seconds: default_error_backoff(),
        }
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            min_samples: default_min_samples(),
            max_clusters: default_max_clusters(),
            max_iterations: default_max_iterations(),
            utility_threshold: default_utility_threshold(),
            seed: None,
            domains: default_discovery_domains(),
        }
    }
}

impl DiscoverySettings {
    pub fn to_discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            min_samples: self.min_samples,
            max_clusters: self.max_clusters,
            max_iterations: self.max_iterations,
            seed: self.seed,
        }
    }

    /// Configured domains that name a known capability domain.
    pub fn parsed_domains(&self) -> Vec<CapabilityDomain> {
        self.domains.iter().filter_map(|d| d.parse().ok()).collect()
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for EngineConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "nightframe-engine".to_string(),
                version: None,
                labels: HashMap::new(),
            },
            spec: EngineConfigSpec::default(),
        }
    }
}

/// Parse a boolean environment value
fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl EngineConfigManifest {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    /// Write the manifest with every default spelled out
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Candidate config locations in precedence order
    /// 1. NIGHTFRAME_CONFIG_PATH environment variable
    /// 2. ./nightframe-config.yaml (working directory)
    /// 3. ~/.nightframe/config.yaml (user home)
    /// 4. /etc/nightframe/config.yaml (system)
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(path) = std::env::var("NIGHTFRAME_CONFIG_PATH") {
            paths.push(PathBuf::from(path));
        }
        paths.push(PathBuf::from("./nightframe-config.yaml"));
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".nightframe").join("config.yaml"));
        }
        paths.push(PathBuf::from("/etc/nightframe/config.yaml"));
        paths
    }

    /// First existing path from [`Self::search_paths`]
    pub fn discover_config() -> Option<PathBuf> {
        Self::search_paths().into_iter().find(|path| path.exists())
    }

    /// Explicit path, then [`Self::discover_config`], then defaults.
    /// Environment overrides apply on top of whichever wins.
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // An explicit path must exist and parse
        let mut config = match cli_path.or_else(Self::discover_config) {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading engine configuration");
                Self::from_yaml_file(&path)?
            }
            None => {
                tracing::warn!("No engine configuration found, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// `NIGHTFRAME_*` overrides; unparseable values are logged and ignored
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("NIGHTFRAME_DATA_DIR") {
            tracing::info!("Environment override: NIGHTFRAME_DATA_DIR={}", val);
            self.spec.storage.path = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("NIGHTFRAME_PLUGIN_DIR") {
            tracing::info!("Environment override: NIGHTFRAME_PLUGIN_DIR={}", val);
            self.spec.plugins.directory = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("NIGHTFRAME_STORAGE_BACKEND") {
            match val.to_lowercase().as_str() {
                "sled" => self.spec.storage.backend = StorageBackendKind::Sled,
                "memory" => self.spec.storage.backend = StorageBackendKind::Memory,
                _ => tracing::warn!(
                    "Invalid value for NIGHTFRAME_STORAGE_BACKEND: '{}'. Expected sled/memory. Ignoring.",
                    val
                ),
            }
        }

        if let Ok(val) = std::env::var("NIGHTFRAME_AUTONOMOUS") {
            match parse_bool(&val) {
                Some(autonomous) => {
                    tracing::info!("Environment override: NIGHTFRAME_AUTONOMOUS={}", autonomous);
                    self.spec.scheduler.autonomous = autonomous;
                }
                None => tracing::warn!(
                    "Invalid value for NIGHTFRAME_AUTONOMOUS: '{}'. Expected true/false. Ignoring.",
                    val
                ),
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.scheduler.interval_seconds == 0 {
            anyhow::bail!("spec.scheduler.interval_seconds must be greater than zero");
        }

        let discovery = &self.spec.discovery;
        if discovery.min_samples < 2 {
            anyhow::bail!("spec.discovery.min_samples must be at least 2");
        }
        if discovery.max_clusters < 2 {
            anyhow::bail!("spec.discovery.max_clusters must be at least 2");
        }
        if discovery.max_iterations == 0 {
            anyhow::bail!("spec.discovery.max_iterations must be greater than zero");
        }
        if !(0.0..=1.0).contains(&discovery.utility_threshold) {
            anyhow::bail!(
                "spec.discovery.utility_threshold must be within [0, 1], got {}",
                discovery.utility_threshold
            );
        }
        for domain in &discovery.domains {
            if domain.parse::<CapabilityDomain>().is_err() {
                anyhow::bail!("Unknown discovery domain: '{}'", domain);
            }
        }

        if self.spec.persistence.max_attempts == 0 {
            anyhow::bail!("spec.persistence.max_attempts must be at least 1");
        }

        match self.spec.observability.log_format.as_str() {
            "text" | "json" => {}
            other => anyhow::bail!("Invalid log format: '{}'. Must be 'text' or 'json'", other),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = EngineConfigManifest::default();
        assert_eq!(manifest.api_version, API_VERSION);
        assert_eq!(manifest.kind, KIND);
        assert_eq!(manifest.spec.storage.backend, StorageBackendKind::Sled);
        assert_eq!(manifest.spec.discovery.min_samples, 10);
        assert!(manifest.spec.scheduler.autonomous);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_yaml_with_partial_spec() {
        let yaml = r#"
apiVersion: nightframe.ai/v1
kind: EngineConfig
metadata:
  name: edge-node-7
spec:
  storage:
    backend: memory
  plugins:
    directory: /opt/nightframe/plugins
    config:
      region: eu-west
  discovery:
    seed: 99
    domains: [5g_nr, mesh_routing]
"#;
        let manifest = EngineConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(manifest.metadata.name, "edge-node-7");
        assert_eq!(manifest.spec.storage.backend, StorageBackendKind::Memory);
        assert_eq!(manifest.spec.storage.path, PathBuf::from("./data/nightframe"));
        assert_eq!(manifest.spec.plugins.config["region"], serde_json::json!("eu-west"));
        assert_eq!(manifest.spec.discovery.seed, Some(99));
        assert_eq!(
            manifest.spec.discovery.parsed_domains(),
            vec![CapabilityDomain::NewRadio, CapabilityDomain::MeshRouting]
        );
        assert_eq!(manifest.spec.scheduler.interval_seconds, 60);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut manifest = EngineConfigManifest::default();
        manifest.api_version = "v2".into();
        assert!(manifest.validate().is_err());

        let mut manifest = EngineConfigManifest::default();
        manifest.spec.discovery.utility_threshold = 1.5;
        assert!(manifest.validate().is_err());

        let mut manifest = EngineConfigManifest::default();
        manifest.spec.discovery.domains.push("6g_thz".into());
        assert!(manifest.validate().is_err());

        let mut manifest = EngineConfigManifest::default();
        manifest.spec.scheduler.interval_seconds = 0;
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.yaml");
        let err = EngineConfigManifest::load_or_default(Some(missing)).unwrap_err();
        assert!(format!("{:#}", err).contains("absent.yaml"));
    }

    #[test]
    fn test_written_manifest_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nightframe-config.yaml");
        let mut manifest = EngineConfigManifest::default();
        manifest.spec.scheduler.max_cycles = Some(12);
        manifest.to_yaml_file(&path).unwrap();

        let loaded = EngineConfigManifest::from_yaml_file(&path).unwrap();
        assert_eq!(loaded.spec.scheduler.max_cycles, Some(12));
        assert_eq!(loaded.metadata.name, manifest.metadata.name);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
