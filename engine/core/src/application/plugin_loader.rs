// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PluginLoader: Hot Load, Reload, Unload, Execute
//!
//! Manages the module files in one plugin directory. A module file is a YAML
//! plugin manifest; its file stem is the plugin id. Loading reads and
//! checksums the file, asks the [`PluginRuntime`] for a skill instance,
//! initializes it and registers it as ACTIVE.
//!
//! ## Failure isolation
//!
//! A load that fails at any step (unreadable file, bad manifest, unknown
//! factory, failed or panicking initialization) registers an ERROR record
//! with the error text and no instance, notifies `on_plugin_error`, and
//! leaves every other plugin untouched. ERROR records carry no checksum, so
//! the next `discover` picks the file up again.
//!
//! ## Reload vs execute
//!
//! Each loaded plugin lives in its own [`PluginSlot`]. An execution holds the
//! slot's instance lock for the duration of the call; reload and unload take
//! the instance out of the slot before shutting it down, so they wait for an
//! in-flight call and later calls on the old slot report the plugin as not
//! loaded.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Implements the plugin lifecycle over a `PluginRuntime` and `PluginRepository`

use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, ReentrantMutex};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::application::callbacks::Callbacks;
use crate::application::plugin_registry::{PluginRegistry, PluginSlot};
use crate::domain::plugin::{
    checksum, EntryPoint, ExecutionRecord, PluginContext, PluginError, PluginFailure, PluginId,
    PluginInfo, PluginManifest, PluginRuntime, PluginStats, PluginStatus, SkillPlugin,
};
use crate::domain::repository::{PluginRepository, RepositoryError};
use crate::infrastructure::persistence::PersistencePolicy;

const MODULE_EXTENSIONS: [&str; 2] = ["yaml", "yml"];

/// Parsed state of a successfully loaded module file
#[derive(Debug, Clone)]
struct CachedModule {
    checksum: String,
    manifest: PluginManifest,
}

struct LoadedModule {
    manifest: PluginManifest,
    checksum: String,
    instance: Box<dyn SkillPlugin>,
    capabilities: Vec<String>,
    entry_points: Vec<EntryPoint>,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn is_module_file(path: &Path) -> bool {
    let eligible_ext = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| MODULE_EXTENSIONS.contains(&e));
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_none_or(|n| n.starts_with('_') || n.starts_with('.'));
    path.is_file() && eligible_ext && !hidden
}

pub struct PluginLoader {
    plugin_dir: PathBuf,
    plugin_config: BTreeMap<String, Value>,
    registry: Arc<PluginRegistry>,
    runtime: Arc<dyn PluginRuntime>,
    repository: Arc<dyn PluginRepository>,
    policy: PersistencePolicy,
    lock: ReentrantMutex<()>,
    modules: Mutex<HashMap<PluginId, CachedModule>>,
    on_loaded: Callbacks<PluginInfo>,
    on_error: Callbacks<PluginFailure>,
    on_unloaded: Callbacks<PluginId>,
}

impl PluginLoader {
    pub fn new(
        plugin_dir: impl Into<PathBuf>,
        plugin_config: BTreeMap<String, Value>,
        runtime: Arc<dyn PluginRuntime>,
        repository: Arc<dyn PluginRepository>,
        policy: PersistencePolicy,
    ) -> Self {
        let plugin_dir = plugin_dir.into();
        info!(plugin_dir = %plugin_dir.display(), "Plugin loader initialized");
        Self {
            plugin_dir,
            plugin_config,
            registry: Arc::new(PluginRegistry::new()),
            runtime,
            repository,
            policy,
            lock: ReentrantMutex::new(()),
            modules: Mutex::new(HashMap::new()),
            on_loaded: Callbacks::new("plugin_loaded"),
            on_error: Callbacks::new("plugin_error"),
            on_unloaded: Callbacks::new("plugin_unloaded"),
        }
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Module files that are new or changed since they were last loaded.
    pub fn discover(&self) -> Result<Vec<PathBuf>, PluginError> {
        if !self.plugin_dir.exists() {
            debug!(plugin_dir = %self.plugin_dir.display(), "Plugin directory does not exist");
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&self.plugin_dir).map_err(|e| PluginError::Io {
            path: self.plugin_dir.clone(),
            message: e.to_string(),
        })?;

        let mut discovered = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable plugin directory entry");
                    continue;
                }
            };
            if !is_module_file(&path) {
                continue;
            }
            let Some(id) = PluginId::from_path(&path) else {
                continue;
            };

            let stored = self.registry.get(&id).and_then(|info| info.checksum);
            let current = std::fs::read(&path).ok().map(|bytes| checksum(&bytes));
            match (stored, current) {
                (Some(stored), Some(current)) if stored == current => {
                    debug!(plugin_id = %id, "Plugin unchanged");
                }
                _ => discovered.push(path),
            }
        }

        discovered.sort();
        debug!(count = discovered.len(), "Discovered plugins");
        Ok(discovered)
    }

    /// Load (or re-load) one module file.
    pub fn load(&self, path: &Path) -> Result<PluginInfo, PluginError> {
        let _guard = self.lock.lock();
        let id = PluginId::from_path(path).ok_or_else(|| PluginError::InvalidManifest {
            path: path.to_path_buf(),
            message: "module file has no usable name".to_string(),
        })?;
        info!(plugin_id = %id, path = %path.display(), "Loading plugin");

        let previous = self.registry.get(&id);
        if previous.is_some() {
            self.registry.update(&id, |info| info.status = PluginStatus::Loading);
        }
        self.shutdown_slot(&id, "load");

        match self.instantiate(&id, path) {
            Ok(module) => {
                let info = PluginInfo {
                    id: id.clone(),
                    name: module.manifest.name.clone(),
                    version: module.manifest.version.clone(),
                    capabilities: module.capabilities,
                    artifact_path: path.to_path_buf(),
                    status: PluginStatus::Active,
                    load_count: previous.as_ref().map_or(0, |p| p.load_count) + 1,
                    execution_count: previous.as_ref().map_or(0, |p| p.execution_count),
                    error_count: previous.as_ref().map_or(0, |p| p.error_count),
                    last_loaded: Some(Utc::now()),
                    last_executed: previous.as_ref().and_then(|p| p.last_executed),
                    last_error: None,
                    checksum: Some(module.checksum.clone()),
                };

                self.registry.register(info.clone());
                self.registry
                    .attach(&id, PluginSlot::new(module.instance, module.entry_points));
                self.modules.lock().insert(
                    id.clone(),
                    CachedModule {
                        checksum: module.checksum,
                        manifest: module.manifest,
                    },
                );
                self.save(&info);

                metrics::counter!("nightframe_plugin_loads_total").increment(1);
                info!(
                    plugin_id = %id,
                    capabilities = ?info.capabilities,
                    load_count = info.load_count,
                    "Plugin loaded"
                );
                self.on_loaded.emit(&info);
                Ok(info)
            }
            Err(e) => {
                error!(plugin_id = %id, error = %e, "Plugin load failed");
                metrics::counter!("nightframe_plugin_load_failures_total").increment(1);

                let mut info = PluginInfo::failed(id.clone(), path, e.to_string());
                if let Some(previous) = &previous {
                    info.load_count = previous.load_count;
                    info.execution_count = previous.execution_count;
                    info.error_count = previous.error_count + 1;
                    info.last_loaded = previous.last_loaded;
                    info.last_executed = previous.last_executed;
                }
                self.registry.register(info.clone());
                self.modules.lock().remove(&id);
                self.save(&info);

                self.on_error.emit(&PluginFailure {
                    plugin_id: id,
                    path: path.to_path_buf(),
                    error: e.to_string(),
                    failed_at: Utc::now(),
                });
                Err(e)
            }
        }
    }

    fn instantiate(&self, id: &PluginId, path: &Path) -> Result<LoadedModule, PluginError> {
        let bytes = std::fs::read(path).map_err(|e| PluginError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let checksum = checksum(&bytes);

        let text = String::from_utf8(bytes).map_err(|e| PluginError::InvalidManifest {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let manifest = PluginManifest::from_yaml_str(&text).map_err(|e| PluginError::InvalidManifest {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut config = self.plugin_config.clone();
        config.extend(manifest.config.clone());
        let context = PluginContext {
            plugin_id: id.clone(),
            plugin_dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            config,
        };

        let runtime = &self.runtime;
        let setup = catch_unwind(AssertUnwindSafe(|| {
            let mut instance = runtime.instantiate(id, &manifest, path)?;
            instance.initialize(&context).map_err(|e| match e {
                PluginError::Initialization { .. } => e,
                other => PluginError::Initialization {
                    plugin_id: id.clone(),
                    message: other.to_string(),
                },
            })?;
            let capabilities = instance.capabilities();
            let entry_points = instance.entry_points();
            Ok::<_, PluginError>((instance, capabilities, entry_points))
        }));

        let (instance, mut capabilities, entry_points) = match setup {
            Ok(result) => result?,
            Err(payload) => {
                return Err(PluginError::Panicked {
                    plugin_id: id.clone(),
                    message: panic_message(payload.as_ref()),
                })
            }
        };

        let mut seen = HashSet::new();
        capabilities.retain(|c| seen.insert(c.clone()));

        Ok(LoadedModule {
            manifest,
            checksum,
            instance,
            capabilities,
            entry_points,
        })
    }

    /// Shut down and drop the instance in `id`'s slot, if any. Failures are
    /// logged and otherwise ignored.
    fn shutdown_slot(&self, id: &PluginId, reason: &str) {
        let Some(slot) = self.registry.detach(id) else {
            return;
        };
        let Some(mut instance) = slot.take() else {
            return;
        };
        match catch_unwind(AssertUnwindSafe(|| instance.shutdown())) {
            Ok(Ok(())) => debug!(plugin_id = %id, reason, "Plugin instance shut down"),
            Ok(Err(e)) => warn!(plugin_id = %id, reason, error = %e, "Best-effort plugin shutdown failed"),
            Err(payload) => warn!(
                plugin_id = %id,
                reason,
                error = %panic_message(payload.as_ref()),
                "Plugin panicked during shutdown"
            ),
        }
    }

    fn save(&self, info: &PluginInfo) {
        if let Err(e) = self.policy.run("save_plugin", || self.repository.save_plugin(info)) {
            warn!(plugin_id = %info.id, error = %e, "Plugin record kept in memory only");
        }
    }

    /// Discover and load every new or changed module file.
    pub fn load_all(&self) -> BTreeMap<PluginId, bool> {
        let _guard = self.lock.lock();
        let paths = match self.discover() {
            Ok(paths) => paths,
            Err(e) => {
                error!(error = %e, "Plugin discovery failed");
                return BTreeMap::new();
            }
        };

        let mut results = BTreeMap::new();
        for path in paths {
            let Some(id) = PluginId::from_path(&path) else {
                continue;
            };
            results.insert(id, self.load(&path).is_ok());
        }

        let loaded = results.values().filter(|ok| **ok).count();
        info!("Loaded {}/{} plugins", loaded, results.len());
        results
    }

    /// Shut down, evict and load the plugin's module file again.
    pub fn reload(&self, id: &PluginId) -> bool {
        let _guard = self.lock.lock();
        let Some(info) = self.registry.get(id) else {
            warn!(plugin_id = %id, "Cannot reload unknown plugin");
            return false;
        };
        info!(plugin_id = %id, "Reloading plugin");
        self.modules.lock().remove(id);
        self.load(&info.artifact_path).is_ok()
    }

    /// Shut down and remove a plugin. The stored record is kept as DISABLED.
    pub fn unload(&self, id: &PluginId) -> bool {
        let _guard = self.lock.lock();
        // Stop the instance before the record disappears from the index
        self.shutdown_slot(id, "unload");
        let Some((mut info, _)) = self.registry.unregister(id) else {
            warn!(plugin_id = %id, "Cannot unload unknown plugin");
            return false;
        };
        self.modules.lock().remove(id);

        info.status = PluginStatus::Disabled;
        self.save(&info);
        info!(plugin_id = %id, "Plugin unloaded");
        self.on_unloaded.emit(id);
        true
    }

    /// Run a plugin's first exposed entry point on `input`.
    pub fn execute(&self, id: &PluginId, input: Value) -> Result<Value, PluginError> {
        let info = self
            .registry
            .get(id)
            .ok_or_else(|| PluginError::NotFound(id.clone()))?;
        if info.status != PluginStatus::Active {
            return Err(PluginError::NotActive {
                plugin_id: id.clone(),
                status: info.status,
            });
        }
        let slot = self
            .registry
            .slot(id)
            .ok_or_else(|| PluginError::NotLoaded(id.clone()))?;
        let entry_point = EntryPoint::select(&slot.entry_points)
            .ok_or_else(|| PluginError::NoEntryPoint(id.clone()))?;

        let result = {
            let mut instance = slot.instance.lock();
            let Some(plugin) = instance.as_mut() else {
                return Err(PluginError::NotLoaded(id.clone()));
            };
            debug!(plugin_id = %id, entry_point = %entry_point, "Executing plugin");
            match catch_unwind(AssertUnwindSafe(|| plugin.invoke(entry_point, input))) {
                Ok(result) => result,
                Err(payload) => Err(PluginError::Panicked {
                    plugin_id: id.clone(),
                    message: panic_message(payload.as_ref()),
                }),
            }
        };

        match &result {
            Ok(_) => {
                metrics::counter!("nightframe_plugin_executions_total").increment(1);
                self.registry.update(id, |info| {
                    info.execution_count += 1;
                    info.last_executed = Some(Utc::now());
                });
            }
            Err(e) => {
                metrics::counter!("nightframe_plugin_execution_errors_total").increment(1);
                warn!(plugin_id = %id, error = %e, "Plugin execution failed");
                let message = e.to_string();
                self.registry.update(id, |info| {
                    info.error_count += 1;
                    info.last_error = Some(message);
                });
            }
        }
        result
    }

    /// Execute every ACTIVE plugin providing `capability`.
    pub fn execute_capability(&self, capability: &str, input: Value) -> Vec<ExecutionRecord> {
        self.registry
            .get_by_capability(capability)
            .into_iter()
            .filter(|info| info.status == PluginStatus::Active)
            .map(|info| match self.execute(&info.id, input.clone()) {
                Ok(result) => ExecutionRecord {
                    plugin_id: info.id,
                    success: true,
                    result: Some(result),
                    error: None,
                },
                Err(e) => ExecutionRecord {
                    plugin_id: info.id,
                    success: false,
                    result: None,
                    error: Some(e.to_string()),
                },
            })
            .collect()
    }

    /// Parsed manifest of a loaded plugin
    pub fn manifest(&self, id: &PluginId) -> Option<PluginManifest> {
        self.modules.lock().get(id).map(|m| m.manifest.clone())
    }

    /// Checksum the plugin was loaded from
    pub fn loaded_checksum(&self, id: &PluginId) -> Option<String> {
        self.modules.lock().get(id).map(|m| m.checksum.clone())
    }

    pub fn stats(&self) -> PluginStats {
        let plugins = self.registry.all();
        PluginStats {
            total_plugins: plugins.len(),
            active_plugins: plugins.iter().filter(|p| p.status == PluginStatus::Active).count(),
            error_plugins: plugins.iter().filter(|p| p.status == PluginStatus::Error).count(),
            total_executions: plugins.iter().map(|p| p.execution_count).sum(),
            total_errors: plugins.iter().map(|p| p.error_count).sum(),
            capabilities: self.registry.capabilities(),
        }
    }

    /// Write every registry record, including execution counters.
    pub fn persist_all(&self) -> Result<(), RepositoryError> {
        let _guard = self.lock.lock();
        for info in self.registry.all() {
            self.policy
                .run("save_plugin", || self.repository.save_plugin(&info))?;
        }
        Ok(())
    }

    /// Stored plugin records, including unloaded ones
    pub fn history(&self) -> Result<Vec<PluginInfo>, RepositoryError> {
        self.repository.list_plugins()
    }

    /// Shut down every loaded instance. Records stay registered.
    pub fn shutdown(&self) {
        let _guard = self.lock.lock();
        for info in self.registry.all() {
            self.shutdown_slot(&info.id, "shutdown");
            if info.status == PluginStatus::Active {
                self.registry.update(&info.id, |i| i.status = PluginStatus::Disabled);
            }
        }
    }

    pub fn on_plugin_loaded<F>(&self, handler: F)
    where
        F: Fn(&PluginInfo) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_loaded.subscribe(handler);
    }

    pub fn on_plugin_error<F>(&self, handler: F)
    where
        F: Fn(&PluginFailure) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_error.subscribe(handler);
    }

    pub fn on_plugin_unloaded<F>(&self, handler: F)
    where
        F: Fn(&PluginId) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_unloaded.subscribe(handler);
    }
}
