// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Compiled-in plugin factories and the default runtime.
//!
//! A `builtin` manifest names a factory; a `process` manifest names a command
//! that is spawned as a child process. Relative commands resolve against the
//! manifest's directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::plugin::{
    PluginError, PluginId, PluginManifest, PluginRuntime, PluginRuntimeSpec, SkillPlugin,
};
use crate::infrastructure::plugins::pattern_skill::PatternSkillPlugin;
use crate::infrastructure::plugins::process::ProcessPlugin;

pub type PluginFactory = Arc<dyn Fn() -> Box<dyn SkillPlugin> + Send + Sync>;

/// Factory name used by generated skill manifests
pub const PATTERN_SKILL_FACTORY: &str = "pattern_skill";

#[derive(Clone, Default)]
pub struct BuiltinFactories {
    factories: BTreeMap<String, PluginFactory>,
}

impl BuiltinFactories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factories shipped with the engine
    pub fn with_defaults() -> Self {
        let mut factories = Self::new();
        factories.register(PATTERN_SKILL_FACTORY, || Box::new(PatternSkillPlugin::new()));
        factories
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn SkillPlugin> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn SkillPlugin>> {
        self.factories.get(name).map(|factory| factory())
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

#[derive(Clone)]
pub struct DefaultPluginRuntime {
    factories: BuiltinFactories,
}

impl DefaultPluginRuntime {
    pub fn new(factories: BuiltinFactories) -> Self {
        Self { factories }
    }
}

impl Default for DefaultPluginRuntime {
    fn default() -> Self {
        Self::new(BuiltinFactories::with_defaults())
    }
}

fn resolve_command(command: &str, manifest_path: &Path) -> PathBuf {
    let path = Path::new(command);
    let relative = path.is_relative() && path.components().count() > 1;
    match (relative, manifest_path.parent()) {
        (true, Some(dir)) => dir.join(path),
        _ => path.to_path_buf(),
    }
}

impl PluginRuntime for DefaultPluginRuntime {
    fn instantiate(
        &self,
        id: &PluginId,
        manifest: &PluginManifest,
        manifest_path: &Path,
    ) -> Result<Box<dyn SkillPlugin>, PluginError> {
        match &manifest.runtime {
            PluginRuntimeSpec::Builtin { factory } => self
                .factories
                .create(factory)
                .ok_or_else(|| PluginError::MissingFactory(factory.clone())),
            PluginRuntimeSpec::Process {
                command,
                args,
                env,
                timeout_ms,
            } => {
                let mut plugin = ProcessPlugin::new(
                    id.clone(),
                    resolve_command(command, manifest_path),
                    args.clone(),
                    env.clone(),
                );
                if let Some(ms) = timeout_ms {
                    plugin = plugin.with_timeout(Duration::from_millis(*ms));
                }
                Ok(Box::new(plugin))
            }
        }
    }
}
