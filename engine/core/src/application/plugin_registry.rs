// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory plugin index.
//!
//! Holds one [`PluginInfo`] per plugin id, the capability → plugin index and
//! the instance slot of every loaded plugin. Records are overwritten by id;
//! the capability index is rebuilt for the id on every overwrite.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};

use crate::domain::plugin::{EntryPoint, PluginId, PluginInfo, PluginStatus, SkillPlugin};

/// A loaded skill instance. Executions hold `instance` for their duration,
/// so shutting an instance down waits for in-flight calls on it.
pub struct PluginSlot {
    pub instance: Mutex<Option<Box<dyn SkillPlugin>>>,
    pub entry_points: Vec<EntryPoint>,
}

impl PluginSlot {
    pub fn new(instance: Box<dyn SkillPlugin>, entry_points: Vec<EntryPoint>) -> Self {
        Self {
            instance: Mutex::new(Some(instance)),
            entry_points,
        }
    }

    /// Take the instance out of the slot, waiting for any running call
    pub fn take(&self) -> Option<Box<dyn SkillPlugin>> {
        self.instance.lock().take()
    }
}

#[derive(Default)]
struct RegistryState {
    plugins: HashMap<PluginId, PluginInfo>,
    by_capability: BTreeMap<String, Vec<PluginId>>,
    slots: HashMap<PluginId, Arc<PluginSlot>>,
}

impl RegistryState {
    fn unindex(&mut self, id: &PluginId) {
        for ids in self.by_capability.values_mut() {
            ids.retain(|existing| existing != id);
        }
        self.by_capability.retain(|_, ids| !ids.is_empty());
    }
}

#[derive(Default)]
pub struct PluginRegistry {
    state: ReentrantMutex<RefCell<RegistryState>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a record and index its capabilities.
    pub fn register(&self, info: PluginInfo) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.unindex(&info.id);
        for capability in &info.capabilities {
            let ids = state.by_capability.entry(capability.clone()).or_default();
            if !ids.contains(&info.id) {
                ids.push(info.id.clone());
            }
        }
        state.plugins.insert(info.id.clone(), info);
    }

    /// Remove a record, its capability entries and its slot.
    pub fn unregister(&self, id: &PluginId) -> Option<(PluginInfo, Option<Arc<PluginSlot>>)> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let info = state.plugins.remove(id)?;
        state.unindex(id);
        let slot = state.slots.remove(id);
        Some((info, slot))
    }

    pub fn attach(&self, id: &PluginId, slot: PluginSlot) -> Arc<PluginSlot> {
        let slot = Arc::new(slot);
        let guard = self.state.lock();
        guard.borrow_mut().slots.insert(id.clone(), slot.clone());
        slot
    }

    pub fn detach(&self, id: &PluginId) -> Option<Arc<PluginSlot>> {
        let guard = self.state.lock();
        let slot = guard.borrow_mut().slots.remove(id);
        slot
    }

    pub fn slot(&self, id: &PluginId) -> Option<Arc<PluginSlot>> {
        let guard = self.state.lock();
        let slot = guard.borrow().slots.get(id).cloned();
        slot
    }

    pub fn get(&self, id: &PluginId) -> Option<PluginInfo> {
        let guard = self.state.lock();
        let info = guard.borrow().plugins.get(id).cloned();
        info
    }

    /// Plugins indexed under `capability`, skipping ids with no record.
    pub fn get_by_capability(&self, capability: &str) -> Vec<PluginInfo> {
        let guard = self.state.lock();
        let state = guard.borrow();
        state
            .by_capability
            .get(capability)
            .map(|ids| ids.iter().filter_map(|id| state.plugins.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// Apply `change` to a record in place. Returns the updated record.
    pub fn update(&self, id: &PluginId, change: impl FnOnce(&mut PluginInfo)) -> Option<PluginInfo> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let info = state.plugins.get_mut(id)?;
        change(info);
        Some(info.clone())
    }

    pub fn active_plugins(&self) -> Vec<PluginInfo> {
        self.filtered(|info| info.status == PluginStatus::Active)
    }

    /// Every record, sorted by id
    pub fn all(&self) -> Vec<PluginInfo> {
        self.filtered(|_| true)
    }

    /// Indexed capability names
    pub fn capabilities(&self) -> Vec<String> {
        let guard = self.state.lock();
        let capabilities = guard.borrow().by_capability.keys().cloned().collect();
        capabilities
    }

    pub fn len(&self) -> usize {
        let guard = self.state.lock();
        let len = guard.borrow().plugins.len();
        len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn filtered(&self, predicate: impl Fn(&PluginInfo) -> bool) -> Vec<PluginInfo> {
        let guard = self.state.lock();
        let state = guard.borrow();
        let mut plugins: Vec<PluginInfo> =
            state.plugins.values().filter(|p| predicate(p)).cloned().collect();
        plugins.sort_by(|a, b| a.id.cmp(&b.id));
        plugins
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn active(id: &str, capabilities: &[&str]) -> PluginInfo {
        let mut info = PluginInfo::failed(PluginId::new(id), Path::new("/plugins/x.yaml"), "");
        info.status = PluginStatus::Active;
        info.last_error = None;
        info.error_count = 0;
        info.capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        info
    }

    #[test]
    fn test_unregister_prunes_every_capability() {
        let registry = PluginRegistry::new();
        registry.register(active("p1", &["a", "b", "a"]));
        registry.register(active("p2", &["b"]));
        assert_eq!(registry.get_by_capability("a").len(), 1);
        assert_eq!(registry.get_by_capability("b").len(), 2);

        let (info, slot) = registry.unregister(&PluginId::new("p1")).unwrap();
        assert_eq!(info.id.as_str(), "p1");
        assert!(slot.is_none());
        assert!(registry.get_by_capability("a").is_empty());
        let remaining: Vec<String> = registry
            .get_by_capability("b")
            .into_iter()
            .map(|p| p.id.to_string())
            .collect();
        assert_eq!(remaining, vec!["p2".to_string()]);
        assert_eq!(registry.capabilities(), vec!["b".to_string()]);
    }

    #[test]
    fn test_overwrite_reindexes_capabilities() {
        let registry = PluginRegistry::new();
        registry.register(active("p1", &["a"]));
        registry.register(active("p1", &["c"]));

        assert!(registry.get_by_capability("a").is_empty());
        assert_eq!(registry.get_by_capability("c").len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_update_in_place() {
        let registry = PluginRegistry::new();
        registry.register(active("p1", &["a"]));
        let updated = registry
            .update(&PluginId::new("p1"), |info| info.execution_count += 2)
            .unwrap();
        assert_eq!(updated.execution_count, 2);
        assert!(registry.update(&PluginId::new("missing"), |_| {}).is_none());
        assert_eq!(registry.active_plugins().len(), 1);
    }
}
