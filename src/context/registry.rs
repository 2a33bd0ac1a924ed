//! Plug-in installation and registry queries

use std::collections::HashSet;
use std::sync::Arc;

use super::state::{ExtPointEntry, ExtensionEntry, PluginRecord};
use super::{Locked, PluginKey};
use crate::descriptor::PluginDescriptor;
use crate::error::{RuntimeError, RuntimeResult};
use crate::events::{PluginEvent, PluginState, Severity};
use crate::info::{ExtensionInfo, ExtensionPointInfo, Info};

impl Locked<'_> {
    pub(super) fn install_plugin(&self, descriptor: PluginDescriptor) -> RuntimeResult<()> {
        let id = descriptor.identifier.clone();
        {
            let state = self.state();
            if state.plugins.contains_key(&id) {
                return Err(RuntimeError::conflict(format!("plug-in {} is already installed", id)));
            }
            let mut seen = HashSet::new();
            for point in &descriptor.ext_points {
                if state.ext_points.contains_key(&point.global_id) || !seen.insert(&point.global_id) {
                    return Err(RuntimeError::conflict(format!(
                        "extension point {} of plug-in {} is already registered",
                        point.global_id, id
                    )));
                }
            }
        }

        let descriptor = Arc::new(descriptor);
        {
            let mut state = self.state_mut();
            let key = state.allocate_key();
            for (index, point) in descriptor.ext_points.iter().enumerate() {
                state
                    .ext_points
                    .insert(point.global_id.clone(), ExtPointEntry { plugin: key, index });
            }
            for (index, extension) in descriptor.extensions.iter().enumerate() {
                state
                    .extensions
                    .entry(extension.ext_point_id.clone())
                    .or_default()
                    .push(ExtensionEntry { plugin: key, index });
            }
            state.plugins.insert(id.clone(), key);
            state.records.insert(key, PluginRecord::new(descriptor));
        }

        self.emit(PluginEvent {
            plugin_id: id.clone(),
            old_state: PluginState::Uninstalled,
            new_state: PluginState::Installed,
        });
        self.log_with(Severity::Info, || format!("plug-in {} installed", id));
        Ok(())
    }

    pub(super) fn uninstall_plugin(&self, key: PluginKey) {
        self.stop_plugin(key);
        self.unresolve_plugin(key);

        let id = {
            let mut state = self.state_mut();
            state.clear_imports(key);
            let importing = std::mem::take(&mut state.record_mut(key).importing);
            for other in importing {
                state.remove_edge(other, key);
            }
            state.ext_points.retain(|_, entry| entry.plugin != key);
            state.extensions.retain(|_, entries| {
                entries.retain(|entry| entry.plugin != key);
                !entries.is_empty()
            });
            let record = state.records.remove(&key);
            let id = record.map(|record| record.id().to_string()).unwrap_or_default();
            state.plugins.remove(&id);
            id
        };

        self.emit(PluginEvent {
            plugin_id: id.clone(),
            old_state: PluginState::Installed,
            new_state: PluginState::Uninstalled,
        });
        self.log_with(Severity::Info, || format!("plug-in {} uninstalled", id));
    }

    /// Stop everything, then uninstall in installation order
    pub(super) fn uninstall_all(&self) {
        self.stop_all();
        let keys: Vec<PluginKey> = self.state().records.keys().copied().collect();
        for key in keys {
            if self.state().contains(key) {
                self.uninstall_plugin(key);
            }
        }
    }

    pub(super) fn plugin_info(&self, key: PluginKey) -> Info<PluginDescriptor> {
        let descriptor = Arc::clone(&self.state().record(key).descriptor);
        Info::new(&self.inner.framework, descriptor)
    }

    pub(super) fn plugins_info(&self) -> Info<Vec<Arc<PluginDescriptor>>> {
        let descriptors = self
            .state()
            .records
            .values()
            .map(|record| Arc::clone(&record.descriptor))
            .collect();
        Info::new(&self.inner.framework, Arc::new(descriptors))
    }

    pub(super) fn extension_points_info(&self) -> Info<Vec<ExtensionPointInfo>> {
        let points = {
            let state = self.state();
            let mut entries: Vec<&ExtPointEntry> = state.ext_points.values().collect();
            entries.sort_by_key(|entry| (entry.plugin, entry.index));
            let points: Vec<ExtensionPointInfo> = entries
                .into_iter()
                .map(|entry| {
                    ExtensionPointInfo::new(Arc::clone(&state.record(entry.plugin).descriptor), entry.index)
                })
                .collect();
            points
        };
        Info::new(&self.inner.framework, Arc::new(points))
    }

    pub(super) fn extensions_info(&self, ext_point_id: Option<&str>) -> Info<Vec<ExtensionInfo>> {
        let extensions = {
            let state = self.state();
            let mut entries: Vec<&ExtensionEntry> = match ext_point_id {
                Some(point) => state.extensions.get(point).into_iter().flatten().collect(),
                None => state.extensions.values().flatten().collect(),
            };
            entries.sort_by_key(|entry| (entry.plugin, entry.index));
            let extensions: Vec<ExtensionInfo> = entries
                .into_iter()
                .map(|entry| {
                    ExtensionInfo::new(Arc::clone(&state.record(entry.plugin).descriptor), entry.index)
                })
                .collect();
            extensions
        };
        Info::new(&self.inner.framework, Arc::new(extensions))
    }
}
