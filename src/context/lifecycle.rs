//! Start and stop
//!
//! Starting a plug-in starts everything it imports first; stopping one stops
//! everything importing it first. Both walks tolerate import cycles.

use std::sync::Arc;

use super::{CallbackKind, Locked, PluginContext, PluginKey};
use crate::error::{RuntimeError, RuntimeResult};
use crate::events::{PluginState, Severity};
use crate::fatal::fatal;
use crate::loader::EntryPoints;

impl Locked<'_> {
    pub(super) fn start_by_id(&self, id: &str) -> RuntimeResult<()> {
        let key = self.state().lookup(id);
        match key {
            Some(key) => self.start_plugin(key),
            None => Err(RuntimeError::unknown_plugin(id)),
        }
    }

    pub(super) fn start_plugin(&self, key: PluginKey) -> RuntimeResult<()> {
        self.resolve_plugin(key)?;
        self.start_rec(key)
    }

    fn start_rec(&self, key: PluginKey) -> RuntimeResult<()> {
        let current = self.state().state_of(key);
        match current {
            PluginState::Active => return Ok(()),
            PluginState::Starting => {
                let id = self.plugin_name(key);
                self.log_message(
                    Severity::Warning,
                    &format!("detected a circular start of plug-in {}; it may be used before it is active", id),
                    None,
                );
                return Ok(());
            }
            _ => {}
        }
        // re-entry from an import cycle or from one of the plug-in's own entry points
        if self.state().starting.contains(&key) {
            return Ok(());
        }

        self.state_mut().starting.push(key);
        let result = self.start_imports_then_self(key);
        self.state_mut().starting.retain(|starting| *starting != key);
        result
    }

    fn start_imports_then_self(&self, key: PluginKey) -> RuntimeResult<()> {
        let imported = self.state().record(key).imported.clone();
        for target in imported {
            if self.state().contains(target) && self.state().state_of(target) < PluginState::Active {
                self.start_rec(target)?;
            }
        }
        // an import may have started this plug-in from one of its entry points
        if self.state().state_of(key) != PluginState::Resolved {
            return Ok(());
        }
        self.start_single(key)
    }

    fn start_single(&self, key: PluginKey) -> RuntimeResult<()> {
        let (id, runtime) = {
            let state = self.state();
            let record = state.record(key);
            (record.id().to_string(), record.runtime.clone())
        };

        let Some(runtime) = runtime else {
            self.state_mut().started.push(key);
            self.transition(key, PluginState::Active);
            return Ok(());
        };

        let points = runtime.entry_points();
        if points.contains(EntryPoints::START) {
            self.transition(key, PluginState::Starting);
        }

        let handle = PluginContext {
            inner: Arc::clone(self.inner),
            requester: Some(key),
        };
        let created = {
            let _scope = self.enter(CallbackKind::START);
            runtime.create(&handle)
        };
        drop(handle);

        let Some(mut instance) = created else {
            self.release_plugin_symbols(key);
            if self.state().state_of(key) == PluginState::Starting {
                self.transition(key, PluginState::Stopping);
                self.transition(key, PluginState::Resolved);
            }
            return Err(RuntimeError::resource(format!(
                "plug-in {} could not create its runtime instance",
                id
            )));
        };

        if points.contains(EntryPoints::START) {
            let started = {
                let _scope = self.enter(CallbackKind::START);
                runtime.start(&mut instance)
            };
            if let Err(err) = started {
                self.transition(key, PluginState::Stopping);
                {
                    let _scope = self.enter(CallbackKind::STOP);
                    if points.contains(EntryPoints::STOP) {
                        runtime.stop(&mut instance);
                    }
                    runtime.destroy(instance);
                }
                self.release_plugin_symbols(key);
                self.transition(key, PluginState::Resolved);
                return Err(RuntimeError::runtime(id, format!("start function failed: {:#}", err)));
            }
        }

        {
            let mut state = self.state_mut();
            state.record_mut(key).instance = Some(instance);
            state.started.push(key);
        }
        self.transition(key, PluginState::Active);
        Ok(())
    }

    pub(super) fn stop_plugin(&self, key: PluginKey) {
        self.stop_rec(key);
    }

    fn stop_rec(&self, key: PluginKey) {
        let importing = {
            let mut state = self.state_mut();
            let record = state.record_mut(key);
            if record.state < PluginState::Active || record.processed {
                return;
            }
            record.processed = true;
            record.importing.clone()
        };
        for dependent in importing {
            let active = {
                let state = self.state();
                state.contains(dependent) && state.state_of(dependent) >= PluginState::Active
            };
            if active {
                self.stop_rec(dependent);
            }
        }
        self.state_mut().record_mut(key).processed = false;
        self.stop_single(key);
    }

    fn stop_single(&self, key: PluginKey) {
        let (id, runtime, instance) = {
            let mut state = self.state_mut();
            // symbols held by the plug-in itself or by dependents being stopped are released below
            let record = state.record(key);
            let outstanding =
                record.provided_usage - record.symbols.usage_of(key) - state.usage_held_by_processed(key);
            if outstanding > 0 {
                fatal!(
                    "plug-in {} is being stopped while {} of its symbols are still in use",
                    state.record(key).id(),
                    outstanding
                );
            }
            let record = state.record_mut(key);
            (record.id().to_string(), record.runtime.clone(), record.instance.take())
        };

        if let (Some(runtime), Some(mut instance)) = (runtime, instance) {
            let points = runtime.entry_points();
            if points.contains(EntryPoints::STOP) {
                self.transition(key, PluginState::Stopping);
            }
            let _scope = self.enter(CallbackKind::STOP);
            if points.contains(EntryPoints::STOP) {
                runtime.stop(&mut instance);
            }
            runtime.destroy(instance);
        }

        self.release_plugin_symbols(key);
        self.state_mut().started.retain(|started| *started != key);
        self.transition(key, PluginState::Resolved);
        self.log_with(Severity::Debug, || format!("plug-in {} stopped", id));
    }

    /// Stop every active plug-in, most recently started first
    pub(super) fn stop_all(&self) {
        loop {
            let last = self.state().started.last().copied();
            let Some(key) = last else {
                break;
            };
            if self.state().state_of(key) < PluginState::Active {
                self.state_mut().started.retain(|started| *started != key);
                continue;
            }
            self.stop_rec(key);
        }
    }
}
