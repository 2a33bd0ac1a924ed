//! Dependency Resolution
//!
//! Depth-first walk of the import graph. A plug-in revisited while its own
//! resolution is still in progress reports a preliminary result, which is how
//! import cycles terminate. Preliminary plug-ins are committed to RESOLVED once
//! the top-level resolution succeeds, or rolled back with everything else the
//! attempt touched when it fails.

use std::sync::Arc;

use log::debug;

use super::{Locked, PluginKey};
use crate::error::{RuntimeError, RuntimeResult};
use crate::events::PluginState;
use crate::loader::EntryPoints;

/// Outcome of resolving one plug-in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Complete,
    /// Depends on a plug-in whose resolution is still in progress
    Preliminary,
}

#[derive(Default)]
struct ResolveSession {
    touched: Vec<PluginKey>,
    preliminary: Vec<PluginKey>,
}

impl Locked<'_> {
    pub(super) fn resolve_plugin(&self, key: PluginKey) -> RuntimeResult<()> {
        if self.state().state_of(key) >= PluginState::Resolved {
            return Ok(());
        }

        let mut session = ResolveSession::default();
        match self.resolve_rec(key, &mut session) {
            Ok(_) => {
                for key in &session.preliminary {
                    self.commit_rec(*key);
                }
                Ok(())
            }
            Err(err) => {
                self.rollback(&session);
                Err(err)
            }
        }
    }

    fn resolve_rec(&self, key: PluginKey, session: &mut ResolveSession) -> RuntimeResult<Resolution> {
        {
            let mut state = self.state_mut();
            let record = state.record_mut(key);
            if record.state >= PluginState::Resolved {
                return Ok(Resolution::Complete);
            }
            if record.processed || session.preliminary.contains(&key) {
                return Ok(Resolution::Preliminary);
            }
            record.processed = true;
        }
        if !session.touched.contains(&key) {
            session.touched.push(key);
        }

        let result = self
            .resolve_imports(key, session)
            .and_then(|outcome| self.resolve_self(key, outcome, session));

        self.state_mut().record_mut(key).processed = false;
        result
    }

    fn resolve_imports(&self, key: PluginKey, session: &mut ResolveSession) -> RuntimeResult<Resolution> {
        let descriptor = Arc::clone(&self.state().record(key).descriptor);
        let mut outcome = Resolution::Complete;

        for import in &descriptor.imports {
            let target = self.state().lookup(&import.plugin_id);
            let Some(target) = target else {
                if import.optional {
                    continue;
                }
                return Err(RuntimeError::dependency(
                    &descriptor.identifier,
                    &import.plugin_id,
                    format!("required plug-in {} is not installed", import.plugin_id),
                ));
            };

            let installed = Arc::clone(&self.state().record(target).descriptor);
            if !import.accepts(installed.version.as_deref()) {
                return Err(RuntimeError::dependency(
                    &descriptor.identifier,
                    &import.plugin_id,
                    format!(
                        "plug-in {} version {} does not satisfy the required version {}",
                        import.plugin_id,
                        installed.version.as_deref().unwrap_or("(none)"),
                        import.version.as_deref().unwrap_or("(any)")
                    ),
                ));
            }

            if self.resolve_rec(target, session)? == Resolution::Preliminary {
                outcome = Resolution::Preliminary;
            }
            self.state_mut().add_edge(key, target);
        }
        Ok(outcome)
    }

    fn resolve_self(
        &self,
        key: PluginKey,
        outcome: Resolution,
        session: &mut ResolveSession,
    ) -> RuntimeResult<Resolution> {
        self.load_runtime(key)?;
        match outcome {
            Resolution::Complete => self.transition(key, PluginState::Resolved),
            Resolution::Preliminary => session.preliminary.push(key),
        }
        Ok(outcome)
    }

    /// Open the native module of a plug-in and look up its runtime entry points
    fn load_runtime(&self, key: PluginKey) -> RuntimeResult<()> {
        let descriptor = {
            let state = self.state();
            let record = state.record(key);
            if record.module.is_some() {
                return Ok(());
            }
            Arc::clone(&record.descriptor)
        };
        let id = descriptor.identifier.as_str();

        let Some(library) = descriptor.runtime_lib.as_deref() else {
            if descriptor.runtime_entry.is_some() {
                return Err(RuntimeError::runtime(
                    id,
                    "a runtime entry point is declared without a runtime library",
                ));
            }
            return Ok(());
        };

        let module = self
            .inner
            .loader
            .open(library)
            .map_err(|err| RuntimeError::dependency(id, library, err.to_string()))?;

        let runtime = match descriptor.runtime_entry.as_deref() {
            None => None,
            Some(entry) => {
                let Some(runtime) = module.runtime(entry) else {
                    module.close();
                    return Err(RuntimeError::dependency(
                        id,
                        library,
                        format!("symbol {} not found in runtime library {}", entry, library),
                    ));
                };
                if !runtime.entry_points().contains(EntryPoints::REQUIRED) {
                    drop(runtime);
                    module.close();
                    return Err(RuntimeError::runtime(
                        id,
                        "the runtime does not define both create and destroy entry points",
                    ));
                }
                Some(runtime)
            }
        };

        debug!(target: "pluginrt", "loaded runtime library {} for plug-in {}", library, id);
        let mut state = self.state_mut();
        let record = state.record_mut(key);
        record.module = Some(module);
        record.runtime = runtime;
        Ok(())
    }

    /// Commit a preliminary plug-in after everything it imports
    fn commit_rec(&self, key: PluginKey) {
        let imported = {
            let mut state = self.state_mut();
            let record = state.record_mut(key);
            if record.state >= PluginState::Resolved || record.processed {
                return;
            }
            record.processed = true;
            record.imported.clone()
        };
        for target in imported {
            self.commit_rec(target);
        }
        self.state_mut().record_mut(key).processed = false;
        self.transition(key, PluginState::Resolved);
    }

    /// Return every plug-in touched by a failed attempt that did not reach RESOLVED to INSTALLED
    fn rollback(&self, session: &ResolveSession) {
        for key in session.touched.iter().rev() {
            let (module, runtime) = {
                let mut state = self.state_mut();
                if !state.contains(*key) || state.state_of(*key) >= PluginState::Resolved {
                    continue;
                }
                state.clear_imports(*key);
                let record = state.record_mut(*key);
                (record.module.take(), record.runtime.take())
            };
            drop(runtime);
            if let Some(module) = module {
                module.close();
            }
        }
        for key in &session.touched {
            if let Some(record) = self.state_mut().records.get_mut(key) {
                record.processed = false;
            }
        }
        debug!(target: "pluginrt", "rolled back resolution of {} plug-ins", session.touched.len());
    }

    /// Return a stopped plug-in and everything importing it to INSTALLED
    pub(super) fn unresolve_plugin(&self, key: PluginKey) {
        let importing = {
            let mut state = self.state_mut();
            let record = state.record_mut(key);
            if record.state < PluginState::Resolved || record.processed {
                return;
            }
            record.processed = true;
            record.importing.clone()
        };
        for dependent in importing {
            self.unresolve_plugin(dependent);
        }

        let (module, runtime) = {
            let mut state = self.state_mut();
            state.clear_imports(key);
            let record = state.record_mut(key);
            record.processed = false;
            (record.module.take(), record.runtime.take())
        };
        drop(runtime);
        if let Some(module) = module {
            module.close();
        }
        self.transition(key, PluginState::Installed);
    }
}
