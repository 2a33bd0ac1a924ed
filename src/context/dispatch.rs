//! Event and log delivery
//!
//! Listeners and loggers are called synchronously with the context lock held
//! but with no state borrowed, so they may query the context.

use std::sync::Arc;

use log::{debug, log};

use super::{CallbackKind, Locked, PluginKey};
use crate::events::{PluginEvent, PluginListener, PluginState, Severity};

impl Locked<'_> {
    /// Change the state of a plug-in and notify listeners
    pub(super) fn transition(&self, key: PluginKey, new_state: PluginState) {
        let (plugin_id, old_state) = {
            let mut state = self.state_mut();
            let record = state.record_mut(key);
            let old_state = record.state;
            record.state = new_state;
            (record.id().to_string(), old_state)
        };
        self.emit(PluginEvent {
            plugin_id,
            old_state,
            new_state,
        });
    }

    pub(super) fn emit(&self, event: PluginEvent) {
        debug!(
            target: "pluginrt",
            "plug-in {} changed state {} -> {}", event.plugin_id, event.old_state, event.new_state
        );
        let listeners: Vec<Arc<dyn PluginListener>> = self
            .guard
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        if listeners.is_empty() {
            return;
        }
        let _scope = self.enter(CallbackKind::LISTENER);
        for listener in listeners {
            listener.on_event(&event);
        }
    }

    /// Deliver a message to the `log` facade and to every interested logger
    pub(super) fn log_message(&self, severity: Severity, message: &str, source: Option<&str>) {
        match source {
            Some(plugin) => log!(target: "pluginrt", severity.level(), "[{}] {}", plugin, message),
            None => log!(target: "pluginrt", severity.level(), "{}", message),
        }
        let loggers = self.inner.framework.loggers_for(self.inner.id, severity);
        if loggers.is_empty() {
            return;
        }
        let _scope = self.enter(CallbackKind::LOGGER);
        for logger in loggers {
            logger.log(severity, message, source);
        }
    }

    /// Format and deliver a runtime message only if someone will see it
    pub(super) fn log_with(&self, severity: Severity, message: impl FnOnce() -> String) {
        if log::log_enabled!(target: "pluginrt", severity.level())
            || self.inner.framework.is_logged(self.inner.id, severity)
        {
            self.log_message(severity, &message(), None);
        }
    }
}
