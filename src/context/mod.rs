//! Plug-in Context
//!
//! A context owns one plug-in registry together with its import graph,
//! listeners and symbol tables. All of it sits behind a single reentrant lock:
//! resolution, start, stop and symbol resolution recurse into each other and
//! into plug-in code that may call back into the context on the same thread.
//!
//! Calls back into the context from inside a callback are checked against the
//! set of operations that callback kind may use; anything else is a contract
//! violation and goes through the fatal error path.

mod dispatch;
mod lifecycle;
mod registry;
mod resolver;
mod state;
mod symbols;

#[cfg(test)]
mod tests;

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use bitflags::bitflags;
use log::debug;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::descriptor::{DescriptorLoader, PluginDescriptor};
use crate::error::{RuntimeError, RuntimeResult};
use crate::events::{ListenerId, Logger, LoggerId, PluginListener, PluginState, Severity};
use crate::fatal::fatal;
use crate::framework::Framework;
use crate::info::{ExtensionInfo, ExtensionPointInfo, Info};
use crate::loader::{NativeLoader, SymbolAddress};

pub(crate) use state::PluginKey;
use state::ContextState;

bitflags! {
    /// Callback kinds the runtime may currently be inside of
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct CallbackKind: u8 {
        const LOGGER = 0b0001;
        const LISTENER = 0b0010;
        /// create and start entry points
        const START = 0b0100;
        /// stop and destroy entry points
        const STOP = 0b1000;
    }
}

/// Lock-guarded part of a context
pub(crate) struct ContextCell {
    state: RefCell<ContextState>,
    listeners: RefCell<Vec<(ListenerId, Arc<dyn PluginListener>)>>,
    next_listener: Cell<u64>,
    in_logger: Cell<u32>,
    in_listener: Cell<u32>,
    in_start: Cell<u32>,
    in_stop: Cell<u32>,
    destroyed: Cell<bool>,
}

impl ContextCell {
    fn new() -> Self {
        Self {
            state: RefCell::new(ContextState::default()),
            listeners: RefCell::new(Vec::new()),
            next_listener: Cell::new(0),
            in_logger: Cell::new(0),
            in_listener: Cell::new(0),
            in_start: Cell::new(0),
            in_stop: Cell::new(0),
            destroyed: Cell::new(false),
        }
    }

    fn counter(&self, kind: CallbackKind) -> &Cell<u32> {
        if kind == CallbackKind::LOGGER {
            &self.in_logger
        } else if kind == CallbackKind::LISTENER {
            &self.in_listener
        } else if kind == CallbackKind::START {
            &self.in_start
        } else {
            &self.in_stop
        }
    }

    fn active_callbacks(&self) -> CallbackKind {
        CallbackKind::all()
            .iter()
            .filter(|kind| self.counter(*kind).get() > 0)
            .collect()
    }
}

/// Marks the current thread as being inside a callback until dropped
pub(crate) struct CallbackScope<'a> {
    cell: &'a ContextCell,
    kind: CallbackKind,
}

impl Drop for CallbackScope<'_> {
    fn drop(&mut self) {
        let counter = self.cell.counter(self.kind);
        counter.set(counter.get() - 1);
    }
}

/// Shared context internals
pub(crate) struct ContextInner {
    id: u64,
    framework: Arc<Framework>,
    loader: Arc<dyn NativeLoader>,
    cell: ReentrantMutex<ContextCell>,
}

impl ContextInner {
    fn lock(self: &Arc<Self>) -> Locked<'_> {
        Locked {
            inner: self,
            guard: self.cell.lock(),
        }
    }

    /// Stop and uninstall everything; called on context destroy and framework teardown
    pub(crate) fn teardown(self: &Arc<Self>) {
        let locked = self.lock();
        if locked.guard.destroyed.get() {
            return;
        }
        locked.release_host_symbols();
        locked.uninstall_all();
        locked.guard.listeners.borrow_mut().clear();
        locked.guard.destroyed.set(true);
        debug!(target: "pluginrt", "plug-in context {} destroyed", self.id);
    }
}

/// The context lock, held for the duration of one operation
pub(crate) struct Locked<'a> {
    inner: &'a Arc<ContextInner>,
    guard: ReentrantMutexGuard<'a, ContextCell>,
}

impl Locked<'_> {
    fn state(&self) -> Ref<'_, ContextState> {
        self.guard.state.borrow()
    }

    fn state_mut(&self) -> RefMut<'_, ContextState> {
        self.guard.state.borrow_mut()
    }

    fn enter(&self, kind: CallbackKind) -> CallbackScope<'_> {
        let counter = self.guard.counter(kind);
        counter.set(counter.get() + 1);
        CallbackScope {
            cell: &self.guard,
            kind,
        }
    }

    fn check_callbacks(&self, operation: &str, forbidden: CallbackKind) {
        let active = self.guard.active_callbacks() & forbidden;
        if let Some((name, _)) = active.iter_names().next() {
            fatal!(
                "{} cannot be called from within a {} callback",
                operation,
                name.to_lowercase()
            );
        }
    }

    /// Identifier of a plug-in, for messages
    fn plugin_name(&self, key: PluginKey) -> String {
        self.state().record(key).id().to_string()
    }
}

/// Handle on a plug-in context.
///
/// The host creates contexts with [`PluginContext::new`]. Every started
/// plug-in receives its own handle on the same context through its `create`
/// entry point; operations through that handle are attributed to the plug-in.
#[derive(Clone)]
pub struct PluginContext {
    inner: Arc<ContextInner>,
    requester: Option<PluginKey>,
}

impl PluginContext {
    /// Create a context attached to the global framework
    pub fn new(loader: Arc<dyn NativeLoader>) -> Self {
        Self::with_framework(Framework::global(), loader)
    }

    /// Create a context attached to a specific framework instance
    pub fn with_framework(framework: &Arc<Framework>, loader: Arc<dyn NativeLoader>) -> Self {
        let id = framework.next_id();
        let inner = Arc::new(ContextInner {
            id,
            framework: Arc::clone(framework),
            loader,
            cell: ReentrantMutex::new(ContextCell::new()),
        });
        framework.attach_context(id, Arc::downgrade(&inner));
        debug!(target: "pluginrt", "plug-in context {} created", id);
        Self {
            inner,
            requester: None,
        }
    }

    /// Lock the context for an operation that is forbidden inside `forbidden` callbacks
    fn api(&self, operation: &str, forbidden: CallbackKind) -> Locked<'_> {
        let locked = self.inner.lock();
        if locked.guard.destroyed.get() {
            fatal!("{} called on a destroyed plug-in context", operation);
        }
        locked.check_callbacks(operation, forbidden);
        if let Some(key) = self.requester {
            if !locked.state().contains(key) {
                fatal!("{} called through the context of an uninstalled plug-in", operation);
            }
        }
        locked
    }

    fn report<T>(locked: &Locked<'_>, result: RuntimeResult<T>) -> RuntimeResult<T> {
        result.inspect_err(|err| locked.log_message(Severity::Error, &err.to_string(), None))
    }

    /// Uninstall every plug-in and detach the context from the framework
    pub fn destroy(&self) {
        {
            let locked = self.inner.lock();
            locked.check_callbacks("destroy", CallbackKind::all());
        }
        self.inner.teardown();
        self.inner.framework.detach_context(self.inner.id);
    }

    /// Identifier of the plug-in owning this handle; `None` for the host
    pub fn plugin_id(&self) -> Option<String> {
        let key = self.requester?;
        let locked = self.inner.lock();
        let state = locked.state();
        state.records.get(&key).map(|record| record.id().to_string())
    }

    pub fn install(&self, descriptor: PluginDescriptor) -> RuntimeResult<()> {
        let locked = self.api("install", CallbackKind::all());
        let result = locked.install_plugin(descriptor);
        Self::report(&locked, result)
    }

    /// Load a descriptor and install it, returning the plug-in identifier
    pub fn install_from<P: AsRef<Path>>(
        &self,
        loader: &dyn DescriptorLoader,
        path: P,
    ) -> RuntimeResult<String> {
        let locked = self.api("install_from", CallbackKind::all());
        let result = loader
            .load(path.as_ref())
            .map_err(|err| RuntimeError::malformed(err.to_string()))
            .and_then(|descriptor| {
                let id = descriptor.identifier.clone();
                locked.install_plugin(descriptor).map(|()| id)
            });
        Self::report(&locked, result)
    }

    /// Stop, unresolve and remove a plug-in; unknown identifiers are ignored
    pub fn uninstall(&self, id: &str) -> RuntimeResult<()> {
        let locked = self.api("uninstall", CallbackKind::all());
        let key = locked.state().lookup(id);
        if let Some(key) = key {
            locked.uninstall_plugin(key);
        }
        Ok(())
    }

    pub fn uninstall_all(&self) {
        let locked = self.api("uninstall_all", CallbackKind::all());
        locked.uninstall_all();
    }

    /// Resolve and start a plug-in together with everything it imports
    pub fn start(&self, id: &str) -> RuntimeResult<()> {
        let locked = self.api(
            "start",
            CallbackKind::LOGGER | CallbackKind::LISTENER | CallbackKind::STOP,
        );
        let result = locked.start_by_id(id);
        Self::report(&locked, result)
    }

    /// Stop a plug-in together with everything importing it
    pub fn stop(&self, id: &str) -> RuntimeResult<()> {
        let locked = self.api("stop", CallbackKind::all());
        let key = locked.state().lookup(id);
        let result = match key {
            Some(key) => {
                locked.stop_plugin(key);
                Ok(())
            }
            None => Err(RuntimeError::unknown_plugin(id)),
        };
        Self::report(&locked, result)
    }

    /// Stop every active plug-in in reverse start order
    pub fn stop_all(&self) {
        let locked = self.api("stop_all", CallbackKind::all());
        locked.stop_all();
    }

    /// Current state of a plug-in; `Uninstalled` for unknown identifiers
    pub fn get_state(&self, id: &str) -> PluginState {
        let locked = self.inner.lock();
        let state = locked.state();
        state
            .lookup(id)
            .map_or(PluginState::Uninstalled, |key| state.state_of(key))
    }

    /// Resolve a symbol provided by a plug-in, starting the provider if needed
    pub fn resolve_symbol(&self, plugin_id: &str, name: &str) -> RuntimeResult<SymbolAddress> {
        let locked = self.api("resolve_symbol", CallbackKind::LOGGER | CallbackKind::LISTENER);
        let result = locked.resolve_symbol(self.requester, plugin_id, name);
        Self::report(&locked, result)
    }

    /// Release a symbol previously returned by [`resolve_symbol`](Self::resolve_symbol)
    pub fn release_symbol(&self, address: SymbolAddress) {
        let locked = self.api("release_symbol", CallbackKind::LOGGER);
        locked.release_symbol(self.requester, address);
    }

    /// Publish a symbol under the calling plug-in without going through its native module
    pub fn define_symbol(&self, name: &str, address: SymbolAddress) -> RuntimeResult<()> {
        let locked = self.api("define_symbol", CallbackKind::LOGGER | CallbackKind::LISTENER);
        let Some(key) = self.requester else {
            fatal!("define_symbol can only be called by a plug-in");
        };
        let result = locked.define_symbol(key, name, address);
        Self::report(&locked, result)
    }

    pub fn register_listener<L: PluginListener + 'static>(&self, listener: L) -> ListenerId {
        let locked = self.api("register_listener", CallbackKind::LOGGER | CallbackKind::LISTENER);
        let next = locked.guard.next_listener.get() + 1;
        locked.guard.next_listener.set(next);
        let id = ListenerId(next);
        locked.guard.listeners.borrow_mut().push((id, Arc::new(listener)));
        id
    }

    pub fn unregister_listener(&self, id: ListenerId) {
        let locked = self.api("unregister_listener", CallbackKind::LOGGER | CallbackKind::LISTENER);
        locked.guard.listeners.borrow_mut().retain(|(listener, _)| *listener != id);
    }

    /// Register a logger receiving messages of this context at `min_severity` and above
    pub fn register_logger<L: Logger + 'static>(&self, logger: L, min_severity: Severity) -> LoggerId {
        let _locked = self.api("register_logger", CallbackKind::LOGGER);
        self.inner
            .framework
            .register_logger(Arc::new(logger), min_severity, Some(self.inner.id))
    }

    /// Register a logger receiving messages of every context
    pub fn register_global_logger<L: Logger + 'static>(
        &self,
        logger: L,
        min_severity: Severity,
    ) -> LoggerId {
        let _locked = self.api("register_logger", CallbackKind::LOGGER);
        self.inner
            .framework
            .register_logger(Arc::new(logger), min_severity, None)
    }

    pub fn unregister_logger(&self, id: LoggerId) {
        let _locked = self.api("unregister_logger", CallbackKind::LOGGER);
        self.inner.framework.unregister_logger(id);
    }

    /// Emit a message attributed to the plug-in owning this handle
    pub fn log(&self, severity: Severity, message: &str) {
        let locked = self.api("log", CallbackKind::LOGGER);
        let source = self.requester.map(|key| locked.plugin_name(key));
        locked.log_message(severity, message, source.as_deref());
    }

    /// Whether a message at `severity` would reach any logger
    pub fn is_logged(&self, severity: Severity) -> bool {
        let _locked = self.api("is_logged", CallbackKind::LOGGER);
        self.inner.framework.is_logged(self.inner.id, severity)
    }

    /// Descriptor of an installed plug-in; `None` names the calling plug-in
    pub fn get_plugin_info(&self, id: Option<&str>) -> RuntimeResult<Info<PluginDescriptor>> {
        let locked = self.api("get_plugin_info", CallbackKind::LOGGER);
        let key = match (id, self.requester) {
            (Some(id), _) => locked.state().lookup(id).ok_or_else(|| RuntimeError::unknown_plugin(id)),
            (None, Some(key)) => Ok(key),
            (None, None) => fatal!("get_plugin_info needs a plug-in identifier when called by the host"),
        };
        let result = key.map(|key| locked.plugin_info(key));
        Self::report(&locked, result)
    }

    /// Descriptors of all installed plug-ins in installation order
    pub fn get_plugins_info(&self) -> Info<Vec<Arc<PluginDescriptor>>> {
        let locked = self.api("get_plugins_info", CallbackKind::LOGGER);
        locked.plugins_info()
    }

    pub fn get_extension_points_info(&self) -> Info<Vec<ExtensionPointInfo>> {
        let locked = self.api("get_extension_points_info", CallbackKind::LOGGER);
        locked.extension_points_info()
    }

    /// Extensions attached to `ext_point_id`, or all extensions for `None`
    pub fn get_extensions_info(&self, ext_point_id: Option<&str>) -> Info<Vec<ExtensionInfo>> {
        let locked = self.api("get_extensions_info", CallbackKind::LOGGER);
        locked.extensions_info(ext_point_id)
    }

    /// Take an additional use of an information object held by raw pointer
    pub fn use_info<T>(&self, ptr: *const T) {
        let _locked = self.api("use_info", CallbackKind::LOGGER);
        self.inner.framework.use_info(ptr as *const () as usize);
    }

    /// Release one use of an information object held by raw pointer
    pub fn release_info<T>(&self, ptr: *const T) {
        let locked = self.api("release_info", CallbackKind::LOGGER);
        drop(locked);
        self.inner.framework.release_info(ptr as *const () as usize);
    }
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("context", &self.inner.id)
            .field("plugin", &self.requester)
            .finish()
    }
}
