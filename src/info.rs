//! Use-Counted Information Objects
//!
//! Every snapshot handed out across the API boundary is registered with the
//! framework under its address together with a deallocator. Rust callers hold
//! an [`Info`] handle (clone = use, drop = release); raw holders, for example
//! across an FFI boundary, use [`Info::into_raw`] together with
//! `PluginContext::use_info` / `PluginContext::release_info`.

use std::collections::HashMap;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::sync::Arc;

use crate::descriptor::{ExtensionPointSpec, ExtensionSpec, PluginDescriptor};
use crate::fatal::fatal;
use crate::framework::Framework;

/// Deallocator run when an object's use count drops to zero
pub(crate) type Deallocator = Box<dyn FnOnce() + Send>;

struct RefEntry {
    count: usize,
    dealloc: Deallocator,
}

/// Address-keyed use counts
#[derive(Default)]
pub(crate) struct RefRegistry {
    entries: HashMap<usize, RefEntry>,
}

impl RefRegistry {
    /// Register an object with an initial count of one.
    ///
    /// Registering an address that is already known counts as a use of the
    /// existing object and the new deallocator is discarded.
    pub(crate) fn register(&mut self, address: usize, dealloc: Deallocator) -> Option<Deallocator> {
        match self.entries.get_mut(&address) {
            Some(entry) => {
                entry.count += 1;
                Some(dealloc)
            }
            None => {
                self.entries.insert(address, RefEntry { count: 1, dealloc });
                None
            }
        }
    }

    pub(crate) fn use_ref(&mut self, address: usize) {
        match self.entries.get_mut(&address) {
            Some(entry) => entry.count += 1,
            None => fatal!("unknown information object {:#x} passed to use_info", address),
        }
    }

    /// Decrement the count, returning the deallocator at the 1 -> 0 transition
    pub(crate) fn release(&mut self, address: usize) -> Option<Deallocator> {
        let Some(entry) = self.entries.get_mut(&address) else {
            fatal!("unknown information object {:#x} passed to release_info", address)
        };
        entry.count -= 1;
        if entry.count > 0 {
            return None;
        }
        self.entries.remove(&address).map(|entry| entry.dealloc)
    }

    pub(crate) fn count(&self, address: usize) -> Option<usize> {
        self.entries.get(&address).map(|entry| entry.count)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Remove every entry, returning the deallocators still pending
    pub(crate) fn destroy_all(&mut self) -> Vec<Deallocator> {
        self.entries.drain().map(|(_, entry)| entry.dealloc).collect()
    }
}

pub(crate) fn address_of<T>(value: &Arc<T>) -> usize {
    Arc::as_ptr(value) as *const () as usize
}

/// Use-counted handle to an information snapshot
pub struct Info<T: Send + Sync + 'static> {
    value: Arc<T>,
    framework: Arc<Framework>,
    generation: u64,
}

impl<T: Send + Sync + 'static> Info<T> {
    pub(crate) fn new(framework: &Arc<Framework>, value: Arc<T>) -> Self {
        let generation = framework.register_info(&value);
        Self {
            value,
            framework: Arc::clone(framework),
            generation,
        }
    }

    /// Address under which the object is registered
    pub fn as_ptr(this: &Self) -> *const T {
        Arc::as_ptr(&this.value)
    }

    /// Hand this handle's use count over to a raw holder.
    ///
    /// The object stays alive until the count is released with
    /// `PluginContext::release_info`.
    pub fn into_raw(this: Self) -> *const T {
        let this = ManuallyDrop::new(this);
        let ptr = Arc::as_ptr(&this.value);
        // SAFETY: `this` is never dropped, each field is moved out exactly once.
        unsafe {
            drop(std::ptr::read(&this.value));
            drop(std::ptr::read(&this.framework));
        }
        ptr
    }
}

impl<T: Send + Sync + 'static> Deref for Info<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Send + Sync + 'static> Clone for Info<T> {
    fn clone(&self) -> Self {
        self.framework.use_owned_info(address_of(&self.value), self.generation);
        Self {
            value: Arc::clone(&self.value),
            framework: Arc::clone(&self.framework),
            generation: self.generation,
        }
    }
}

impl<T: Send + Sync + 'static> Drop for Info<T> {
    fn drop(&mut self) {
        self.framework.release_owned_info(address_of(&self.value), self.generation);
    }
}

impl<T: Send + Sync + fmt::Debug + 'static> fmt::Debug for Info<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.value, f)
    }
}

/// Snapshot of an installed extension point
#[derive(Debug, Clone)]
pub struct ExtensionPointInfo {
    plugin: Arc<PluginDescriptor>,
    index: usize,
}

impl ExtensionPointInfo {
    pub(crate) fn new(plugin: Arc<PluginDescriptor>, index: usize) -> Self {
        Self { plugin, index }
    }

    /// Descriptor of the declaring plug-in
    pub fn plugin(&self) -> &PluginDescriptor {
        &self.plugin
    }

    pub fn spec(&self) -> &ExtensionPointSpec {
        &self.plugin.ext_points[self.index]
    }

    pub fn global_id(&self) -> &str {
        &self.spec().global_id
    }
}

/// Snapshot of an installed extension
#[derive(Debug, Clone)]
pub struct ExtensionInfo {
    plugin: Arc<PluginDescriptor>,
    index: usize,
}

impl ExtensionInfo {
    pub(crate) fn new(plugin: Arc<PluginDescriptor>, index: usize) -> Self {
        Self { plugin, index }
    }

    /// Descriptor of the contributing plug-in
    pub fn plugin(&self) -> &PluginDescriptor {
        &self.plugin
    }

    pub fn spec(&self) -> &ExtensionSpec {
        &self.plugin.extensions[self.index]
    }

    pub fn ext_point_id(&self) -> &str {
        &self.spec().ext_point_id
    }
}
