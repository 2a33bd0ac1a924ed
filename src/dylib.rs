//! Shared-library plug-in loading
//!
//! [`DylibLoader`] opens plug-in runtime libraries with `libloading`. A runtime
//! entry symbol names a static [`FfiRuntimeTable`] inside the library; the
//! table's ABI version must match [`crate::abi_version`].

use std::ffi::{c_int, c_void};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail};
use libloading::{Library, Symbol};
use log::{debug, warn};

use crate::config::RuntimeConfig;
use crate::context::PluginContext;
use crate::loader::{
    EntryPoints, NativeLoadError, NativeLoader, NativeModule, PluginInstance, PluginRuntime, SymbolAddress,
};

/// Entry point table exported by a native plug-in.
///
/// `create` receives a pointer to the plug-in's [`PluginContext`], valid until
/// `destroy` returns, and returns the plug-in instance data (null on failure).
/// `start` returns zero on success.
#[repr(C)]
pub struct FfiRuntimeTable {
    pub abi_version: u32,
    pub create: Option<unsafe extern "C" fn(context: *const c_void) -> *mut c_void>,
    pub start: Option<unsafe extern "C" fn(data: *mut c_void) -> c_int>,
    pub stop: Option<unsafe extern "C" fn(data: *mut c_void)>,
    pub destroy: Option<unsafe extern "C" fn(data: *mut c_void)>,
}

/// [`PluginRuntime`] driving an [`FfiRuntimeTable`]
pub struct FfiRuntime {
    table: *const FfiRuntimeTable,
    // keeps the library defining the table loaded
    _library: Option<Arc<Library>>,
}

// The table is immutable and its functions are called with the context lock held.
unsafe impl Send for FfiRuntime {}
unsafe impl Sync for FfiRuntime {}

struct FfiInstance {
    data: *mut c_void,
    context: Box<PluginContext>,
}

// Instance data is only touched by the owning runtime's entry points.
unsafe impl Send for FfiInstance {}

impl FfiRuntime {
    /// Runtime for a table linked into the host
    pub fn from_static(table: &'static FfiRuntimeTable) -> Self {
        Self {
            table,
            _library: None,
        }
    }

    fn table(&self) -> &FfiRuntimeTable {
        // SAFETY: the table is static or lives in a library kept loaded by `_library`.
        unsafe { &*self.table }
    }

    fn instance<'a>(&self, instance: &'a mut PluginInstance) -> anyhow::Result<&'a mut FfiInstance> {
        instance
            .downcast_mut::<FfiInstance>()
            .ok_or_else(|| anyhow!("instance was not created by a native runtime table"))
    }
}

impl PluginRuntime for FfiRuntime {
    fn entry_points(&self) -> EntryPoints {
        let table = self.table();
        if table.abi_version != crate::abi_version() {
            warn!(
                "runtime table ABI version {} does not match runtime ABI version {}",
                table.abi_version,
                crate::abi_version()
            );
            return EntryPoints::empty();
        }
        let mut points = EntryPoints::empty();
        points.set(EntryPoints::CREATE, table.create.is_some());
        points.set(EntryPoints::START, table.start.is_some());
        points.set(EntryPoints::STOP, table.stop.is_some());
        points.set(EntryPoints::DESTROY, table.destroy.is_some());
        points
    }

    fn create(&self, context: &PluginContext) -> Option<PluginInstance> {
        let create = self.table().create?;
        let context = Box::new(context.clone());
        let context_ptr = &*context as *const PluginContext as *const c_void;
        // SAFETY: calling into the plug-in per the table contract; the context outlives the instance.
        let data = unsafe { create(context_ptr) };
        if data.is_null() {
            return None;
        }
        Some(Box::new(FfiInstance { data, context }))
    }

    fn start(&self, instance: &mut PluginInstance) -> anyhow::Result<()> {
        let Some(start) = self.table().start else {
            return Ok(());
        };
        let instance = self.instance(instance)?;
        // SAFETY: `data` was returned by this table's create function.
        let status = unsafe { start(instance.data) };
        if status != 0 {
            bail!("start function returned status {}", status);
        }
        Ok(())
    }

    fn stop(&self, instance: &mut PluginInstance) {
        let Some(stop) = self.table().stop else {
            return;
        };
        if let Ok(instance) = self.instance(instance) {
            // SAFETY: `data` was returned by this table's create function.
            unsafe { stop(instance.data) };
        }
    }

    fn destroy(&self, instance: PluginInstance) {
        let Ok(instance) = instance.downcast::<FfiInstance>() else {
            return;
        };
        if let Some(destroy) = self.table().destroy {
            // SAFETY: `data` was returned by this table's create function and is not used again.
            unsafe { destroy(instance.data) };
        }
        drop(instance.context);
    }
}

/// A loaded shared library
pub struct DylibModule {
    library: Arc<Library>,
    path: PathBuf,
}

impl NativeModule for DylibModule {
    fn lookup(&self, symbol: &str) -> Option<SymbolAddress> {
        // SAFETY: the symbol is only used as an opaque address.
        let symbol: Symbol<*mut c_void> = unsafe { self.library.get(symbol.as_bytes()) }.ok()?;
        SymbolAddress::new(*symbol)
    }

    fn runtime(&self, symbol: &str) -> Option<Arc<dyn PluginRuntime>> {
        let address = self.lookup(symbol)?;
        Some(Arc::new(FfiRuntime {
            table: address.as_ptr() as *const FfiRuntimeTable,
            _library: Some(Arc::clone(&self.library)),
        }))
    }

    fn close(self: Box<Self>) {
        debug!("closing runtime library {}", self.path.display());
    }
}

/// `libloading`-based [`NativeLoader`]
#[derive(Debug, Clone, Default)]
pub struct DylibLoader {
    search_paths: Vec<PathBuf>,
}

impl DylibLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader searching the configured library paths
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            search_paths: config.runtime.library_paths.clone(),
        }
    }

    pub fn with_search_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.search_paths.push(path.into());
        self
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// File to open for a library name.
    ///
    /// Names with a directory component or an extension are used as given.
    /// Plain names get the platform prefix and suffix and are looked up in the
    /// search paths, falling back to the system search path.
    pub fn locate(&self, library: &str) -> PathBuf {
        let given = Path::new(library);
        if given.components().count() > 1 || given.extension().is_some() {
            return given.to_path_buf();
        }
        let file_name = libloading::library_filename(library);
        self.search_paths
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.exists())
            .unwrap_or_else(|| PathBuf::from(file_name))
    }
}

impl NativeLoader for DylibLoader {
    fn open(&self, library: &str) -> Result<Box<dyn NativeModule>, NativeLoadError> {
        let path = self.locate(library);
        debug!("opening runtime library {} from {}", library, path.display());
        // SAFETY: loading a plug-in library runs its initializers; plug-ins are trusted code.
        let loaded = unsafe { Library::new(&path) }
            .map_err(|err| NativeLoadError::new(library, err.to_string()))?;
        Ok(Box::new(DylibModule {
            library: Arc::new(loaded),
            path,
        }))
    }
}
