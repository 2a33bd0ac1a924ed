//! Native Module Abstraction
//!
//! The resolver never touches a platform dynamic-library API directly. It goes
//! through [`NativeLoader`] to open a module, looks symbols up through
//! [`NativeModule`] and drives the plug-in lifecycle through [`PluginRuntime`].

use std::any::Any;
use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use bitflags::bitflags;
use thiserror::Error;

use crate::context::PluginContext;

/// Address of a resolved or defined symbol
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolAddress(NonNull<c_void>);

// A symbol address is an opaque token; dereferencing it is the caller's business.
unsafe impl Send for SymbolAddress {}
unsafe impl Sync for SymbolAddress {}

impl SymbolAddress {
    /// Wrap a raw address; `None` for null
    pub fn new(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    /// Address of a static item
    pub fn of<T>(item: &'static T) -> Self {
        Self(NonNull::from(item).cast())
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

impl fmt::Debug for SymbolAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:p}", self.0)
    }
}

/// Failure to open a native module
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("could not load native library {library}: {message}")]
pub struct NativeLoadError {
    pub library: String,
    pub message: String,
}

impl NativeLoadError {
    pub fn new<L: Into<String>, M: Into<String>>(library: L, message: M) -> Self {
        Self {
            library: library.into(),
            message: message.into(),
        }
    }
}

/// Opens native code modules by library name
pub trait NativeLoader: Send + Sync {
    fn open(&self, library: &str) -> Result<Box<dyn NativeModule>, NativeLoadError>;
}

/// A loaded native code module
pub trait NativeModule: Send + Sync {
    /// Look up a global symbol
    fn lookup(&self, symbol: &str) -> Option<SymbolAddress>;

    /// Interpret the symbol as a runtime entry point table
    fn runtime(&self, symbol: &str) -> Option<Arc<dyn PluginRuntime>>;

    /// Unload the module
    fn close(self: Box<Self>) {}
}

/// Per-plug-in instance data created by [`PluginRuntime::create`]
pub type PluginInstance = Box<dyn Any + Send>;

bitflags! {
    /// Entry points a runtime defines
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EntryPoints: u8 {
        const CREATE = 0b0001;
        const START = 0b0010;
        const STOP = 0b0100;
        const DESTROY = 0b1000;
    }
}

impl EntryPoints {
    /// Entry points every runtime must define
    pub const REQUIRED: EntryPoints = EntryPoints::CREATE.union(EntryPoints::DESTROY);
}

/// Plug-in lifecycle entry points.
///
/// Only the entry points reported by [`entry_points`](PluginRuntime::entry_points)
/// are invoked; STARTING and STOPPING are skipped for runtimes without START
/// and STOP respectively.
pub trait PluginRuntime: Send + Sync {
    fn entry_points(&self) -> EntryPoints;

    /// Create the plug-in instance. `None` reports an allocation failure.
    ///
    /// `context` is the plug-in's own handle on the runtime; it may be stored
    /// in the instance.
    fn create(&self, context: &PluginContext) -> Option<PluginInstance>;

    fn start(&self, _instance: &mut PluginInstance) -> anyhow::Result<()> {
        Ok(())
    }

    fn stop(&self, _instance: &mut PluginInstance) {}

    fn destroy(&self, instance: PluginInstance) {
        drop(instance);
    }
}
