//! Native plug-in runtime
//!
//! Installs self-describing plug-ins, resolves the dependencies between them,
//! loads and unloads their native code on demand, drives each plug-in through
//! its lifecycle and brokers symbols between plug-ins.
//!
//! The host initializes the framework with [`init`], creates one or more
//! [`PluginContext`]s, installs descriptors and starts plug-ins. Every
//! [`init`] must be paired with a [`destroy`]; the last one tears down every
//! remaining context.

pub mod config;
pub mod context;
pub mod descriptor;
pub mod dylib;
pub mod error;
pub mod events;
pub mod fatal;
pub mod framework;
pub mod info;
pub mod loader;
pub mod logging;
pub mod version;

pub use context::PluginContext;
pub use descriptor::{
    ConfigTree, DescriptorLoader, ExtensionPointSpec, ExtensionSpec, LoadError, PluginDescriptor,
    PluginImport,
};
pub use error::{ErrorKind, RuntimeError, RuntimeResult};
pub use events::{ListenerId, Logger, LoggerId, PluginEvent, PluginListener, PluginState, Severity};
pub use fatal::{set_fatal_error_handler, FatalErrorHandler};
pub use framework::Framework;
pub use info::{ExtensionInfo, ExtensionPointInfo, Info};
pub use loader::{
    EntryPoints, NativeLoadError, NativeLoader, NativeModule, PluginInstance, PluginRuntime,
    SymbolAddress,
};
pub use version::{MatchRule, Version};

include!(concat!(env!("OUT_DIR"), "/abi_version.rs"));

/// Version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Version of the native runtime table layout
pub fn abi_version() -> u32 {
    ABI_VERSION
}

/// Initialize the global framework; pairs with [`destroy`]
pub fn init() {
    Framework::global().init();
}

/// Release one initialization of the global framework
pub fn destroy() {
    Framework::global().destroy();
}
