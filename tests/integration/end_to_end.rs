//! End-to-end Tests
//!
//! Drive a host through the whole public surface: manifests loaded from disk,
//! extension registries, a native runtime table, start, stop and teardown.

mod support;

use std::ffi::{c_int, c_void};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pluginrt::dylib::{FfiRuntime, FfiRuntimeTable};
use pluginrt::{
    DescriptorLoader, ErrorKind, LoadError, PluginContext, PluginDescriptor, PluginState, Severity,
};
use support::Harness;
use tempfile::TempDir;

/// Reads JSON manifests
struct JsonManifests;

impl DescriptorLoader for JsonManifests {
    fn load(&self, path: &Path) -> Result<PluginDescriptor, LoadError> {
        let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|err| LoadError::Malformed {
            path: path.display().to_string(),
            message: err.to_string(),
        })
    }
}

const CORE_MANIFEST: &str = r#"{
    "identifier": "org.example.core",
    "name": "Core services",
    "version": "1.2.0",
    "ext_points": [
        { "local_id": "commands", "global_id": "org.example.core.commands" }
    ],
    "runtime_lib": "libcore",
    "runtime_entry": "runtime"
}"#;

const SHELL_MANIFEST: &str = r#"{
    "identifier": "org.example.shell",
    "version": "0.9.1",
    "imports": [
        { "plugin_id": "org.example.core", "version": "1.0", "match_rule": "compatible" }
    ],
    "extensions": [
        {
            "ext_point_id": "org.example.core.commands",
            "configuration": {
                "name": "command",
                "attributes": [["verb", "list"]],
                "children": [{ "name": "help", "value": "List installed plug-ins" }]
            }
        }
    ],
    "runtime_lib": "libshell",
    "runtime_entry": "runtime"
}"#;

fn write_manifests(dir: &TempDir) -> Vec<std::path::PathBuf> {
    [("core.json", CORE_MANIFEST), ("shell.json", SHELL_MANIFEST), ("broken.json", "{ \"name\": 3 }")]
        .into_iter()
        .map(|(name, contents)| {
            let path = dir.path().join(name);
            fs::write(&path, contents).unwrap();
            path
        })
        .collect()
}

#[test]
fn test_manifest_driven_session() {
    let harness = Harness::new();
    harness.loader.add_runtime("libcore", "runtime", harness.runtime("core"));
    harness.loader.add_runtime("libshell", "runtime", harness.runtime("shell"));

    let dir = TempDir::new().unwrap();
    let paths = write_manifests(&dir);

    let core = harness.context.install_from(&JsonManifests, &paths[0]).unwrap();
    let shell = harness.context.install_from(&JsonManifests, &paths[1]).unwrap();
    assert_eq!((core.as_str(), shell.as_str()), ("org.example.core", "org.example.shell"));

    let err = harness.context.install_from(&JsonManifests, &paths[2]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Malformed);
    let err = harness
        .context
        .install_from(&JsonManifests, dir.path().join("absent.json"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Malformed);

    // the command contribution is visible before anything runs
    let commands = harness.context.get_extensions_info(Some("org.example.core.commands"));
    assert_eq!(commands.len(), 1);
    let configuration = &commands[0].spec().configuration;
    assert_eq!(configuration.attribute("verb"), Some("list"));
    assert_eq!(
        configuration.lookup("help").and_then(|help| help.value.as_deref()),
        Some("List installed plug-ins")
    );
    assert_eq!(commands[0].plugin().identifier, "org.example.shell");

    harness.context.start("org.example.shell").unwrap();
    assert_eq!(harness.context.get_state("org.example.core"), PluginState::Active);
    assert_eq!(harness.calls("start:"), vec!["start:core", "start:shell"]);

    harness.context.stop("org.example.core").unwrap();
    assert_eq!(harness.calls("stop:"), vec!["stop:shell", "stop:core"]);
    assert_eq!(harness.context.get_state("org.example.shell"), PluginState::Resolved);

    harness.context.uninstall_all();
    assert!(harness.context.get_plugins_info().is_empty());
    assert!(harness.context.get_extension_points_info().is_empty());
    harness.framework.destroy();
}

#[test]
fn test_version_constraint_blocks_start() {
    let harness = Harness::new();
    harness.loader.add_runtime("libshell", "runtime", harness.runtime("shell"));
    harness
        .context
        .install(PluginDescriptor::new("org.example.core").with_version("2.0.0"))
        .unwrap();

    let shell: PluginDescriptor = serde_json::from_str(SHELL_MANIFEST).unwrap();
    harness.context.install(shell).unwrap();

    let err = harness.context.start("org.example.shell").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Dependency);
    assert_eq!(err.plugin(), Some("org.example.shell"));
    assert_eq!(harness.context.get_state("org.example.shell"), PluginState::Installed);
    harness.framework.destroy();
}

static NATIVE_CREATED: AtomicUsize = AtomicUsize::new(0);
static NATIVE_DESTROYED: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn native_create(context: *const c_void) -> *mut c_void {
    let context = &*(context as *const PluginContext);
    context.log(Severity::Info, "native runtime created");
    NATIVE_CREATED.fetch_add(1, Ordering::SeqCst);
    Box::into_raw(Box::new(0u32)) as *mut c_void
}

unsafe extern "C" fn native_start(data: *mut c_void) -> c_int {
    *(data as *mut u32) += 1;
    0
}

unsafe extern "C" fn native_destroy(data: *mut c_void) {
    drop(Box::from_raw(data as *mut u32));
    NATIVE_DESTROYED.fetch_add(1, Ordering::SeqCst);
}

static NATIVE_TABLE: FfiRuntimeTable = FfiRuntimeTable {
    abi_version: pluginrt::ABI_VERSION,
    create: Some(native_create),
    start: Some(native_start),
    stop: None,
    destroy: Some(native_destroy),
};

#[test]
fn test_native_runtime_table() {
    let harness = Harness::new();
    harness
        .loader
        .add_runtime("libnative", "pluginrt_runtime", FfiRuntime::from_static(&NATIVE_TABLE));
    harness
        .context
        .install(PluginDescriptor::new("native").with_runtime("libnative", Some("pluginrt_runtime")))
        .unwrap();

    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&messages);
    harness.context.register_logger(
        move |_: Severity, message: &str, source: Option<&str>| {
            sink.lock().unwrap().push(format!("{}: {}", source.unwrap_or("host"), message))
        },
        Severity::Info,
    );

    harness.context.start("native").unwrap();
    assert_eq!(NATIVE_CREATED.load(Ordering::SeqCst), 1);
    assert!(messages
        .lock()
        .unwrap()
        .contains(&"native: native runtime created".to_string()));

    harness.clear();
    harness.context.stop("native").unwrap();
    assert_eq!(NATIVE_DESTROYED.load(Ordering::SeqCst), 1);
    // no stop entry point: the plug-in goes straight back to resolved
    assert_eq!(harness.transitions(), vec!["native:ACTIVE->RESOLVED"]);
    harness.framework.destroy();
}

#[test]
fn test_global_framework_lifecycle() {
    support::panic_on_fatal();
    pluginrt::init();
    pluginrt::init();

    let loader = Arc::new(support::TestLoader::default());
    let journal = Arc::new(Mutex::new(Vec::new()));
    loader.add_runtime("libservice", "runtime", support::TestRuntime::new("service", &journal));
    let context = PluginContext::new(loader);
    context
        .install(PluginDescriptor::new("service").with_runtime("libservice", Some("runtime")))
        .unwrap();
    context.start("service").unwrap();

    // the first destroy only drops the initialization count
    pluginrt::destroy();
    assert_eq!(context.get_state("service"), PluginState::Active);

    pluginrt::destroy();
    assert!(!pluginrt::Framework::global().is_initialized());
    let calls = journal.lock().unwrap().clone();
    assert_eq!(calls, vec!["create:service", "start:service", "stop:service", "destroy:service"]);
}
