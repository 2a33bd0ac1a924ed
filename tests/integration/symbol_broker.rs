//! Symbol Broker Tests
//!
//! Plug-ins exchanging function and data symbols through the runtime.

mod support;

use std::ffi::c_void;
use std::sync::{Arc, Mutex};

use pluginrt::{ErrorKind, PluginContext, PluginState, SymbolAddress};
use support::Harness;

type BinaryOp = extern "C" fn(i32, i32) -> i32;

extern "C" fn add(a: i32, b: i32) -> i32 {
    a + b
}

static LIMITS: [u32; 2] = [16, 4096];

fn function_address(f: BinaryOp) -> SymbolAddress {
    SymbolAddress::new(f as *mut c_void).unwrap()
}

fn math_provider(harness: &Harness) {
    harness.install("math", &[]);
    harness.loader.add_symbol("libmath", "add", function_address(add));
    harness.loader.add_symbol("libmath", "limits", SymbolAddress::of(&LIMITS));
}

#[test]
fn test_host_calls_resolved_function() {
    let harness = Harness::new();
    math_provider(&harness);

    let address = harness.context.resolve_symbol("math", "add").unwrap();
    // SAFETY: the provider registered `add` under this name
    let resolved: BinaryOp = unsafe { std::mem::transmute(address.as_ptr()) };
    assert_eq!(resolved(2, 3), 5);

    let limits = harness.context.resolve_symbol("math", "limits").unwrap();
    // SAFETY: the provider registered `LIMITS` under this name
    let limits = unsafe { &*(limits.as_ptr() as *const [u32; 2]) };
    assert_eq!(limits[1], 4096);

    harness.context.release_symbol(address);
    harness.context.release_symbol(SymbolAddress::of(&LIMITS));
    harness.framework.destroy();
}

#[test]
fn test_consumer_resolves_during_create() {
    let harness = Harness::new();
    math_provider(&harness);
    let results = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&results);
    harness.install_with(
        "calculator",
        &[],
        harness.runtime("calculator").on_create(move |context: &PluginContext| {
            let address = context.resolve_symbol("math", "add").unwrap();
            // SAFETY: `add` is registered with this signature
            let add: BinaryOp = unsafe { std::mem::transmute(address.as_ptr()) };
            sink.lock().unwrap().push(add(20, 22));
        }),
    );

    harness.context.start("calculator").unwrap();
    assert_eq!(*results.lock().unwrap(), vec![42]);
    assert_eq!(harness.calls("start:"), vec!["start:math", "start:calculator"]);

    // the held symbol ties the calculator to the provider
    harness.clear();
    harness.context.uninstall("math").unwrap();
    assert_eq!(harness.calls("stop:"), vec!["stop:calculator", "stop:math"]);
    assert_eq!(harness.context.get_state("calculator"), PluginState::Resolved);
    assert_eq!(harness.context.get_state("math"), PluginState::Uninstalled);
    harness.framework.destroy();
}

#[test]
fn test_symbol_defined_at_runtime() {
    static REGISTRY: Mutex<Vec<String>> = Mutex::new(Vec::new());

    let harness = Harness::new();
    harness.install_with(
        "registry",
        &[],
        harness.runtime("registry").on_create(|context: &PluginContext| {
            context
                .define_symbol("registry", SymbolAddress::of(&REGISTRY))
                .unwrap();
        }),
    );
    harness.install("client", &["registry"]);

    let address = harness.context.resolve_symbol("registry", "registry").unwrap();
    // SAFETY: defined above from a static of this type
    let registry = unsafe { &*(address.as_ptr() as *const Mutex<Vec<String>>) };
    registry.lock().unwrap().push("entry".to_string());
    assert_eq!(REGISTRY.lock().unwrap().len(), 1);
    harness.context.release_symbol(address);

    let err = harness.context.resolve_symbol("client", "registry").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unknown);
    assert_eq!(harness.context.get_state("client"), PluginState::Active);
    harness.framework.destroy();
}
