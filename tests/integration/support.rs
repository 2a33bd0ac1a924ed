//! Shared test harness
//!
//! An in-memory native loader and a journaling runtime, so integration tests
//! can drive the public API without building shared libraries.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once};

use pluginrt::{
    set_fatal_error_handler, EntryPoints, Framework, NativeLoadError, NativeLoader, NativeModule,
    PluginContext, PluginDescriptor, PluginEvent, PluginImport, PluginInstance, PluginRuntime,
    SymbolAddress,
};

static FATAL_PANICS: Once = Once::new();

/// Fatal errors panic instead of aborting the test process
pub fn panic_on_fatal() {
    FATAL_PANICS.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
        set_fatal_error_handler(Some(Arc::new(|message: &str| panic!("fatal: {}", message))));
    });
}

pub type Journal = Arc<Mutex<Vec<String>>>;

pub type Hook = Arc<dyn Fn(&PluginContext) + Send + Sync>;

/// Runtime recording its entry point calls
#[derive(Clone)]
pub struct TestRuntime {
    name: String,
    journal: Journal,
    fail_start: bool,
    on_create: Option<Hook>,
}

impl TestRuntime {
    pub fn new(name: &str, journal: &Journal) -> Self {
        Self {
            name: name.to_string(),
            journal: Arc::clone(journal),
            fail_start: false,
            on_create: None,
        }
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn on_create(mut self, hook: impl Fn(&PluginContext) + Send + Sync + 'static) -> Self {
        self.on_create = Some(Arc::new(hook));
        self
    }

    fn record(&self, call: &str) {
        self.journal.lock().unwrap().push(format!("{}:{}", call, self.name));
    }
}

impl PluginRuntime for TestRuntime {
    fn entry_points(&self) -> EntryPoints {
        EntryPoints::all()
    }

    fn create(&self, context: &PluginContext) -> Option<PluginInstance> {
        self.record("create");
        if let Some(hook) = &self.on_create {
            hook(context);
        }
        Some(Box::new(context.clone()))
    }

    fn start(&self, _instance: &mut PluginInstance) -> anyhow::Result<()> {
        self.record("start");
        if self.fail_start {
            anyhow::bail!("{} refused to start", self.name);
        }
        Ok(())
    }

    fn stop(&self, _instance: &mut PluginInstance) {
        self.record("stop");
    }

    fn destroy(&self, instance: PluginInstance) {
        self.record("destroy");
        drop(instance);
    }
}

#[derive(Clone, Default)]
struct Library {
    symbols: HashMap<String, SymbolAddress>,
    runtimes: HashMap<String, Arc<dyn PluginRuntime>>,
}

/// Loader backed by libraries registered at runtime
#[derive(Default)]
pub struct TestLoader {
    libraries: Mutex<HashMap<String, Library>>,
}

impl TestLoader {
    pub fn add_runtime(&self, library: &str, entry: &str, runtime: impl PluginRuntime + 'static) {
        self.libraries
            .lock()
            .unwrap()
            .entry(library.to_string())
            .or_default()
            .runtimes
            .insert(entry.to_string(), Arc::new(runtime));
    }

    pub fn add_symbol(&self, library: &str, name: &str, address: SymbolAddress) {
        self.libraries
            .lock()
            .unwrap()
            .entry(library.to_string())
            .or_default()
            .symbols
            .insert(name.to_string(), address);
    }
}

impl NativeLoader for TestLoader {
    fn open(&self, library: &str) -> Result<Box<dyn NativeModule>, NativeLoadError> {
        let found = self.libraries.lock().unwrap().get(library).cloned();
        found
            .map(|library| Box::new(library) as Box<dyn NativeModule>)
            .ok_or_else(|| NativeLoadError::new(library, "not registered"))
    }
}

impl NativeModule for Library {
    fn lookup(&self, symbol: &str) -> Option<SymbolAddress> {
        self.symbols.get(symbol).copied()
    }

    fn runtime(&self, symbol: &str) -> Option<Arc<dyn PluginRuntime>> {
        self.runtimes.get(symbol).cloned()
    }
}

/// A framework, a context on it and everything needed to observe both
pub struct Harness {
    pub framework: Arc<Framework>,
    pub loader: Arc<TestLoader>,
    pub context: PluginContext,
    pub journal: Journal,
    pub events: Arc<Mutex<Vec<PluginEvent>>>,
}

impl Harness {
    pub fn new() -> Self {
        panic_on_fatal();
        let framework = Arc::new(Framework::new());
        framework.init();
        let loader = Arc::new(TestLoader::default());
        let context = PluginContext::with_framework(&framework, loader.clone());

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        context.register_listener(move |event: &PluginEvent| sink.lock().unwrap().push(event.clone()));

        Self {
            framework,
            loader,
            context,
            journal: Arc::new(Mutex::new(Vec::new())),
            events,
        }
    }

    pub fn runtime(&self, id: &str) -> TestRuntime {
        TestRuntime::new(id, &self.journal)
    }

    pub fn descriptor(id: &str, imports: &[&str]) -> PluginDescriptor {
        imports
            .iter()
            .fold(PluginDescriptor::new(id).with_version("1.0.0"), |descriptor, import| {
                descriptor.with_import(PluginImport::new(*import))
            })
            .with_runtime(format!("lib{}", id), Some("runtime"))
    }

    pub fn install(&self, id: &str, imports: &[&str]) {
        self.install_with(id, imports, self.runtime(id));
    }

    pub fn install_with(&self, id: &str, imports: &[&str], runtime: TestRuntime) {
        self.loader.add_runtime(&format!("lib{}", id), "runtime", runtime);
        self.context.install(Self::descriptor(id, imports)).unwrap();
    }

    /// Journal entries starting with `prefix`
    pub fn calls(&self, prefix: &str) -> Vec<String> {
        self.journal
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn transitions(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|event| format!("{}:{}->{}", event.plugin_id, event.old_state, event.new_state))
            .collect()
    }

    pub fn clear(&self) {
        self.journal.lock().unwrap().clear();
        self.events.lock().unwrap().clear();
    }
}
