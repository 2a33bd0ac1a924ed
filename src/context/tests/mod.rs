//! Context Tests
//!
//! Exercise the resolver, lifecycle and symbol broker against mock native
//! modules. Every test runs against its own framework instance.



use std::sync::{Arc, Mutex, Once};

use crate::context::PluginContext;
use crate::descriptor::{PluginDescriptor, PluginImport};
use crate::events::{PluginEvent, Severity};
use crate::fatal::set_fatal_error_handler;
use crate::framework::Framework;
use mocks::{journal, Journal, MockLoader, MockRuntime};

static FATAL_PANICS: Once = Once::new();

/// Turn fatal errors into panics so tests can observe them
pub fn panic_on_fatal() {
    FATAL_PANICS.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
        set_fatal_error_handler(Some(Arc::new(|message: &str| panic!("fatal: {}", message))));
    });
}

pub struct Fixture {
    pub framework: Arc<Framework>,
    pub loader: Arc<MockLoader>,
    pub context: PluginContext,
    pub journal: Journal,
    pub events: Arc<Mutex<Vec<PluginEvent>>>,
    pub messages: Arc<Mutex<Vec<(Severity, String, Option<String>)>>>,
}

impl Fixture {
    pub fn new() -> Self {
        panic_on_fatal();
        let framework = Arc::new(Framework::new());
        framework.init();
        let journal = journal();
        let loader = Arc::new(MockLoader::new(&journal));
        let context = PluginContext::with_framework(&framework, loader.clone());

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        context.register_listener(move |event: &PluginEvent| sink.lock().unwrap().push(event.clone()));

        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&messages);
        context.register_logger(
            move |severity: Severity, message: &str, source: Option<&str>| {
                sink.lock()
                    .unwrap()
                    .push((severity, message.to_string(), source.map(str::to_string)))
            },
            Severity::Debug,
        );

        Self {
            framework,
            loader,
            context,
            journal,
            events,
            messages,
        }
    }

    /// Descriptor importing `imports` with a runtime in `lib<id>`
    pub fn descriptor(id: &str, imports: &[&str]) -> PluginDescriptor {
        imports
            .iter()
            .fold(PluginDescriptor::new(id).with_version("1.0.0"), |descriptor, import| {
                descriptor.with_import(PluginImport::new(*import))
            })
            .with_runtime(format!("lib{}", id), Some("runtime"))
    }

    pub fn runtime(&self, id: &str) -> MockRuntime {
        MockRuntime::new(id, &self.journal)
    }

    /// Install a plug-in backed by a default mock runtime
    pub fn install(&self, id: &str, imports: &[&str]) {
        self.install_with(Self::descriptor(id, imports), self.runtime(id));
    }

    /// Install a descriptor whose runtime library serves `runtime`
    pub fn install_with(&self, descriptor: PluginDescriptor, runtime: MockRuntime) {
        if let (Some(library), Some(entry)) = (&descriptor.runtime_lib, &descriptor.runtime_entry) {
            self.loader.add_runtime(library, entry, runtime);
        }
        self.context.install(descriptor).unwrap();
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    /// Journal entries starting with `prefix`
    pub fn calls(&self, prefix: &str) -> Vec<String> {
        self.journal()
            .into_iter()
            .filter(|entry| entry.starts_with(prefix))
            .collect()
    }

    /// Transitions as `id:OLD->NEW`
    pub fn transitions(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|event| format!("{}:{}->{}", event.plugin_id, event.old_state, event.new_state))
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
        self.journal.lock().unwrap().clear();
        self.messages.lock().unwrap().clear();
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(severity, _, _)| *severity == Severity::Error)
            .map(|(_, message, _)| message.clone())
            .collect()
    }

    pub fn assert_consistent(&self) {
        if let Err(violation) = self.context.check_invariants() {
            panic!("context invariant violated: {}", violation);
        }
    }
}

impl PluginContext {
    pub(crate) fn check_invariants(&self) -> Result<(), String> {
        let locked = self.inner.lock();
        let state = locked.state();
        state.check_invariants()
    }

    /// Identifiers of the plug-ins `id` currently imports, static and dynamic
    pub(crate) fn imported_ids(&self, id: &str) -> Vec<String> {
        let locked = self.inner.lock();
        let state = locked.state();
        let Some(key) = state.lookup(id) else {
            return Vec::new();
        };
        let ids: Vec<String> = state
            .record(key)
            .imported
            .iter()
            .map(|target| state.record(*target).id().to_string())
            .collect();
        ids
    }

    pub(crate) fn provided_usage(&self, id: &str) -> usize {
        let locked = self.inner.lock();
        let state = locked.state();
        let usage = state.lookup(id).map_or(0, |key| state.record(key).provided_usage);
        usage
    }
}
