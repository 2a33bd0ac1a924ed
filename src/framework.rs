//! Framework Singleton
//!
//! Process-wide state shared by all contexts: the initialization count, the
//! logger list and the use-counted information registry. Everything here is
//! guarded by the framework lock, which is reentrant for the owning thread and
//! never held while calling out to loggers or into a context.

use std::cell::RefCell;
use std::sync::{Arc, LazyLock, Weak};

use log::{debug, info};
use parking_lot::ReentrantMutex;

use crate::context::ContextInner;
use crate::events::{Logger, LoggerId, Severity};
use crate::fatal::fatal;
use crate::info::{address_of, Deallocator, RefRegistry};

static GLOBAL: LazyLock<Arc<Framework>> = LazyLock::new(|| Arc::new(Framework::new()));

struct LoggerEntry {
    id: LoggerId,
    logger: Arc<dyn Logger>,
    min_severity: Severity,
    /// Only messages from this context are delivered, when set
    context: Option<u64>,
}

#[derive(Default)]
struct FrameworkState {
    init_count: usize,
    /// Incremented on every full teardown; info handles from an older
    /// generation no longer own a registry count
    generation: u64,
    next_id: u64,
    loggers: Vec<LoggerEntry>,
    infos: RefRegistry,
    contexts: Vec<(u64, Weak<ContextInner>)>,
}

/// Process-wide runtime state
pub struct Framework {
    state: ReentrantMutex<RefCell<FrameworkState>>,
}

impl Framework {
    /// Create a framework instance separate from the global one
    pub fn new() -> Self {
        Self {
            state: ReentrantMutex::new(RefCell::new(FrameworkState::default())),
        }
    }

    /// The framework instance used by [`crate::init`] and [`crate::destroy`]
    pub fn global() -> &'static Arc<Framework> {
        &GLOBAL
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut FrameworkState) -> R) -> R {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    /// Increment the initialization count
    pub fn init(&self) {
        let count = self.with_state(|state| {
            state.init_count += 1;
            state.init_count
        });
        if count == 1 {
            info!(target: "pluginrt", "plug-in framework initialized (ABI {})", crate::abi_version());
        } else {
            debug!(target: "pluginrt", "plug-in framework initialization count is now {}", count);
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.with_state(|state| state.init_count > 0)
    }

    /// Decrement the initialization count, tearing everything down at zero
    pub fn destroy(&self) {
        let contexts = self.with_state(|state| {
            if state.init_count == 0 {
                fatal!("destroy called without a matching init");
            }
            state.init_count -= 1;
            if state.init_count > 0 {
                return None;
            }
            Some(std::mem::take(&mut state.contexts))
        });
        let Some(contexts) = contexts else {
            return;
        };

        // contexts are torn down without the framework lock held
        for context in contexts.into_iter().filter_map(|(_, weak)| weak.upgrade()) {
            context.teardown();
        }

        let pending = self.with_state(|state| {
            state.loggers.clear();
            state.generation += 1;
            state.infos.destroy_all()
        });
        if !pending.is_empty() {
            debug!(target: "pluginrt", "released {} outstanding information objects", pending.len());
        }
        for dealloc in pending {
            dealloc();
        }
        info!(target: "pluginrt", "plug-in framework destroyed");
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.with_state(|state| {
            state.next_id += 1;
            state.next_id
        })
    }

    pub(crate) fn attach_context(&self, id: u64, context: Weak<ContextInner>) {
        if !self.is_initialized() {
            fatal!("a plug-in context was created before the framework was initialized");
        }
        self.with_state(|state| state.contexts.push((id, context)));
    }

    pub(crate) fn detach_context(&self, id: u64) {
        self.with_state(|state| state.contexts.retain(|(context_id, _)| *context_id != id));
    }

    pub(crate) fn register_logger(
        &self,
        logger: Arc<dyn Logger>,
        min_severity: Severity,
        context: Option<u64>,
    ) -> LoggerId {
        self.with_state(|state| {
            state.next_id += 1;
            let id = LoggerId(state.next_id);
            state.loggers.push(LoggerEntry {
                id,
                logger,
                min_severity,
                context,
            });
            id
        })
    }

    /// Returns `false` if the logger was not registered
    pub(crate) fn unregister_logger(&self, id: LoggerId) -> bool {
        self.with_state(|state| {
            let before = state.loggers.len();
            state.loggers.retain(|entry| entry.id != id);
            state.loggers.len() != before
        })
    }

    /// Loggers interested in a message from `context` at `severity`, in registration order
    pub(crate) fn loggers_for(&self, context: u64, severity: Severity) -> Vec<Arc<dyn Logger>> {
        self.with_state(|state| {
            state
                .loggers
                .iter()
                .filter(|entry| severity >= entry.min_severity)
                .filter(|entry| entry.context.map_or(true, |id| id == context))
                .map(|entry| Arc::clone(&entry.logger))
                .collect()
        })
    }

    pub(crate) fn is_logged(&self, context: u64, severity: Severity) -> bool {
        self.with_state(|state| {
            state.loggers.iter().any(|entry| {
                severity >= entry.min_severity && entry.context.map_or(true, |id| id == context)
            })
        })
    }

    pub(crate) fn register_info<T: Send + Sync + 'static>(&self, value: &Arc<T>) -> u64 {
        let keep = Arc::clone(value);
        let (generation, discarded) = self.with_state(|state| {
            let discarded = state.infos.register(address_of(value), Box::new(move || drop(keep)));
            (state.generation, discarded)
        });
        drop(discarded);
        generation
    }

    /// Use an object by raw address
    pub(crate) fn use_info(&self, address: usize) {
        self.with_state(|state| state.infos.use_ref(address));
    }

    /// Release an object by raw address
    pub(crate) fn release_info(&self, address: usize) {
        let dealloc = self.with_state(|state| state.infos.release(address));
        run(dealloc);
    }

    pub(crate) fn use_owned_info(&self, address: usize, generation: u64) {
        self.with_state(|state| {
            if state.generation == generation {
                state.infos.use_ref(address);
            }
        });
    }

    pub(crate) fn release_owned_info(&self, address: usize, generation: u64) {
        let dealloc = self.with_state(|state| {
            if state.generation == generation {
                state.infos.release(address)
            } else {
                None
            }
        });
        run(dealloc);
    }

    pub(crate) fn info_count(&self, address: usize) -> Option<usize> {
        self.with_state(|state| state.infos.count(address))
    }
}

fn run(dealloc: Option<Deallocator>) {
    if let Some(dealloc) = dealloc {
        dealloc();
    }
}
