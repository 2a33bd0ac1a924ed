//! Context Data Model
//!
//! Plug-in records live in an arena keyed by [`PluginKey`]; import edges are
//! pairs of keys, never owning references. Keys are never reused within a
//! context, so a stale key is detected instead of aliasing a newer record.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::descriptor::PluginDescriptor;
use crate::events::PluginState;
use crate::fatal::fatal;
use crate::loader::{NativeModule, PluginInstance, PluginRuntime, SymbolAddress};

/// Arena handle of an installed plug-in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct PluginKey(pub(crate) u64);

impl fmt::Display for PluginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A symbol resolved from one provider
#[derive(Debug, Clone)]
pub(crate) struct SymbolInfo {
    pub(crate) name: String,
    pub(crate) usage_count: usize,
}

/// Symbols one requester holds from one provider
#[derive(Debug, Clone, Default)]
pub(crate) struct SymbolProviderInfo {
    /// The requester statically imports the provider (or is the host or the provider itself)
    pub(crate) imported: bool,
    /// Sum of the per-symbol usage counts
    pub(crate) usage_count: usize,
    pub(crate) symbols: HashMap<SymbolAddress, SymbolInfo>,
}

/// Resolved-symbol table of one requester
#[derive(Debug, Default)]
pub(crate) struct ResolvedSymbols {
    pub(crate) providers: BTreeMap<PluginKey, SymbolProviderInfo>,
    pub(crate) by_address: HashMap<SymbolAddress, PluginKey>,
}

impl ResolvedSymbols {
    /// Usage this table holds on `provider`
    pub(crate) fn usage_of(&self, provider: PluginKey) -> usize {
        self.providers.get(&provider).map_or(0, |info| info.usage_count)
    }
}

/// Mutable per-plug-in state
pub(crate) struct PluginRecord {
    pub(crate) descriptor: Arc<PluginDescriptor>,
    pub(crate) state: PluginState,
    /// Forward edges, static imports in declaration order followed by dynamic ones
    pub(crate) imported: Vec<PluginKey>,
    /// Back edges, the inverse of `imported`
    pub(crate) importing: Vec<PluginKey>,
    pub(crate) module: Option<Box<dyn NativeModule>>,
    pub(crate) runtime: Option<Arc<dyn PluginRuntime>>,
    pub(crate) instance: Option<PluginInstance>,
    pub(crate) defined_symbols: HashMap<String, SymbolAddress>,
    /// Symbols this plug-in resolved from others
    pub(crate) symbols: ResolvedSymbols,
    /// Usage count of symbols this plug-in provides to others
    pub(crate) provided_usage: usize,
    /// Set only while a recursive traversal is inside this plug-in
    pub(crate) processed: bool,
}

impl PluginRecord {
    pub(crate) fn new(descriptor: Arc<PluginDescriptor>) -> Self {
        Self {
            descriptor,
            state: PluginState::Installed,
            imported: Vec::new(),
            importing: Vec::new(),
            module: None,
            runtime: None,
            instance: None,
            defined_symbols: HashMap::new(),
            symbols: ResolvedSymbols::default(),
            provided_usage: 0,
            processed: false,
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.descriptor.identifier
    }
}

/// Registered extension point: declaring plug-in and index into its descriptor
#[derive(Debug, Clone)]
pub(crate) struct ExtPointEntry {
    pub(crate) plugin: PluginKey,
    pub(crate) index: usize,
}

/// Registered extension
#[derive(Debug, Clone)]
pub(crate) struct ExtensionEntry {
    pub(crate) plugin: PluginKey,
    pub(crate) index: usize,
}

/// Everything guarded by the context lock
#[derive(Default)]
pub(crate) struct ContextState {
    next_key: u64,
    pub(crate) plugins: HashMap<String, PluginKey>,
    /// Ordered by key, which is installation order
    pub(crate) records: BTreeMap<PluginKey, PluginRecord>,
    pub(crate) ext_points: HashMap<String, ExtPointEntry>,
    /// Keyed by extension point id, in installation order
    pub(crate) extensions: HashMap<String, Vec<ExtensionEntry>>,
    /// Active plug-ins in the order they were started
    pub(crate) started: Vec<PluginKey>,
    /// Plug-ins inside a start walk, including walks nested in entry points
    pub(crate) starting: Vec<PluginKey>,
    /// Symbols resolved by the host through a context handle without plug-in identity
    pub(crate) host_symbols: ResolvedSymbols,
}

impl ContextState {
    pub(crate) fn allocate_key(&mut self) -> PluginKey {
        self.next_key += 1;
        PluginKey(self.next_key)
    }

    pub(crate) fn lookup(&self, id: &str) -> Option<PluginKey> {
        self.plugins.get(id).copied()
    }

    pub(crate) fn contains(&self, key: PluginKey) -> bool {
        self.records.contains_key(&key)
    }

    pub(crate) fn record(&self, key: PluginKey) -> &PluginRecord {
        match self.records.get(&key) {
            Some(record) => record,
            None => fatal!("internal error: stale plug-in reference {}", key),
        }
    }

    pub(crate) fn record_mut(&mut self, key: PluginKey) -> &mut PluginRecord {
        match self.records.get_mut(&key) {
            Some(record) => record,
            None => fatal!("internal error: stale plug-in reference {}", key),
        }
    }

    pub(crate) fn state_of(&self, key: PluginKey) -> PluginState {
        self.record(key).state
    }

    /// Resolved-symbol table of a requester; `None` is the host
    pub(crate) fn symbols_mut(&mut self, requester: Option<PluginKey>) -> &mut ResolvedSymbols {
        match requester {
            Some(key) => &mut self.record_mut(key).symbols,
            None => &mut self.host_symbols,
        }
    }

    /// Add the edge pair `from -> to` unless it already exists
    pub(crate) fn add_edge(&mut self, from: PluginKey, to: PluginKey) {
        let importer = self.record_mut(from);
        if importer.imported.contains(&to) {
            return;
        }
        importer.imported.push(to);
        let target = self.record_mut(to);
        if !target.importing.contains(&from) {
            target.importing.push(from);
        }
    }

    /// Remove the edge pair `from -> to`
    pub(crate) fn remove_edge(&mut self, from: PluginKey, to: PluginKey) {
        if let Some(importer) = self.records.get_mut(&from) {
            importer.imported.retain(|key| *key != to);
        }
        if let Some(target) = self.records.get_mut(&to) {
            target.importing.retain(|key| *key != from);
        }
    }

    /// Remove every forward edge of `key` together with its back edges
    pub(crate) fn clear_imports(&mut self, key: PluginKey) {
        let imported = std::mem::take(&mut self.record_mut(key).imported);
        for target in imported {
            if let Some(record) = self.records.get_mut(&target) {
                record.importing.retain(|k| *k != key);
            }
        }
    }

    /// Usage of `provider` held by requesters currently on a traversal stack
    pub(crate) fn usage_held_by_processed(&self, provider: PluginKey) -> usize {
        self.records
            .values()
            .filter(|record| record.processed)
            .map(|record| record.symbols.usage_of(provider))
            .sum()
    }

    /// Check the data model invariants; returns the first violation found
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) -> Result<(), String> {
        for (key, record) in &self.records {
            if record.processed {
                return Err(format!("{} left with processed flag set", record.id()));
            }
            if self.starting.contains(key) {
                return Err(format!("{} left on the start stack", record.id()));
            }
            if (record.state >= PluginState::Resolved) != record.module.is_some()
                && record.descriptor.runtime_lib.is_some()
            {
                return Err(format!("{} module presence does not match state {}", record.id(), record.state));
            }
            for target in &record.imported {
                let Some(other) = self.records.get(target) else {
                    return Err(format!("{} imports a stale key {}", record.id(), target));
                };
                if !other.importing.contains(key) {
                    return Err(format!("edge {} -> {} has no back edge", record.id(), other.id()));
                }
            }
            for source in &record.importing {
                let Some(other) = self.records.get(source) else {
                    return Err(format!("{} is imported by a stale key {}", record.id(), source));
                };
                if !other.imported.contains(key) {
                    return Err(format!("back edge {} <- {} has no forward edge", record.id(), other.id()));
                }
            }
            let held: usize = self
                .records
                .values()
                .map(|r| r.symbols.usage_of(*key))
                .sum::<usize>()
                + self.host_symbols.usage_of(*key);
            if held != record.provided_usage {
                return Err(format!(
                    "{} provides {} symbol uses but requesters hold {}",
                    record.id(),
                    record.provided_usage,
                    held
                ));
            }
            for info in record.symbols.providers.values() {
                let sum: usize = info.symbols.values().map(|s| s.usage_count).sum();
                if sum != info.usage_count {
                    return Err(format!("{} symbol provider usage {} != {}", record.id(), info.usage_count, sum));
                }
            }
        }
        Ok(())
    }
}
