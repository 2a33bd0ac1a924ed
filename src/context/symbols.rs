//! Symbol Broker
//!
//! Every resolved symbol is recorded against the requesting plug-in (or the
//! host) and counted against its provider. A requester that does not import
//! the provider statically gets a dynamic import edge for as long as it holds
//! any of the provider's symbols, so stop and unresolve traversals see it.

use super::state::{SymbolInfo, SymbolProviderInfo};
use super::{Locked, PluginKey};
use crate::error::{RuntimeError, RuntimeResult};
use crate::events::Severity;
use crate::fatal::fatal;
use crate::loader::SymbolAddress;

impl Locked<'_> {
    pub(super) fn resolve_symbol(
        &self,
        requester: Option<PluginKey>,
        plugin_id: &str,
        name: &str,
    ) -> RuntimeResult<SymbolAddress> {
        let provider = self
            .state()
            .lookup(plugin_id)
            .ok_or_else(|| RuntimeError::unknown_plugin(plugin_id))?;
        self.start_plugin(provider)?;

        let address = {
            let state = self.state();
            let record = state.record(provider);
            record
                .defined_symbols
                .get(name)
                .copied()
                .or_else(|| record.module.as_ref().and_then(|module| module.lookup(name)))
        };
        let Some(address) = address else {
            return Err(RuntimeError::unknown_symbol(format!("{} in plug-in {}", name, plugin_id)));
        };

        let mut state = self.state_mut();
        let is_new = !state.symbols_mut(requester).providers.contains_key(&provider);
        if is_new {
            let imported = match requester {
                None => true,
                Some(key) => key == provider || state.record(key).imported.contains(&provider),
            };
            if let (Some(key), false) = (requester, imported) {
                state.add_edge(key, provider);
            }
            state.symbols_mut(requester).providers.insert(
                provider,
                SymbolProviderInfo {
                    imported,
                    ..SymbolProviderInfo::default()
                },
            );
        }

        let table = state.symbols_mut(requester);
        if let Some(info) = table.providers.get_mut(&provider) {
            info.usage_count += 1;
            info.symbols
                .entry(address)
                .or_insert_with(|| SymbolInfo {
                    name: name.to_string(),
                    usage_count: 0,
                })
                .usage_count += 1;
        }
        table.by_address.insert(address, provider);
        state.record_mut(provider).provided_usage += 1;
        Ok(address)
    }

    pub(super) fn release_symbol(&self, requester: Option<PluginKey>, address: SymbolAddress) {
        let mut state = self.state_mut();
        let table = state.symbols_mut(requester);
        let Some(provider) = table.by_address.get(&address).copied() else {
            fatal!("release_symbol called with unknown symbol address {:?}", address);
        };
        let Some(info) = table.providers.get_mut(&provider) else {
            fatal!("internal error: no provider record for symbol address {:?}", address);
        };

        if let Some(symbol) = info.symbols.get_mut(&address) {
            symbol.usage_count -= 1;
            if symbol.usage_count == 0 {
                info.symbols.remove(&address);
                table.by_address.remove(&address);
            }
        }
        info.usage_count -= 1;
        let dynamic_edge = if info.usage_count == 0 {
            let imported = info.imported;
            table.providers.remove(&provider);
            !imported
        } else {
            false
        };

        if let Some(record) = state.records.get_mut(&provider) {
            record.provided_usage -= 1;
        }
        if let (Some(key), true) = (requester, dynamic_edge) {
            state.remove_edge(key, provider);
        }
    }

    pub(super) fn define_symbol(&self, key: PluginKey, name: &str, address: SymbolAddress) -> RuntimeResult<()> {
        let mut state = self.state_mut();
        let record = state.record_mut(key);
        if record.defined_symbols.contains_key(name) {
            return Err(RuntimeError::conflict(format!(
                "symbol {} is already defined by plug-in {}",
                name,
                record.id()
            )));
        }
        record.defined_symbols.insert(name.to_string(), address);
        Ok(())
    }

    /// Drop every symbol a plug-in resolved and every symbol it defined
    pub(super) fn release_plugin_symbols(&self, key: PluginKey) {
        let mut state = self.state_mut();
        let record = state.record_mut(key);
        let table = std::mem::take(&mut record.symbols);
        record.defined_symbols.clear();

        for (provider, info) in table.providers {
            if let Some(provider_record) = state.records.get_mut(&provider) {
                provider_record.provided_usage -= info.usage_count;
            }
            if !info.imported {
                state.remove_edge(key, provider);
            }
        }
    }

    /// Force-release everything the host still holds
    pub(super) fn release_host_symbols(&self) {
        let held = {
            let mut state = self.state_mut();
            let table = std::mem::take(&mut state.host_symbols);
            let mut held = 0;
            for (provider, info) in table.providers {
                if let Some(record) = state.records.get_mut(&provider) {
                    record.provided_usage -= info.usage_count;
                }
                held += info.usage_count;
            }
            held
        };
        if held > 0 {
            self.log_message(
                Severity::Warning,
                &format!("released {} symbol uses still held by the host", held),
                None,
            );
        }
    }
}
