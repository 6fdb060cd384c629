//! Explicit, non-global plugin registry (§4.5, §9).
//!
//! The source this crate grew from keeps the plugin list, the
//! extension-id counter, and the indexer instance as module-level mutable
//! globals (`g_ipxp_plugins`, `g_ipxp_ext_cnt`). Per the redesign note in
//! §9, this is instead a builder that is constructed once at startup and
//! consumed into an immutable registry passed by reference; the counter
//! is a plain field on the builder, touched only while registering.

use super::ProcessPlugin;
use std::sync::Arc;

type PluginFactory = Arc<dyn Fn() -> Box<dyn ProcessPlugin> + Send + Sync>;

pub struct PluginRegistryBuilder {
    next_extension_id: u16,
    names: Vec<String>,
    factories: Vec<PluginFactory>,
}

impl Default for PluginRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginRegistryBuilder {
    pub fn new() -> Self {
        Self {
            next_extension_id: 0,
            names: Vec::new(),
            factories: Vec::new(),
        }
    }

    /// Registers a plugin factory and assigns it the next dense extension
    /// id (§4.5: "Extension ids are dense and small"). `factory` is
    /// called once per flow-cache shard to produce an independent
    /// instance; it receives the assigned id so the plugin can stamp its
    /// extensions with it.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> u16
    where
        F: Fn(u16) -> Box<dyn ProcessPlugin> + Send + Sync + 'static,
    {
        let id = self.next_extension_id;
        self.next_extension_id += 1;
        self.names.push(name.into());
        self.factories.push(Arc::new(move || factory(id)));
        id
    }

    pub fn build(self) -> PluginRegistry {
        PluginRegistry {
            names: self.names,
            factories: self.factories,
        }
    }
}

/// Immutable after construction, shared process-wide (§5). Does not hold
/// plugin state itself — `instantiate_for_shard` produces a fresh,
/// independently-mutable instance of every registered plugin, in
/// registration order, for one flow-cache shard.
pub struct PluginRegistry {
    names: Vec<String>,
    factories: Vec<PluginFactory>,
}

impl PluginRegistry {
    pub fn plugin_names(&self) -> &[String] {
        &self.names
    }

    pub fn extension_count(&self) -> usize {
        self.factories.len()
    }

    pub fn instantiate_for_shard(&self) -> Vec<Box<dyn ProcessPlugin>> {
        self.factories.iter().map(|f| f()).collect()
    }
}
