//! Plugin loading
//!
//! Loading is deliberately indirect: the engine asks a [`PluginLoader`] to
//! turn a descriptor into executable code, and the default [`FactoryLoader`]
//! resolves identifiers against registered factories. Descriptors that
//! declare a `command` template fall back to the generic command runner, so
//! new command-backed diagnostics need no code at all.

use crate::core::error::{NetProbeError, Result};
use crate::plugin::builtin::{self, CommandPlugin};
use crate::plugin::descriptor::{PluginDescriptor, PluginId};
use crate::plugin::instance::DiagnosticPlugin;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Builds a plugin from its descriptor.
pub type PluginFactory =
    Arc<dyn Fn(&PluginDescriptor) -> Result<Arc<dyn DiagnosticPlugin>> + Send + Sync>;

/// Turns descriptors into runnable plugins.
pub trait PluginLoader: Send + Sync {
    fn load(&self, descriptor: &PluginDescriptor) -> Result<Arc<dyn DiagnosticPlugin>>;
}

/// Loader backed by a factory table keyed on plugin identifier.
pub struct FactoryLoader {
    factories: HashMap<PluginId, PluginFactory>,
}

impl FactoryLoader {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Loader with all builtin diagnostics registered.
    pub fn with_builtins() -> Self {
        let mut loader = Self::new();
        builtin::register_builtins(&mut loader);
        loader
    }

    pub fn register<F>(&mut self, identifier: impl Into<PluginId>, factory: F)
    where
        F: Fn(&PluginDescriptor) -> Result<Arc<dyn DiagnosticPlugin>> + Send + Sync + 'static,
    {
        let identifier = identifier.into();
        debug!(plugin = %identifier, "registered plugin factory");
        self.factories.insert(identifier, Arc::new(factory));
    }

    pub fn has_factory(&self, identifier: &str) -> bool {
        self.factories.contains_key(identifier)
    }
}

impl Default for FactoryLoader {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl PluginLoader for FactoryLoader {
    fn load(&self, descriptor: &PluginDescriptor) -> Result<Arc<dyn DiagnosticPlugin>> {
        if let Some(factory) = self.factories.get(&descriptor.name) {
            return factory(descriptor);
        }
        if descriptor.command.is_some() {
            return Ok(Arc::new(CommandPlugin::from_descriptor(descriptor)?));
        }
        Err(NetProbeError::PluginLoadError(format!(
            "no factory registered for '{}' and descriptor declares no command",
            descriptor.name
        )))
    }
}
