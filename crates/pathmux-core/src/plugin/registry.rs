//! Name → constructor table used to turn plugin descriptors into plugins.

use super::builtin::{BannerPlugin, DefinePlugin, JsonPlugin, OpaquePlugin, VirtualPlugin};
use super::{Plugin, PluginDescriptor};
use crate::error::ConfigError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Builds a plugin from its configured options.
pub type PluginFactory = Arc<dyn Fn(&Value) -> Result<Arc<dyn Plugin>, String> + Send + Sync>;

/// Known plugin constructors.
///
/// Hosts register framework integrations (e.g. a single-file-component
/// compiler) here before the pipeline is assembled; the pipeline itself treats
/// them as opaque.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    factories: BTreeMap<String, PluginFactory>,
}

impl PluginRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in plugins: `json`, `define`, `virtual`,
    /// `banner`.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("json", |_| Ok(Arc::new(JsonPlugin) as Arc<dyn Plugin>));
        registry.register("define", |options| {
            DefinePlugin::from_options(options).map(|p| Arc::new(p) as Arc<dyn Plugin>)
        });
        registry.register("virtual", |options| {
            VirtualPlugin::from_options(options).map(|p| Arc::new(p) as Arc<dyn Plugin>)
        });
        registry.register("banner", |options| {
            BannerPlugin::from_options(options).map(|p| Arc::new(p) as Arc<dyn Plugin>)
        });
        registry
    }

    /// Register (or replace) a constructor under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Value) -> Result<Arc<dyn Plugin>, String> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Accept `name` in configs without running it. Options are ignored.
    pub fn register_opaque(&mut self, name: impl Into<String>) {
        let name = name.into();
        let plugin_name = name.clone();
        self.register(name, move |_| {
            Ok(Arc::new(OpaquePlugin::new(plugin_name.clone())) as Arc<dyn Plugin>)
        });
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.factories.keys().map(String::as_str)
    }

    /// Instantiate the plugin a descriptor names.
    pub fn create(&self, descriptor: &PluginDescriptor) -> Result<Arc<dyn Plugin>, ConfigError> {
        let factory = self
            .factories
            .get(&descriptor.name)
            .ok_or_else(|| ConfigError::UnknownPlugin {
                name: descriptor.name.clone(),
            })?;

        factory(&descriptor.options).map_err(|message| ConfigError::InvalidPluginOptions {
            name: descriptor.name.clone(),
            message,
        })
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}
