//! Plugin registry, name to plugin, built once at startup.
//!
//! Names are unique. A second registration under an existing name is
//! rejected with [`RegistryError::Duplicate`] and the first plugin stays in
//! place; startup treats that as fatal, the same way a misconfigured build
//! would be.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;

use crate::plugins::Plugin;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("plugin name must not be empty")]
    EmptyName,

    #[error("duplicate plugin name: {0:?}")]
    Duplicate(String),
}

/// A plugin plus its recognised parameter names, computed at registration.
#[derive(Clone)]
pub struct RegisteredPlugin {
    plugin: Arc<dyn Plugin>,
    accepted: HashSet<&'static str>,
}

impl RegisteredPlugin {
    fn new(plugin: Arc<dyn Plugin>) -> Self {
        let accepted = plugin.params().iter().map(|p| p.name).collect();
        Self { plugin, accepted }
    }

    pub fn plugin(&self) -> &Arc<dyn Plugin> {
        &self.plugin
    }

    pub fn accepts(&self, arg: &str) -> bool {
        self.accepted.contains(arg)
    }
}

#[derive(Default)]
pub struct Registry {
    plugins: HashMap<String, RegisteredPlugin>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a constructor list, stopping at the first error.
    pub fn from_plugins<I>(plugins: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = Box<dyn Plugin>>,
    {
        let mut registry = Self::new();
        for plugin in plugins {
            registry.register(Arc::from(plugin))?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Result<(), RegistryError> {
        let name = plugin.name().to_string();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.plugins.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.plugins.insert(name, RegisteredPlugin::new(plugin));
        Ok(())
    }

    /// `None` means "no such plugin", distinct from a plugin that returned
    /// an empty result.
    pub fn lookup(&self, name: &str) -> Option<&RegisteredPlugin> {
        self.plugins.get(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugins.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
