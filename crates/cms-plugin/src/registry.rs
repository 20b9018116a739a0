//! Plugin registry — live plugin instances and their run state.

use std::collections::HashMap;
use std::fmt;
use std::mem::ManuallyDrop;
use std::sync::Arc;

use libloading::Library;
use parking_lot::Mutex;
use tracing::info;

use crate::error::PluginError;
use crate::traits::Plugin;

/// Whether a loaded plugin is currently started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    /// Loaded and initialized, not started.
    Registered,
    /// `start` succeeded and `stop` has not been called since.
    Running,
}

/// A loaded, initialized plugin.
pub(crate) struct LoadedPlugin {
    pub(crate) plugin: Arc<dyn Plugin>,
    pub(crate) state: PluginState,
    /// Serializes start/stop transitions for this plugin without holding the
    /// manager lock across plugin code.
    pub(crate) transition: Arc<Mutex<()>>,
    /// Never unloaded: hook closures and the instance itself may point into it.
    _library: Option<ManuallyDrop<Library>>,
}

impl LoadedPlugin {
    pub(crate) fn new(plugin: Arc<dyn Plugin>, library: Option<ManuallyDrop<Library>>) -> Self {
        Self {
            plugin,
            state: PluginState::Registered,
            transition: Arc::new(Mutex::new(())),
            _library: library,
        }
    }
}

impl fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("name", &self.plugin.name())
            .field("state", &self.state)
            .field("dynamic", &self._library.is_some())
            .finish()
    }
}

/// Registry of loaded plugins keyed by name.
#[derive(Debug, Default)]
pub(crate) struct PluginRegistry {
    plugins: HashMap<String, LoadedPlugin>,
}

impl PluginRegistry {
    /// Registers a plugin. Names are unique.
    pub(crate) fn insert(&mut self, entry: LoadedPlugin) -> Result<(), PluginError> {
        let name = entry.plugin.name().to_string();
        if self.plugins.contains_key(&name) {
            return Err(PluginError::DuplicatePlugin { name });
        }

        info!(
            plugin = %name,
            version = %entry.plugin.version(),
            "Registering plugin"
        );

        self.plugins.insert(name, entry);
        Ok(())
    }

    pub(crate) fn get(&self, name: &str) -> Option<&LoadedPlugin> {
        self.plugins.get(name)
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub(crate) fn set_state(&mut self, name: &str, state: PluginState) {
        if let Some(entry) = self.plugins.get_mut(name) {
            entry.state = state;
        }
    }

    /// All loaded plugin names, sorted.
    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of running plugins, sorted.
    pub(crate) fn running(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .plugins
            .iter()
            .filter(|(_, entry)| entry.state == PluginState::Running)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub(crate) fn len(&self) -> usize {
        self.plugins.len()
    }
}
