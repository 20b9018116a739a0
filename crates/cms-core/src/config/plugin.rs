//! Plugin runtime configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Plugin runtime configuration.
///
/// An empty `directory` disables discovery and an empty `config_file` keeps
/// the plugin store in memory only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Directory scanned (non-recursively) for plugin dynamic libraries.
    #[serde(default = "default_plugin_directory")]
    pub directory: String,
    /// JSON file holding persisted plugin metadata, enable flags and config blobs.
    #[serde(default = "default_config_file")]
    pub config_file: String,
    /// Whether to load plugins when the server boots.
    #[serde(default = "default_true")]
    pub auto_load: bool,
}

impl PluginConfig {
    /// Returns the plugin directory, or `None` when discovery is disabled.
    pub fn directory_path(&self) -> Option<PathBuf> {
        non_empty_path(&self.directory)
    }

    /// Returns the store file path, or `None` when the store is memory-only.
    pub fn config_file_path(&self) -> Option<PathBuf> {
        non_empty_path(&self.config_file)
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            directory: default_plugin_directory(),
            config_file: default_config_file(),
            auto_load: default_true(),
        }
    }
}

fn non_empty_path(raw: &str) -> Option<PathBuf> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(PathBuf::from(trimmed))
    }
}

fn default_plugin_directory() -> String {
    "./plugins".to_string()
}

fn default_config_file() -> String {
    "./data/plugins.json".to_string()
}

fn default_true() -> bool {
    true
}
