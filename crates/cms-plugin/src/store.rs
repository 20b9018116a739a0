//! Plugin store — persisted metadata, enable flag and config blob per plugin.
//!
//! Stored as one JSON object keyed by plugin name. The file is rewritten in
//! full on every state change, through a temporary file in the same directory
//! followed by a rename.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;
use tracing::info;

use crate::error::PluginError;
use crate::traits::Plugin;

/// Persisted information about a plugin, independent of whether its module
/// is currently loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Unique plugin name. Filled from the store key when missing.
    #[serde(default)]
    pub name: String,
    /// Plugin version string.
    #[serde(default)]
    pub version: String,
    /// Plugin description.
    #[serde(default)]
    pub description: String,
    /// Author or maintainer.
    #[serde(default)]
    pub author: String,
    /// Whether the plugin should be running.
    #[serde(default)]
    pub enabled: bool,
    /// Opaque plugin-owned configuration. Never validated by the host.
    #[serde(default)]
    pub config: ConfigBlob,
}

impl PluginInfo {
    /// Default-disabled info describing a freshly loaded plugin.
    pub fn from_plugin(plugin: &dyn Plugin) -> Self {
        Self {
            name: plugin.name().to_string(),
            version: plugin.version().to_string(),
            description: plugin.description().to_string(),
            author: plugin.author().to_string(),
            enabled: false,
            config: ConfigBlob::default(),
        }
    }
}

/// A plugin's config blob, kept as the exact JSON text it was stored or set
/// with. Saving the store writes it back byte for byte, so key order and
/// number precision are whatever the plugin chose.
#[derive(Clone, PartialEq, Eq)]
pub struct ConfigBlob(String);

impl ConfigBlob {
    /// Wraps JSON text without re-encoding it. Fails if `text` is not JSON.
    pub fn from_json(text: impl Into<String>) -> Result<Self, serde_json::Error> {
        let text = text.into();
        let raw: &RawValue = serde_json::from_str(&text)?;
        Ok(Self(raw.get().to_string()))
    }

    /// The stored JSON text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses the blob into a JSON value.
    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.0)
    }

    /// Parses the blob into a plugin-defined type.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.0)
    }
}

impl Default for ConfigBlob {
    fn default() -> Self {
        Self("{}".to_string())
    }
}

impl From<serde_json::Value> for ConfigBlob {
    fn from(value: serde_json::Value) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Debug for ConfigBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for ConfigBlob {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let raw: &RawValue = serde_json::from_str(&self.0).map_err(<S::Error as serde::ser::Error>::custom)?;
        raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ConfigBlob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Box::<RawValue>::deserialize(deserializer)?;
        Ok(Self(raw.get().to_string()))
    }
}

/// In-memory plugin store, keyed by plugin name.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PluginStore {
    entries: BTreeMap<String, PluginInfo>,
}

impl PluginStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the store from `path`.
    ///
    /// A missing file yields an empty store, which is written out immediately.
    pub fn load(path: &Path) -> Result<Self, PluginError> {
        if !path.exists() {
            let store = Self::new();
            store.save(path)?;
            info!(path = %path.display(), "Created empty plugin store");
            return Ok(store);
        }

        let content = std::fs::read(path).map_err(|e| PluginError::persistence(path, e))?;
        let mut entries: BTreeMap<String, PluginInfo> =
            serde_json::from_slice(&content).map_err(|e| PluginError::persistence(path, e))?;
        for (key, info) in entries.iter_mut() {
            if info.name.is_empty() {
                info.name = key.clone();
            }
        }

        info!(path = %path.display(), plugins = entries.len(), "Plugin store loaded");
        Ok(Self { entries })
    }

    /// Writes the full store to `path`.
    pub fn save(&self, path: &Path) -> Result<(), PluginError> {
        let bytes = self.to_json(path)?;
        write_atomic(path, &bytes)
    }

    /// Serializes the store as pretty JSON. `path` is only used for errors.
    pub fn to_json(&self, path: &Path) -> Result<Vec<u8>, PluginError> {
        serde_json::to_vec_pretty(&self.entries).map_err(|e| PluginError::persistence(path, e))
    }

    /// Returns the info for `name`.
    pub fn get(&self, name: &str) -> Option<&PluginInfo> {
        self.entries.get(name)
    }

    /// Returns the mutable info for `name`.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut PluginInfo> {
        self.entries.get_mut(name)
    }

    /// Inserts or replaces an entry.
    pub fn insert(&mut self, info: PluginInfo) {
        self.entries.insert(info.name.clone(), info);
    }

    /// Returns whether an entry exists for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Iterates entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = &PluginInfo> {
        self.entries.values()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Atomically replaces `path` with `bytes`, creating parent directories.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PluginError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    std::fs::create_dir_all(parent).map_err(|e| PluginError::persistence(path, e))?;

    let mut file =
        tempfile::NamedTempFile::new_in(parent).map_err(|e| PluginError::persistence(path, e))?;
    file.write_all(bytes)
        .map_err(|e| PluginError::persistence(path, e))?;
    file.as_file()
        .sync_all()
        .map_err(|e| PluginError::persistence(path, e))?;
    file.persist(path)
        .map_err(|e| PluginError::persistence(path, e.error))?;

    Ok(())
}
