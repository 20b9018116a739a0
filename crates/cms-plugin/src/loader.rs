//! Plugin module discovery and dynamic loading via `libloading`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;
use tracing::{debug, info, warn};

use crate::error::PluginError;
use crate::ffi::abi::{
    API_VERSION_SYMBOL, CREATE_SYMBOL, CreatePluginFn, PLUGIN_API_VERSION, PluginApiVersionFn,
};
use crate::traits::Plugin;

/// A plugin instance produced by a loader, not yet registered with the manager.
pub struct LoadedModule {
    /// The plugin instance.
    pub plugin: Arc<dyn Plugin>,
    /// The library the instance's code lives in, if any. Must outlive the
    /// instance and every hook it registers.
    pub library: Option<Library>,
}

impl fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModule")
            .field("plugin", &self.plugin.name())
            .field("dynamic", &self.library.is_some())
            .finish()
    }
}

/// Opens a plugin module file and validates its entry point.
pub trait ModuleLoader: Send + Sync + fmt::Debug {
    /// Opens `path` and returns the unregistered plugin it exports.
    fn open(&self, path: &Path) -> Result<LoadedModule, PluginError>;
}

/// Loads plugins from native dynamic libraries (`.so` / `.dylib` / `.dll`).
#[derive(Debug, Default)]
pub struct DynamicLoader;

impl DynamicLoader {
    /// Creates a new dynamic loader.
    pub fn new() -> Self {
        Self
    }
}

impl ModuleLoader for DynamicLoader {
    fn open(&self, path: &Path) -> Result<LoadedModule, PluginError> {
        // SAFETY: loading a library runs its initializers. Only modules placed
        // in the configured plugin directory by an administrator are opened.
        let library = unsafe { Library::new(path) }.map_err(|source| PluginError::ModuleOpen {
            path: path.to_path_buf(),
            source,
        })?;

        let plugin = {
            // SAFETY: the symbol type matches what `export_plugin!` generates.
            let version_fn = unsafe { library.get::<PluginApiVersionFn>(API_VERSION_SYMBOL) }
                .map_err(|e| {
                    PluginError::invalid_module(path, format!("missing API version symbol: {e}"))
                })?;

            // SAFETY: the export takes no arguments and returns a plain integer.
            let found = unsafe { version_fn() };
            if found != PLUGIN_API_VERSION {
                return Err(PluginError::invalid_module(
                    path,
                    format!("API version mismatch: host expects {PLUGIN_API_VERSION}, module has {found}"),
                ));
            }

            // SAFETY: the version check above guarantees the module was built
            // against the same plugin ABI.
            let create_fn = unsafe { library.get::<CreatePluginFn>(CREATE_SYMBOL) }.map_err(|e| {
                PluginError::invalid_module(path, format!("missing create symbol: {e}"))
            })?;

            // SAFETY: the create export hands over ownership of a boxed plugin.
            let raw = unsafe { create_fn() };
            if raw.is_null() {
                return Err(PluginError::invalid_module(
                    path,
                    "create symbol returned a null plugin",
                ));
            }

            // SAFETY: `raw` came from `Box::into_raw` in the module and is non-null.
            let boxed: Box<dyn Plugin> = unsafe { Box::from_raw(raw) };
            Arc::<dyn Plugin>::from(boxed)
        };

        info!(
            path = %path.display(),
            plugin = %plugin.name(),
            version = %plugin.version(),
            "Dynamic plugin module opened"
        );

        Ok(LoadedModule {
            plugin,
            library: Some(library),
        })
    }
}

/// Returns whether `path` is a regular file carrying the platform's native
/// dynamic-library extension.
pub fn is_plugin_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .is_some_and(|ext| ext == std::env::consts::DLL_EXTENSION)
}

/// Lists plugin candidates in `dir` (non-recursive), sorted by file name.
///
/// Entries without the dynamic-library extension are skipped silently.
pub fn discover(dir: &Path) -> Result<Vec<PathBuf>, PluginError> {
    let entries = std::fs::read_dir(dir).map_err(|source| PluginError::PluginDirectory {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.path()),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Unreadable plugin directory entry");
                None
            }
        })
        .filter(|path| is_plugin_file(path))
        .collect();
    candidates.sort();

    debug!(dir = %dir.display(), candidates = candidates.len(), "Plugin directory scanned");
    Ok(candidates)
}
