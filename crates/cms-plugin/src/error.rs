//! Plugin runtime error taxonomy.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use cms_core::error::{AppError, ErrorKind};

/// Plugin lifecycle stage that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStage {
    /// `Plugin::init`, called once after the module is loaded.
    Init,
    /// `Plugin::start`, called on boot (if enabled) and on enable.
    Start,
    /// `Plugin::stop`, called on disable and on shutdown.
    Stop,
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
        }
    }
}

/// Errors raised by the plugin runtime.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The dynamic library could not be opened.
    #[error("Failed to open plugin module '{}': {source}", path.display())]
    ModuleOpen {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    /// The module opened but does not export a conforming entry point.
    #[error("Invalid plugin module '{}': {reason}", path.display())]
    InvalidModule { path: PathBuf, reason: String },

    /// A plugin with the same name is already loaded.
    #[error("Plugin '{name}' is already loaded")]
    DuplicatePlugin { name: String },

    /// Lifecycle or config call on a name the manager does not know.
    #[error("Plugin '{name}' not found")]
    PluginNotFound { name: String },

    /// `init`, `start` or `stop` returned an error or panicked.
    #[error("Plugin '{name}' {stage} failed: {reason}")]
    Lifecycle {
        name: String,
        stage: LifecycleStage,
        reason: String,
    },

    /// The plugin store file could not be read, parsed or written.
    #[error("Plugin store '{}' error: {reason}", path.display())]
    Persistence { path: PathBuf, reason: String },

    /// The plugin directory could not be created or listed.
    #[error("Plugin directory '{}' error: {source}", path.display())]
    PluginDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PluginError {
    pub(crate) fn not_found(name: &str) -> Self {
        Self::PluginNotFound {
            name: name.to_string(),
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::Persistence {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid_module(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidModule {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<PluginError> for AppError {
    fn from(err: PluginError) -> Self {
        let kind = match &err {
            PluginError::PluginNotFound { .. } => ErrorKind::NotFound,
            PluginError::DuplicatePlugin { .. } => ErrorKind::Conflict,
            PluginError::Persistence { .. } | PluginError::PluginDirectory { .. } => {
                ErrorKind::Storage
            }
            PluginError::ModuleOpen { .. }
            | PluginError::InvalidModule { .. }
            | PluginError::Lifecycle { .. } => ErrorKind::Plugin,
        };
        AppError::with_source(kind, err.to_string(), err)
    }
}
