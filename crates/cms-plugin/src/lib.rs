//! # cms-plugin
//!
//! Plugin runtime for the CMS host. Provides:
//!
//! - Discovery and loading of plugin modules from a directory via `libloading`
//! - A persisted plugin store holding each plugin's enable flag and config blob
//! - Plugin lifecycle management (init, start, stop) with rollback on failed saves
//! - A hook table with priority-ordered, snapshot-based dispatch

pub mod error;
pub mod ffi;
pub mod hooks;
pub mod loader;
pub mod macros;
pub mod manager;
pub mod prelude;
pub mod registry;
pub mod store;
pub mod traits;

pub use error::{LifecycleStage, PluginError};
pub use ffi::abi::PLUGIN_API_VERSION;
pub use hooks::definitions::{Hook, HookCallback, HookValue, downcast_arg, downcast_value, hook_value};
pub use hooks::registry::HookTable;
pub use loader::{DynamicLoader, LoadedModule, ModuleLoader};
pub use manager::{LoadReport, PluginManager};
pub use registry::PluginState;
pub use store::{ConfigBlob, PluginInfo, PluginStore};
pub use traits::Plugin;
