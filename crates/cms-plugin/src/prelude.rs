//! Prelude for convenient imports.

pub use crate::error::PluginError;
pub use crate::ffi::abi::PLUGIN_API_VERSION;
pub use crate::hooks::definitions::{Hook, HookValue, downcast_arg, downcast_value, hook_value};
pub use crate::manager::PluginManager;
pub use crate::store::{ConfigBlob, PluginInfo};
pub use crate::traits::Plugin;

pub use crate::export_plugin;
