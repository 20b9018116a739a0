//! ABI shared between the host and dynamically loaded plugin modules.
//!
//! A module exports two unmangled symbols, generated by
//! [`export_plugin!`](crate::export_plugin). Both sides must be built with
//! the same compiler and the same `cms-plugin` version: the plugin instance
//! crosses the boundary as a Rust trait object.

use crate::traits::Plugin;

/// Version of the plugin ABI. Modules reporting a different value are rejected.
pub const PLUGIN_API_VERSION: u32 = 1;

/// Symbol returning the module's [`PLUGIN_API_VERSION`].
pub const API_VERSION_SYMBOL: &[u8] = b"_cms_plugin_api_version\0";

/// Symbol returning a heap-allocated plugin instance.
pub const CREATE_SYMBOL: &[u8] = b"_cms_plugin_create\0";

/// Signature of the API-version export.
pub type PluginApiVersionFn = unsafe extern "C" fn() -> u32;

/// Signature of the create export. Ownership of the box passes to the host.
#[allow(improper_ctypes_definitions)]
pub type CreatePluginFn = unsafe extern "C" fn() -> *mut dyn Plugin;
