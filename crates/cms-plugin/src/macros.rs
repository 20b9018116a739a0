//! Macros for plugin development.

/// Exports a plugin type from a `cdylib` so the host's dynamic loader can
/// find it.
///
/// The type must implement [`Plugin`](crate::Plugin) and `Default`.
///
/// # Example
/// ```rust,ignore
/// #[derive(Debug, Default)]
/// struct SitemapPlugin;
///
/// impl Plugin for SitemapPlugin { /* ... */ }
///
/// cms_plugin::export_plugin!(SitemapPlugin);
/// ```
#[macro_export]
macro_rules! export_plugin {
    ($plugin_type:ty) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn _cms_plugin_api_version() -> u32 {
            $crate::ffi::abi::PLUGIN_API_VERSION
        }

        #[unsafe(no_mangle)]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn _cms_plugin_create() -> *mut dyn $crate::Plugin {
            let plugin: Box<dyn $crate::Plugin> = Box::new(<$plugin_type>::default());
            Box::into_raw(plugin)
        }
    };
}
