//! # cms-plugin-sdk
//!
//! SDK for developing plugins for the CMS host.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cms_plugin_sdk::prelude::*;
//!
//! #[derive(Debug, Default)]
//! struct HelloPlugin;
//!
//! impl Plugin for HelloPlugin {
//!     fn name(&self) -> &str { "hello" }
//!     fn version(&self) -> &str { "1.0.0" }
//!     fn description(&self) -> &str { "Greets every rendered article" }
//!     fn author(&self) -> &str { "Developer" }
//!
//!     fn init(&self, host: &PluginManager) -> Result<(), String> {
//!         host.add_hook(
//!             "article_render",
//!             Hook::new("hello.greet", 0, |_| Some(hook_value("hello".to_string()))),
//!         );
//!         Ok(())
//!     }
//!
//!     fn start(&self) -> Result<(), String> { Ok(()) }
//!     fn stop(&self) -> Result<(), String> { Ok(()) }
//! }
//!
//! export_plugin!(HelloPlugin);
//! ```
//!
//! Build the crate as a `cdylib` and drop the library into the host's plugin
//! directory.

pub use cms_core;
pub use cms_plugin;

/// Prelude for convenient imports.
pub mod prelude {
    pub use cms_plugin::export_plugin;
    pub use cms_plugin::prelude::*;
}
