//! Visit counter plugin for the CMS host.
//!
//! Counts article views through the `article_view` hook point. The increment
//! comes from the plugin's config blob (`{"step": n}`, default 1) and is
//! re-read every time the plugin starts.

pub mod hooks;
pub mod plugin;

pub use plugin::VisitCounterPlugin;

cms_plugin_sdk::prelude::export_plugin!(VisitCounterPlugin);
