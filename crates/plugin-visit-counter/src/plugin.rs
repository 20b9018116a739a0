//! Visit counter plugin implementation.

use std::sync::{Arc, OnceLock};

use cms_plugin_sdk::prelude::*;

use crate::hooks::{ARTICLE_VIEW, ViewCounter, count_hook};

/// Unique plugin name, also the key of its entry in the plugin store.
pub const PLUGIN_NAME: &str = "visit-counter";

/// Counts article views while running.
#[derive(Debug, Default)]
pub struct VisitCounterPlugin {
    /// Host handle, kept from `init` to read the config blob on start.
    host: OnceLock<PluginManager>,
    counter: Arc<ViewCounter>,
}

impl VisitCounterPlugin {
    /// Views counted so far.
    pub fn total(&self) -> u64 {
        self.counter.total()
    }

    fn configured_step(&self) -> u64 {
        let step = self
            .host
            .get()
            .and_then(|host| host.get_plugin_info(PLUGIN_NAME))
            .and_then(|info| info.config.to_value().ok())
            .and_then(|config| config.get("step").and_then(serde_json::Value::as_u64));

        match step {
            Some(0) | None => 1,
            Some(step) => step,
        }
    }
}

impl Plugin for VisitCounterPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "Counts article views"
    }

    fn author(&self) -> &str {
        "CMS Team"
    }

    fn init(&self, host: &PluginManager) -> Result<(), String> {
        self.host
            .set(host.clone())
            .map_err(|_| "visit counter initialized twice".to_string())?;
        host.add_hook(ARTICLE_VIEW, count_hook(Arc::clone(&self.counter)));
        tracing::debug!(plugin = PLUGIN_NAME, "Visit counter hook registered");
        Ok(())
    }

    fn start(&self) -> Result<(), String> {
        let step = self.configured_step();
        self.counter.resume(step);
        tracing::info!(plugin = PLUGIN_NAME, step, "Visit counter started");
        Ok(())
    }

    fn stop(&self) -> Result<(), String> {
        self.counter.pause();
        tracing::info!(plugin = PLUGIN_NAME, total = self.counter.total(), "Visit counter stopped");
        Ok(())
    }
}
