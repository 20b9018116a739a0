//! The plugin capability contract.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::error::{LifecycleStage, PluginError};
use crate::manager::PluginManager;

/// Trait every plugin implements, whether compiled in or loaded from a
/// dynamic library through [`export_plugin!`](crate::export_plugin).
///
/// Lifecycle methods run on the calling thread with no timeout. They are
/// never called while the manager holds its internal lock, so `init` and
/// `start` may register hooks or read plugin state through the host.
pub trait Plugin: Send + Sync + std::fmt::Debug {
    /// Unique plugin name. Used as the key of the persisted plugin store.
    fn name(&self) -> &str;

    /// Plugin version string.
    fn version(&self) -> &str;

    /// Plugin description.
    fn description(&self) -> &str;

    /// Author or maintainer.
    fn author(&self) -> &str;

    /// Called once after the module is loaded.
    ///
    /// The host handle is cheap to clone; plugins that add or remove hooks
    /// later (for example in `start`/`stop`) keep a clone.
    fn init(&self, host: &PluginManager) -> Result<(), String>;

    /// Called when the plugin is enabled, and on boot if it was enabled.
    fn start(&self) -> Result<(), String>;

    /// Called when the plugin is disabled, and on host shutdown.
    fn stop(&self) -> Result<(), String>;
}

/// Runs one lifecycle call, turning both returned errors and panics into
/// [`PluginError::Lifecycle`].
pub(crate) fn invoke(
    name: &str,
    stage: LifecycleStage,
    call: impl FnOnce() -> Result<(), String>,
) -> Result<(), PluginError> {
    let reason = match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(reason)) => reason,
        Err(payload) => format!("panicked: {}", panic_message(&*payload)),
    };

    Err(PluginError::Lifecycle {
        name: name.to_string(),
        stage,
        reason,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
