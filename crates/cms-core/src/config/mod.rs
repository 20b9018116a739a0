//! Application configuration schemas.
//!
//! The root [`AppConfig`] is deserialized from TOML files via the `config`
//! crate, overlaid with `CMS__`-prefixed environment variables. Each
//! sub-module is one configuration section.

pub mod logging;
pub mod plugin;

use serde::{Deserialize, Serialize};

pub use self::logging::LoggingConfig;
pub use self::plugin::PluginConfig;

use crate::error::AppError;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Plugin runtime settings.
    #[serde(default)]
    pub plugins: PluginConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from `path`, an optional `config/{env}` overlay and
    /// the environment.
    ///
    /// Missing files are tolerated; every field has a default. Environment
    /// variables use `CMS__SECTION__KEY`, e.g. `CMS__PLUGINS__DIRECTORY`.
    pub fn load(path: &str, env: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("CMS")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))
    }
}
