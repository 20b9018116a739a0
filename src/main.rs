//! CMS Server — plugin host.
//!
//! Main entry point that loads configuration, boots the plugin runtime and
//! fires the server lifecycle hook points.

use tracing_subscriber::{EnvFilter, fmt};

use cms_core::config::AppConfig;
use cms_core::AppResult;
use cms_plugin::{PluginManager, hook_value};

/// Hook point fired once plugins are loaded. Argument 0 is the [`AppConfig`].
const SERVER_START: &str = "server_start";

/// Hook point fired after the shutdown signal, before plugins are stopped.
const SERVER_SHUTDOWN: &str = "server_shutdown";

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

/// Load configuration from file and environment
fn load_configuration() -> AppResult<AppConfig> {
    let config_path =
        std::env::var("CMS_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string());
    let env = std::env::var("CMS_ENV").unwrap_or_else(|_| "development".to_string());

    AppConfig::load(&config_path, &env)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main server run function
async fn run(config: AppConfig) -> AppResult<()> {
    tracing::info!("Starting CMS server v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Plugin runtime ───────────────────────────────────
    let plugins = PluginManager::new(&config.plugins);

    if config.plugins.auto_load {
        let report = plugins.load_plugins()?;
        for path in &report.failed {
            tracing::warn!(path = %path.display(), "Plugin skipped at boot");
        }
    } else {
        tracing::info!("Plugin auto-load disabled");
    }

    // ── Step 2: Server start hooks ───────────────────────────────
    plugins.apply_hooks(SERVER_START, &[hook_value(config.clone())]);
    tracing::info!(plugins = ?plugins.plugins(), "CMS server started");

    // ── Step 3: Graceful shutdown ────────────────────────────────
    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown...");

    plugins.apply_hooks(SERVER_SHUTDOWN, &[]);
    let stopped = plugins.stop_all();

    tracing::info!(stopped = stopped.len(), "CMS server shut down");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
