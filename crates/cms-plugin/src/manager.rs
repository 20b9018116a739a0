//! Plugin manager — discovery, lifecycle, persisted state and the hook API.
//!
//! All mutable state lives behind one `RwLock`. The lock is held only while
//! maps are read or mutated: hook callbacks and plugin lifecycle calls always
//! run after it is released, so they may call back into the manager.

use std::fmt;
use std::mem::ManuallyDrop;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use cms_core::config::PluginConfig;

use crate::error::{LifecycleStage, PluginError};
use crate::hooks::definitions::{Hook, HookValue};
use crate::hooks::dispatcher;
use crate::hooks::registry::HookTable;
use crate::loader::{DynamicLoader, LoadedModule, ModuleLoader, discover};
use crate::registry::{LoadedPlugin, PluginRegistry, PluginState};
use crate::store::{ConfigBlob, PluginInfo, PluginStore, write_atomic};
use crate::traits::{Plugin, invoke};

/// Outcome of a [`PluginManager::load_plugins`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Names of plugins loaded and initialized in this pass.
    pub loaded: Vec<String>,
    /// Candidate files that failed to load or initialize.
    pub failed: Vec<PathBuf>,
    /// Names of enabled plugins started in this pass.
    pub started: Vec<String>,
}

#[derive(Debug, Default)]
struct ManagerState {
    hooks: HookTable,
    store: PluginStore,
    plugins: PluginRegistry,
    /// The persisted store has been read into `store`.
    store_loaded: bool,
    /// `store` holds entries the file does not have yet.
    unsaved: bool,
}

struct ManagerInner {
    plugin_dir: Option<PathBuf>,
    store_path: Option<PathBuf>,
    loader: Arc<dyn ModuleLoader>,
    state: RwLock<ManagerState>,
    /// Serializes store writes. Taken before `state`, never after.
    persist_lock: Mutex<()>,
}

/// Host-side plugin manager.
///
/// Cheap to clone; every clone shares the same state. Plugins receive a
/// reference in [`Plugin::init`] and may keep a clone to manage hooks later.
#[derive(Clone)]
pub struct PluginManager {
    inner: Arc<ManagerInner>,
}

impl PluginManager {
    /// Creates a manager that loads native dynamic libraries.
    pub fn new(config: &PluginConfig) -> Self {
        Self::with_loader(config, Arc::new(DynamicLoader::new()))
    }

    /// Creates a manager with a custom module loader.
    pub fn with_loader(config: &PluginConfig, loader: Arc<dyn ModuleLoader>) -> Self {
        let plugin_dir = config.directory_path();
        let store_path = config.config_file_path();

        if store_path.is_none() {
            warn!("No plugin config file configured, plugin state will not be persisted");
        }

        Self {
            inner: Arc::new(ManagerInner {
                plugin_dir,
                store_path,
                loader,
                state: RwLock::new(ManagerState::default()),
                persist_lock: Mutex::new(()),
            }),
        }
    }

    // ── Loading ─────────────────────────────────────────────────────

    /// Discovers, loads and initializes every plugin module in the plugin
    /// directory, then starts the ones persisted as enabled.
    ///
    /// Per-module failures are logged and reported, never returned. Only
    /// directory and store errors abort the pass.
    pub fn load_plugins(&self) -> Result<LoadReport, PluginError> {
        let Some(dir) = self.inner.plugin_dir.clone() else {
            warn!("No plugin directory configured, skipping plugin loading");
            return Ok(LoadReport::default());
        };

        std::fs::create_dir_all(&dir).map_err(|source| PluginError::PluginDirectory {
            path: dir.clone(),
            source,
        })?;
        self.ensure_store_loaded()?;

        let mut report = LoadReport::default();
        for path in discover(&dir)? {
            match self.load_module(&path) {
                Ok(name) => report.loaded.push(name),
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to load plugin");
                    report.failed.push(path);
                }
            }
        }

        let unsaved = self.inner.state.read().unsaved;
        if unsaved {
            self.persist()?;
        }

        report.started = self.start_enabled();

        info!(
            dir = %dir.display(),
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            started = report.started.len(),
            "Plugin loading complete"
        );

        Ok(report)
    }

    /// Registers a compiled-in plugin.
    ///
    /// Goes through the same duplicate check, info creation and `init` as a
    /// loaded module. The plugin is started by the next
    /// [`load_plugins`](Self::load_plugins) if persisted as enabled, or by
    /// [`enable_plugin`](Self::enable_plugin).
    pub fn register_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<(), PluginError> {
        self.register_module(plugin, None)
    }

    fn load_module(&self, path: &Path) -> Result<String, PluginError> {
        let LoadedModule { plugin, library } = self.inner.loader.open(path)?;
        let library = library.map(ManuallyDrop::new);
        let name = plugin.name().to_string();
        self.register_module(plugin, library)?;
        Ok(name)
    }

    fn register_module(
        &self,
        plugin: Arc<dyn Plugin>,
        library: Option<ManuallyDrop<Library>>,
    ) -> Result<(), PluginError> {
        self.ensure_store_loaded()?;
        let name = plugin.name().to_string();

        {
            let mut state = self.inner.state.write();
            if state.plugins.contains(&name) {
                return Err(PluginError::DuplicatePlugin { name });
            }
            if !state.store.contains(&name) {
                state.store.insert(PluginInfo::from_plugin(plugin.as_ref()));
                state.unsaved = true;
                debug!(plugin = %name, "Created default plugin info");
            }
        }

        // A failed init leaves the info in the store with no live instance.
        invoke(&name, LifecycleStage::Init, || plugin.init(self))?;

        let version = plugin.version().to_string();
        self.inner
            .state
            .write()
            .plugins
            .insert(LoadedPlugin::new(plugin, library))?;

        info!(plugin = %name, version = %version, "Plugin initialized");
        Ok(())
    }

    fn start_enabled(&self) -> Vec<String> {
        let pending: Vec<String> = {
            let state = self.inner.state.read();
            state
                .store
                .iter()
                .filter(|info| info.enabled)
                .filter(|info| {
                    state
                        .plugins
                        .get(&info.name)
                        .is_some_and(|entry| entry.state == PluginState::Registered)
                })
                .map(|info| info.name.clone())
                .collect()
        };

        let mut started = Vec::new();
        for name in pending {
            let Ok((plugin, transition)) = self.handle(&name) else {
                continue;
            };
            let _transition = transition.lock();
            if self.plugin_state(&name) != Some(PluginState::Registered) {
                continue;
            }

            match invoke(&name, LifecycleStage::Start, || plugin.start()) {
                Ok(()) => {
                    self.inner
                        .state
                        .write()
                        .plugins
                        .set_state(&name, PluginState::Running);
                    info!(plugin = %name, "Plugin started");
                    started.push(name);
                }
                Err(e) => {
                    error!(plugin = %name, error = %e, "Failed to start enabled plugin");
                }
            }
        }
        started
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Starts a loaded plugin and persists it as enabled.
    ///
    /// A no-op if the plugin is already enabled and running. If the store
    /// cannot be written the start is undone and the error returned.
    pub fn enable_plugin(&self, name: &str) -> Result<(), PluginError> {
        self.ensure_store_loaded()?;
        let (plugin, transition) = self.handle(name)?;
        let _transition = transition.lock();

        let (enabled, running) = self.status(name);
        if enabled && running {
            debug!(plugin = %name, "Plugin already enabled");
            return Ok(());
        }

        if !running {
            invoke(name, LifecycleStage::Start, || plugin.start())?;
        }
        self.set_status(name, true, PluginState::Running);

        if let Err(e) = self.persist() {
            error!(plugin = %name, error = %e, "Failed to persist enable, rolling back");
            self.set_status(name, false, PluginState::Running);
            match invoke(name, LifecycleStage::Stop, || plugin.stop()) {
                Ok(()) => self.set_status(name, false, PluginState::Registered),
                Err(stop_err) => {
                    warn!(plugin = %name, error = %stop_err, "Failed to stop plugin during rollback");
                }
            }
            return Err(e);
        }

        info!(plugin = %name, "Plugin enabled");
        Ok(())
    }

    /// Stops a loaded plugin and persists it as disabled.
    ///
    /// A no-op if the plugin is already disabled. If the store cannot be
    /// written the plugin is restarted and the error returned.
    pub fn disable_plugin(&self, name: &str) -> Result<(), PluginError> {
        self.ensure_store_loaded()?;
        let (plugin, transition) = self.handle(name)?;
        let _transition = transition.lock();

        let (enabled, running) = self.status(name);
        if !enabled {
            debug!(plugin = %name, "Plugin already disabled");
            return Ok(());
        }

        if running {
            invoke(name, LifecycleStage::Stop, || plugin.stop())?;
        }
        self.set_status(name, false, PluginState::Registered);

        if let Err(e) = self.persist() {
            error!(plugin = %name, error = %e, "Failed to persist disable, rolling back");
            self.set_status(name, true, PluginState::Registered);
            if running {
                match invoke(name, LifecycleStage::Start, || plugin.start()) {
                    Ok(()) => self.set_status(name, true, PluginState::Running),
                    Err(start_err) => {
                        warn!(plugin = %name, error = %start_err, "Failed to restart plugin during rollback");
                    }
                }
            }
            return Err(e);
        }

        info!(plugin = %name, "Plugin disabled");
        Ok(())
    }

    /// Replaces a plugin's config blob and persists it.
    ///
    /// Works on the stored info alone, so a plugin that failed to load can
    /// still be reconfigured. The running instance is not notified.
    ///
    /// A [`ConfigBlob::from_json`] blob is stored exactly as given; a
    /// `serde_json::Value` is encoded compactly.
    pub fn update_plugin_config(
        &self,
        name: &str,
        config: impl Into<ConfigBlob>,
    ) -> Result<(), PluginError> {
        self.ensure_store_loaded()?;
        let config = config.into();

        let previous = {
            let mut state = self.inner.state.write();
            let info = state
                .store
                .get_mut(name)
                .ok_or_else(|| PluginError::not_found(name))?;
            std::mem::replace(&mut info.config, config)
        };

        if let Err(e) = self.persist() {
            error!(plugin = %name, error = %e, "Failed to persist plugin config, rolling back");
            if let Some(info) = self.inner.state.write().store.get_mut(name) {
                info.config = previous;
            }
            return Err(e);
        }

        info!(plugin = %name, "Plugin config updated");
        Ok(())
    }

    /// Stops every running plugin. Persisted enable flags are left untouched,
    /// so the same plugins start again on the next boot.
    ///
    /// Returns the names of the plugins that stopped cleanly.
    pub fn stop_all(&self) -> Vec<String> {
        let running = self.inner.state.read().plugins.running();

        let mut stopped = Vec::new();
        for name in running {
            let Ok((plugin, transition)) = self.handle(&name) else {
                continue;
            };
            let _transition = transition.lock();
            if self.plugin_state(&name) != Some(PluginState::Running) {
                continue;
            }

            match invoke(&name, LifecycleStage::Stop, || plugin.stop()) {
                Ok(()) => {
                    self.inner
                        .state
                        .write()
                        .plugins
                        .set_state(&name, PluginState::Registered);
                    stopped.push(name);
                }
                Err(e) => error!(plugin = %name, error = %e, "Error stopping plugin"),
            }
        }

        info!(stopped = stopped.len(), "All plugins stopped");
        stopped
    }

    // ── Accessors ───────────────────────────────────────────────────

    /// Returns the live instance of a loaded plugin.
    pub fn get_plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.inner
            .state
            .read()
            .plugins
            .get(name)
            .map(|entry| entry.plugin.clone())
    }

    /// Returns the stored info for a plugin, loaded or not.
    pub fn get_plugin_info(&self, name: &str) -> Option<PluginInfo> {
        self.inner.state.read().store.get(name).cloned()
    }

    /// Names of loaded plugins, sorted.
    pub fn plugins(&self) -> Vec<String> {
        self.inner.state.read().plugins.names()
    }

    /// Every stored plugin info, sorted by name.
    pub fn plugin_infos(&self) -> Vec<PluginInfo> {
        self.inner.state.read().store.iter().cloned().collect()
    }

    /// Run state of a loaded plugin.
    pub fn plugin_state(&self, name: &str) -> Option<PluginState> {
        self.inner
            .state
            .read()
            .plugins
            .get(name)
            .map(|entry| entry.state)
    }

    // ── Hooks ───────────────────────────────────────────────────────

    /// Registers a hook at `point`.
    pub fn add_hook(&self, point: &str, hook: Hook) {
        self.inner.state.write().hooks.add(point, hook);
    }

    /// Removes every hook named `name` from `point`. Returns how many were removed.
    pub fn remove_hook(&self, point: &str, name: &str) -> usize {
        self.inner.state.write().hooks.remove(point, name)
    }

    /// Runs every hook at `point` in priority order and returns the result of
    /// the last one executed. `None` if the point has no hooks.
    pub fn apply_hooks(&self, point: &str, args: &[HookValue]) -> Option<HookValue> {
        let hooks = self.inner.state.read().hooks.snapshot(point)?;
        dispatcher::apply(point, &hooks, args)
    }

    /// Runs every hook at `point` and returns each result in execution order.
    pub fn collect_hooks(&self, point: &str, args: &[HookValue]) -> Vec<Option<HookValue>> {
        let hooks = self.inner.state.read().hooks.snapshot(point);
        match hooks {
            Some(hooks) => dispatcher::collect(point, &hooks, args),
            None => Vec::new(),
        }
    }

    /// Whether any hook is registered at `point`.
    ///
    /// A point whose last hook was removed no longer exists, so this returns
    /// `false` for it rather than reporting an empty point as present.
    pub fn has_hook(&self, point: &str) -> bool {
        self.inner.state.read().hooks.contains(point)
    }

    /// The hooks registered at `point`, in execution order.
    pub fn get_hooks(&self, point: &str) -> Vec<Hook> {
        let hooks = self.inner.state.read().hooks.snapshot(point);
        hooks.map(|hooks| hooks.to_vec()).unwrap_or_default()
    }

    /// All hook points with at least one hook, sorted.
    pub fn hook_points(&self) -> Vec<String> {
        self.inner.state.read().hooks.points()
    }

    // ── Internals ───────────────────────────────────────────────────

    fn handle(&self, name: &str) -> Result<(Arc<dyn Plugin>, Arc<Mutex<()>>), PluginError> {
        self.inner
            .state
            .read()
            .plugins
            .get(name)
            .map(|entry| (entry.plugin.clone(), entry.transition.clone()))
            .ok_or_else(|| PluginError::not_found(name))
    }

    /// `(enabled, running)` for a loaded plugin.
    fn status(&self, name: &str) -> (bool, bool) {
        let state = self.inner.state.read();
        let enabled = state.store.get(name).is_some_and(|info| info.enabled);
        let running = state
            .plugins
            .get(name)
            .is_some_and(|entry| entry.state == PluginState::Running);
        (enabled, running)
    }

    fn set_status(&self, name: &str, enabled: bool, run_state: PluginState) {
        let mut state = self.inner.state.write();
        if let Some(info) = state.store.get_mut(name) {
            info.enabled = enabled;
        }
        state.plugins.set_state(name, run_state);
    }

    /// Reads the persisted store once, before the first change to plugin state.
    fn ensure_store_loaded(&self) -> Result<(), PluginError> {
        if self.inner.state.read().store_loaded {
            return Ok(());
        }

        let _persist = self.inner.persist_lock.lock();
        if self.inner.state.read().store_loaded {
            return Ok(());
        }

        let store = match self.inner.store_path.as_deref() {
            Some(path) => PluginStore::load(path)?,
            None => PluginStore::new(),
        };

        let mut state = self.inner.state.write();
        state.store = store;
        state.store_loaded = true;
        Ok(())
    }

    /// Writes the full store. The snapshot is taken after the writer lock, so
    /// the last writer always saves the latest state.
    fn persist(&self) -> Result<(), PluginError> {
        let Some(path) = self.inner.store_path.as_deref() else {
            return Ok(());
        };

        let _persist = self.inner.persist_lock.lock();
        let bytes = {
            let mut state = self.inner.state.write();
            let bytes = state.store.to_json(path)?;
            state.unsaved = false;
            bytes
        };

        if let Err(e) = write_atomic(path, &bytes) {
            self.inner.state.write().unsaved = true;
            return Err(e);
        }

        debug!(path = %path.display(), "Plugin store saved");
        Ok(())
    }
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("PluginManager")
            .field("plugin_dir", &self.inner.plugin_dir)
            .field("store_path", &self.inner.store_path)
            .field("loader", &self.inner.loader)
            .field("plugins", &state.plugins.len())
            .field("hook_points", &state.hooks.points())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::env::consts::DLL_EXTENSION;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::hooks::definitions::{downcast_value, hook_value};

    #[derive(Debug)]
    struct TestPlugin {
        name: String,
        fail_init: bool,
        fail_start: AtomicBool,
        init_calls: AtomicUsize,
        start_calls: AtomicUsize,
        stop_calls: AtomicUsize,
    }

    impl TestPlugin {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self::build(name, false))
        }

        fn failing_init(name: &str) -> Arc<Self> {
            Arc::new(Self::build(name, true))
        }

        fn build(name: &str, fail_init: bool) -> Self {
            Self {
                name: name.to_string(),
                fail_init,
                fail_start: AtomicBool::new(false),
                init_calls: AtomicUsize::new(0),
                start_calls: AtomicUsize::new(0),
                stop_calls: AtomicUsize::new(0),
            }
        }

        fn starts(&self) -> usize {
            self.start_calls.load(Ordering::SeqCst)
        }

        fn stops(&self) -> usize {
            self.stop_calls.load(Ordering::SeqCst)
        }
    }

    impl Plugin for TestPlugin {
        fn name(&self) -> &str {
            &self.name
        }
        fn version(&self) -> &str {
            "1.2.3"
        }
        fn description(&self) -> &str {
            "test plugin"
        }
        fn author(&self) -> &str {
            "CMS Team"
        }

        fn init(&self, host: &PluginManager) -> Result<(), String> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_init {
                return Err("missing dependency".to_string());
            }
            let name = self.name.clone();
            host.add_hook(
                "article_view",
                Hook::new(format!("{}.view", self.name), 10, move |_| {
                    Some(hook_value(name.clone()))
                }),
            );
            Ok(())
        }

        fn start(&self) -> Result<(), String> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_start.load(Ordering::SeqCst) {
                return Err("port in use".to_string());
            }
            Ok(())
        }

        fn stop(&self) -> Result<(), String> {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Maps candidate file stems to prepared plugin instances.
    #[derive(Debug, Default)]
    struct FakeLoader {
        modules: parking_lot::Mutex<HashMap<String, Arc<TestPlugin>>>,
    }

    impl FakeLoader {
        fn with(plugins: &[(&str, Arc<TestPlugin>)]) -> Arc<Self> {
            let loader = Self::default();
            {
                let mut modules = loader.modules.lock();
                for (stem, plugin) in plugins {
                    modules.insert(stem.to_string(), plugin.clone());
                }
            }
            Arc::new(loader)
        }
    }

    impl ModuleLoader for FakeLoader {
        fn open(&self, path: &Path) -> Result<LoadedModule, PluginError> {
            let stem = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            let plugin = self
                .modules
                .lock()
                .get(&stem)
                .cloned()
                .ok_or_else(|| PluginError::invalid_module(path, "no entry point"))?;
            Ok(LoadedModule {
                plugin,
                library: None,
            })
        }
    }

    struct Fixture {
        dir: TempDir,
        config: PluginConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let config = PluginConfig {
                directory: dir.path().join("plugins").display().to_string(),
                config_file: dir.path().join("data/plugins.json").display().to_string(),
                auto_load: true,
            };
            Self { dir, config }
        }

        fn plugin_dir(&self) -> PathBuf {
            self.dir.path().join("plugins")
        }

        fn store_path(&self) -> PathBuf {
            self.dir.path().join("data/plugins.json")
        }

        fn add_module(&self, stem: &str) {
            std::fs::create_dir_all(self.plugin_dir()).unwrap();
            std::fs::write(self.plugin_dir().join(format!("{stem}.{DLL_EXTENSION}")), b"").unwrap();
        }

        fn write_store(&self, content: serde_json::Value) {
            std::fs::create_dir_all(self.store_path().parent().unwrap()).unwrap();
            std::fs::write(self.store_path(), content.to_string()).unwrap();
        }

        fn manager(&self, loader: Arc<FakeLoader>) -> PluginManager {
            PluginManager::with_loader(&self.config, loader)
        }

        /// Replaces the store's parent directory with a regular file so every
        /// later save fails.
        fn break_store(&self) {
            let data = self.dir.path().join("data");
            std::fs::remove_dir_all(&data).unwrap();
            std::fs::write(&data, b"").unwrap();
        }
    }

    #[test]
    fn test_load_creates_directory_and_store() {
        let fx = Fixture::new();
        let manager = fx.manager(FakeLoader::with(&[]));

        let report = manager.load_plugins().unwrap();

        assert_eq!(report, LoadReport::default());
        assert!(fx.plugin_dir().is_dir());
        assert_eq!(
            std::fs::read_to_string(fx.store_path()).unwrap().trim(),
            "{}"
        );
    }

    #[test]
    fn test_no_directory_configured_is_noop() {
        let fx = Fixture::new();
        let config = PluginConfig {
            directory: String::new(),
            ..fx.config.clone()
        };
        let manager = PluginManager::with_loader(&config, FakeLoader::with(&[]));

        assert_eq!(manager.load_plugins().unwrap(), LoadReport::default());
        assert!(!fx.store_path().exists());
    }

    #[test]
    fn test_new_module_gets_default_disabled_info() {
        let fx = Fixture::new();
        fx.add_module("sitemap");
        let plugin = TestPlugin::new("sitemap");
        let manager = fx.manager(FakeLoader::with(&[("sitemap", plugin.clone())]));

        let report = manager.load_plugins().unwrap();

        assert_eq!(report.loaded, vec!["sitemap"]);
        assert!(report.started.is_empty());
        assert_eq!(plugin.starts(), 0);
        assert_eq!(manager.plugin_state("sitemap"), Some(PluginState::Registered));

        let info = manager.get_plugin_info("sitemap").unwrap();
        assert!(!info.enabled);
        assert_eq!(info.version, "1.2.3");
        assert_eq!(info.config, ConfigBlob::default());

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(fx.store_path()).unwrap()).unwrap();
        assert_eq!(saved["sitemap"]["enabled"], json!(false));
    }

    #[test]
    fn test_persisted_enabled_plugin_started_once() {
        let fx = Fixture::new();
        fx.add_module("sitemap");
        fx.write_store(json!({
            "sitemap": {"name": "sitemap", "enabled": true, "config": {"depth": 3}}
        }));
        let plugin = TestPlugin::new("sitemap");
        let manager = fx.manager(FakeLoader::with(&[("sitemap", plugin.clone())]));

        let report = manager.load_plugins().unwrap();
        assert_eq!(report.started, vec!["sitemap"]);
        assert_eq!(plugin.starts(), 1);
        assert_eq!(manager.plugin_state("sitemap"), Some(PluginState::Running));
        assert_eq!(
            manager.get_plugin_info("sitemap").unwrap().config.to_value().unwrap(),
            json!({"depth": 3})
        );

        let again = manager.load_plugins().unwrap();
        assert!(again.started.is_empty());
        assert_eq!(plugin.starts(), 1);
        assert_eq!(plugin.init_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duplicate_name_is_skipped() {
        let fx = Fixture::new();
        fx.add_module("a-first");
        fx.add_module("b-second");
        let first = TestPlugin::new("dup");
        let second = TestPlugin::new("dup");
        let manager = fx.manager(FakeLoader::with(&[
            ("a-first", first.clone()),
            ("b-second", second.clone()),
        ]));

        let report = manager.load_plugins().unwrap();

        assert_eq!(report.loaded, vec!["dup"]);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].ends_with(format!("b-second.{DLL_EXTENSION}")));
        assert_eq!(second.init_calls.load(Ordering::SeqCst), 0);
        let first: Arc<dyn Plugin> = first;
        assert!(Arc::ptr_eq(&manager.get_plugin("dup").unwrap(), &first));
    }

    #[test]
    fn test_failed_module_does_not_abort_discovery() {
        let fx = Fixture::new();
        fx.add_module("broken");
        fx.add_module("good");
        std::fs::write(fx.plugin_dir().join("README.md"), b"docs").unwrap();
        let manager = fx.manager(FakeLoader::with(&[("good", TestPlugin::new("good"))]));

        let report = manager.load_plugins().unwrap();

        assert_eq!(report.loaded, vec!["good"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(manager.plugins(), vec!["good"]);
    }

    #[test]
    fn test_init_failure_quarantines_info() {
        let fx = Fixture::new();
        fx.add_module("seo");
        let manager = fx.manager(FakeLoader::with(&[("seo", TestPlugin::failing_init("seo"))]));

        let report = manager.load_plugins().unwrap();

        assert!(report.loaded.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert!(manager.get_plugin("seo").is_none());
        assert!(manager.get_plugin_info("seo").is_some());

        let err = manager.enable_plugin("seo").unwrap_err();
        assert!(matches!(err, PluginError::PluginNotFound { .. }));

        manager
            .update_plugin_config("seo", json!({"suffix": " | Site"}))
            .unwrap();
        assert_eq!(
            manager.get_plugin_info("seo").unwrap().config.to_value().unwrap(),
            json!({"suffix": " | Site"})
        );
    }

    #[test]
    fn test_enable_unknown_plugin_leaves_store_untouched() {
        let fx = Fixture::new();
        let manager = fx.manager(FakeLoader::with(&[]));
        manager.load_plugins().unwrap();
        let before = std::fs::read(fx.store_path()).unwrap();

        let err = manager.enable_plugin("ghost").unwrap_err();
        assert!(matches!(err, PluginError::PluginNotFound { name } if name == "ghost"));

        let err = manager.disable_plugin("ghost").unwrap_err();
        assert!(matches!(err, PluginError::PluginNotFound { .. }));

        let err = manager.update_plugin_config("ghost", json!({})).unwrap_err();
        assert!(matches!(err, PluginError::PluginNotFound { .. }));

        assert_eq!(std::fs::read(fx.store_path()).unwrap(), before);
    }

    #[test]
    fn test_enable_twice_starts_once() {
        let fx = Fixture::new();
        fx.add_module("sitemap");
        let plugin = TestPlugin::new("sitemap");
        let manager = fx.manager(FakeLoader::with(&[("sitemap", plugin.clone())]));
        manager.load_plugins().unwrap();

        manager.enable_plugin("sitemap").unwrap();
        manager.enable_plugin("sitemap").unwrap();

        assert_eq!(plugin.starts(), 1);
        assert!(manager.get_plugin_info("sitemap").unwrap().enabled);
        assert_eq!(manager.plugin_state("sitemap"), Some(PluginState::Running));
    }

    #[test]
    fn test_concurrent_enable_starts_once() {
        let fx = Fixture::new();
        fx.add_module("sitemap");
        let plugin = TestPlugin::new("sitemap");
        let manager = fx.manager(FakeLoader::with(&[("sitemap", plugin.clone())]));
        manager.load_plugins().unwrap();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| manager.enable_plugin("sitemap").unwrap());
            }
        });

        assert_eq!(plugin.starts(), 1);
    }

    #[test]
    fn test_start_failure_keeps_flag_false() {
        let fx = Fixture::new();
        fx.add_module("sitemap");
        let plugin = TestPlugin::new("sitemap");
        plugin.fail_start.store(true, Ordering::SeqCst);
        let manager = fx.manager(FakeLoader::with(&[("sitemap", plugin.clone())]));
        manager.load_plugins().unwrap();

        let err = manager.enable_plugin("sitemap").unwrap_err();

        assert!(matches!(
            err,
            PluginError::Lifecycle {
                stage: LifecycleStage::Start,
                ..
            }
        ));
        assert!(!manager.get_plugin_info("sitemap").unwrap().enabled);
        assert_eq!(manager.plugin_state("sitemap"), Some(PluginState::Registered));
    }

    #[test]
    fn test_disable_persists_across_reload() {
        let fx = Fixture::new();
        fx.add_module("sitemap");
        let plugin = TestPlugin::new("sitemap");
        let manager = fx.manager(FakeLoader::with(&[("sitemap", plugin.clone())]));
        manager.load_plugins().unwrap();

        manager.enable_plugin("sitemap").unwrap();
        manager.disable_plugin("sitemap").unwrap();
        assert_eq!(plugin.stops(), 1);
        assert_eq!(manager.plugin_state("sitemap"), Some(PluginState::Registered));

        let fresh = TestPlugin::new("sitemap");
        let reloaded = fx.manager(FakeLoader::with(&[("sitemap", fresh.clone())]));
        let report = reloaded.load_plugins().unwrap();

        assert!(report.started.is_empty());
        assert_eq!(fresh.starts(), 0);
        assert!(!reloaded.get_plugin_info("sitemap").unwrap().enabled);
    }

    #[test]
    fn test_disable_already_disabled_is_noop() {
        let fx = Fixture::new();
        fx.add_module("sitemap");
        let plugin = TestPlugin::new("sitemap");
        let manager = fx.manager(FakeLoader::with(&[("sitemap", plugin.clone())]));
        manager.load_plugins().unwrap();

        manager.disable_plugin("sitemap").unwrap();
        assert_eq!(plugin.stops(), 0);
    }

    #[test]
    fn test_update_config_survives_reload() {
        let fx = Fixture::new();
        fx.add_module("seo");
        let manager = fx.manager(FakeLoader::with(&[("seo", TestPlugin::new("seo"))]));
        manager.load_plugins().unwrap();

        let blob = json!({"rules": [{"path": "/blog", "noindex": true}], "nested": {"a": [1, 2.5, null]}});
        manager.update_plugin_config("seo", blob.clone()).unwrap();

        let reloaded = fx.manager(FakeLoader::with(&[("seo", TestPlugin::new("seo"))]));
        reloaded.load_plugins().unwrap();
        assert_eq!(reloaded.get_plugin_info("seo").unwrap().config.to_value().unwrap(), blob);
    }

    #[test]
    fn test_stop_all_keeps_enabled_flags() {
        let fx = Fixture::new();
        fx.add_module("a");
        fx.add_module("b");
        let a = TestPlugin::new("a");
        let b = TestPlugin::new("b");
        let manager = fx.manager(FakeLoader::with(&[("a", a.clone()), ("b", b.clone())]));
        manager.load_plugins().unwrap();
        manager.enable_plugin("a").unwrap();

        let stopped = manager.stop_all();

        assert_eq!(stopped, vec!["a"]);
        let names: Vec<String> = manager.plugin_infos().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(a.stops(), 1);
        assert_eq!(b.stops(), 0);
        assert_eq!(manager.plugin_state("a"), Some(PluginState::Registered));
        assert!(manager.get_plugin_info("a").unwrap().enabled);

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(fx.store_path()).unwrap()).unwrap();
        assert_eq!(saved["a"]["enabled"], json!(true));
    }

    #[test]
    fn test_enable_rolls_back_when_store_write_fails() {
        let fx = Fixture::new();
        let plugin = TestPlugin::new("sitemap");
        let manager = fx.manager(FakeLoader::with(&[]));
        manager.register_plugin(plugin.clone()).unwrap();
        fx.break_store();

        let err = manager.enable_plugin("sitemap").unwrap_err();

        assert!(matches!(err, PluginError::Persistence { .. }));
        assert_eq!(plugin.starts(), 1);
        assert_eq!(plugin.stops(), 1);
        assert!(!manager.get_plugin_info("sitemap").unwrap().enabled);
        assert_eq!(manager.plugin_state("sitemap"), Some(PluginState::Registered));
    }

    #[test]
    fn test_disable_rolls_back_when_store_write_fails() {
        let fx = Fixture::new();
        let plugin = TestPlugin::new("sitemap");
        let manager = fx.manager(FakeLoader::with(&[]));
        manager.register_plugin(plugin.clone()).unwrap();
        manager.enable_plugin("sitemap").unwrap();
        fx.break_store();

        let err = manager.disable_plugin("sitemap").unwrap_err();

        assert!(matches!(err, PluginError::Persistence { .. }));
        assert_eq!(plugin.stops(), 1);
        assert_eq!(plugin.starts(), 2);
        assert!(manager.get_plugin_info("sitemap").unwrap().enabled);
        assert_eq!(manager.plugin_state("sitemap"), Some(PluginState::Running));
    }

    #[test]
    fn test_boot_start_failure_keeps_flag_and_allows_retry() {
        let fx = Fixture::new();
        fx.add_module("sitemap");
        fx.write_store(json!({"sitemap": {"name": "sitemap", "enabled": true}}));
        let plugin = TestPlugin::new("sitemap");
        plugin.fail_start.store(true, Ordering::SeqCst);
        let manager = fx.manager(FakeLoader::with(&[("sitemap", plugin.clone())]));

        let report = manager.load_plugins().unwrap();

        assert_eq!(report.loaded, vec!["sitemap"]);
        assert!(report.started.is_empty());
        assert_eq!(plugin.starts(), 1);
        assert!(manager.get_plugin_info("sitemap").unwrap().enabled);
        assert_eq!(manager.plugin_state("sitemap"), Some(PluginState::Registered));

        plugin.fail_start.store(false, Ordering::SeqCst);
        manager.enable_plugin("sitemap").unwrap();

        assert_eq!(plugin.starts(), 2);
        assert_eq!(manager.plugin_state("sitemap"), Some(PluginState::Running));
    }

    #[test]
    fn test_enabled_entry_without_module_stays_stale() {
        let fx = Fixture::new();
        fx.add_module("sitemap");
        fx.write_store(json!({
            "removed": {"name": "removed", "enabled": true, "config": {"keep": true}}
        }));
        let manager = fx.manager(FakeLoader::with(&[("sitemap", TestPlugin::new("sitemap"))]));

        let report = manager.load_plugins().unwrap();

        assert!(report.started.is_empty());
        assert_eq!(manager.plugins(), vec!["sitemap"]);
        assert!(manager.get_plugin("removed").is_none());
        assert_eq!(manager.plugin_state("removed"), None);

        let names: Vec<String> = manager.plugin_infos().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["removed", "sitemap"]);
        let stale = manager.get_plugin_info("removed").unwrap();
        assert!(stale.enabled);
        assert_eq!(stale.config.as_str(), r#"{"keep":true}"#);
    }

    #[test]
    fn test_unrelated_toggle_keeps_config_text() {
        let fx = Fixture::new();
        fx.add_module("sitemap");
        let blob = r#"{"zeta":1,"alpha":2,"id":123456789012345678901234567890}"#;
        std::fs::create_dir_all(fx.store_path().parent().unwrap()).unwrap();
        std::fs::write(
            fx.store_path(),
            format!(r#"{{"seo": {{"name": "seo", "enabled": false, "config": {blob}}}}}"#),
        )
        .unwrap();
        let manager = fx.manager(FakeLoader::with(&[("sitemap", TestPlugin::new("sitemap"))]));
        manager.load_plugins().unwrap();

        manager.enable_plugin("sitemap").unwrap();

        let saved = std::fs::read_to_string(fx.store_path()).unwrap();
        assert!(saved.contains(&format!(r#""config": {blob}"#)), "{saved}");
        assert_eq!(manager.get_plugin_info("seo").unwrap().config.as_str(), blob);
    }

    #[test]
    fn test_update_config_stores_exact_text() {
        let fx = Fixture::new();
        let manager = fx.manager(FakeLoader::with(&[]));
        manager.register_plugin(TestPlugin::new("seo")).unwrap();

        let text = r#"{"b": 1, "a": 0.10000000000000000001}"#;
        manager
            .update_plugin_config("seo", ConfigBlob::from_json(text).unwrap())
            .unwrap();

        let reloaded = fx.manager(FakeLoader::with(&[]));
        reloaded.register_plugin(TestPlugin::new("seo")).unwrap();
        assert_eq!(reloaded.get_plugin_info("seo").unwrap().config.as_str(), text);
    }

    #[test]
    fn test_update_config_rolls_back_when_store_write_fails() {
        let fx = Fixture::new();
        let manager = fx.manager(FakeLoader::with(&[]));
        manager.register_plugin(TestPlugin::new("seo")).unwrap();
        manager
            .update_plugin_config("seo", json!({"v": 1}))
            .unwrap();
        fx.break_store();

        let err = manager
            .update_plugin_config("seo", json!({"v": 2}))
            .unwrap_err();

        assert!(matches!(err, PluginError::Persistence { .. }));
        assert_eq!(
            manager.get_plugin_info("seo").unwrap().config.to_value().unwrap(),
            json!({"v": 1})
        );
    }

    #[test]
    fn test_memory_only_store() {
        let fx = Fixture::new();
        let config = PluginConfig {
            config_file: String::new(),
            ..fx.config.clone()
        };
        fx.add_module("sitemap");
        let plugin = TestPlugin::new("sitemap");
        let manager =
            PluginManager::with_loader(&config, FakeLoader::with(&[("sitemap", plugin.clone())]));

        manager.load_plugins().unwrap();
        manager.enable_plugin("sitemap").unwrap();

        assert!(manager.get_plugin_info("sitemap").unwrap().enabled);
        assert!(!fx.store_path().exists());
    }

    #[test]
    fn test_register_plugin_then_boot_applies_persisted_flag() {
        let fx = Fixture::new();
        fx.write_store(json!({"builtin": {"name": "builtin", "enabled": true}}));
        let plugin = TestPlugin::new("builtin");
        let manager = fx.manager(FakeLoader::with(&[]));

        manager.register_plugin(plugin.clone()).unwrap();
        let report = manager.load_plugins().unwrap();

        assert_eq!(report.started, vec!["builtin"]);
        assert_eq!(plugin.starts(), 1);
    }

    #[test]
    fn test_init_registers_hooks_through_host() {
        let fx = Fixture::new();
        fx.add_module("counter");
        let manager = fx.manager(FakeLoader::with(&[("counter", TestPlugin::new("counter"))]));
        manager.load_plugins().unwrap();

        assert!(manager.has_hook("article_view"));
        assert_eq!(manager.hook_points(), vec!["article_view"]);
        let result = manager.apply_hooks("article_view", &[]).unwrap();
        assert_eq!(downcast_value::<String>(&result).map(String::as_str), Some("counter"));
    }

    #[test]
    fn test_apply_hooks_last_wins_and_collect_sees_all() {
        let fx = Fixture::new();
        let manager = fx.manager(FakeLoader::with(&[]));
        manager.add_hook("p", Hook::new("a", 10, |_| Some(hook_value("A"))));
        manager.add_hook("p", Hook::new("b", 5, |_| Some(hook_value("B"))));

        let result = manager.apply_hooks("p", &[]).unwrap();
        assert_eq!(downcast_value::<&str>(&result), Some(&"B"));

        let all = manager.collect_hooks("p", &[]);
        assert_eq!(all.len(), 2);
        assert_eq!(downcast_value::<&str>(all[0].as_ref().unwrap()), Some(&"A"));

        assert!(manager.apply_hooks("unknown", &[]).is_none());
        assert!(manager.collect_hooks("unknown", &[]).is_empty());
    }

    #[test]
    fn test_remove_hook_and_has_hook() {
        let fx = Fixture::new();
        let manager = fx.manager(FakeLoader::with(&[]));
        manager.add_hook("p", Hook::new("a", 1, |_| None));

        assert_eq!(manager.remove_hook("p", "missing"), 0);
        assert_eq!(manager.get_hooks("p").len(), 1);
        assert_eq!(manager.remove_hook("p", "a"), 1);
        assert!(!manager.has_hook("p"));
        assert!(manager.get_hooks("p").is_empty());
    }

    #[test]
    fn test_callback_can_add_hook_during_dispatch() {
        let fx = Fixture::new();
        let manager = fx.manager(FakeLoader::with(&[]));
        let host = manager.clone();
        manager.add_hook(
            "p",
            Hook::new("spawner", 1, move |_| {
                host.add_hook("p", Hook::new("spawned", 0, |_| None));
                host.has_hook("p");
                Some(hook_value(1_u8))
            }),
        );

        let result = manager.apply_hooks("p", &[]).unwrap();
        assert_eq!(downcast_value::<u8>(&result), Some(&1));
        assert_eq!(manager.get_hooks("p").len(), 2);
    }

    #[test]
    fn test_concurrent_dispatch_sees_old_or_new_list() {
        let fx = Fixture::new();
        let manager = fx.manager(FakeLoader::with(&[]));
        manager.add_hook("p", Hook::new("base", 10, |_| Some(hook_value("old"))));

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..500 {
                        let result = manager.apply_hooks("p", &[]).unwrap();
                        let seen = *downcast_value::<&str>(&result).unwrap();
                        assert!(seen == "old" || seen == "new");
                    }
                });
            }
            scope.spawn(|| {
                manager.add_hook("p", Hook::new("late", 1, |_| Some(hook_value("new"))));
            });
        });

        let result = manager.apply_hooks("p", &[]).unwrap();
        assert_eq!(downcast_value::<&str>(&result), Some(&"new"));
    }

    #[test]
    fn test_dynamic_loader_rejects_garbage_and_continues() {
        let fx = Fixture::new();
        fx.add_module("garbage");
        std::fs::write(
            fx.plugin_dir().join(format!("garbage.{DLL_EXTENSION}")),
            b"not a library",
        )
        .unwrap();
        let manager = PluginManager::new(&fx.config);

        let report = manager.load_plugins().unwrap();

        assert!(report.loaded.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert!(manager.plugins().is_empty());
    }
}
