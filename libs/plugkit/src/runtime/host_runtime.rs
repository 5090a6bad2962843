//! Host Runtime - owns the plugin system and the command line of one process.
//!
//! Phases: load → prepare + CLI parse → initialize → start → main loop → stop → unload.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use crate::cli::{AppInfo, Cli, CliOutcome};
use crate::collector::PluginCollector;
use crate::context::{ConfigProvider, MainLoop};
use crate::loader::{DylibLoader, LoadedModule, ModuleLoader};
use crate::system::{PluginSystem, SystemError, SystemState};

/// Runs after modules have registered their options, right before parsing.
pub type CliHook = Box<dyn FnOnce(&mut Cli) -> anyhow::Result<()> + Send>;

/// HostRuntime drives one [`PluginSystem`] through the application lifecycle.
///
/// Dropping a runtime that was initialized stops and unloads its modules.
pub struct HostRuntime {
    cli: Cli,
    system: PluginSystem,
    loader: Box<dyn ModuleLoader>,
    plugin_dirs: Vec<PathBuf>,
    path_env_var: Option<String>,
    file_env_var: Option<String>,
    hooks: Vec<CliHook>,
    main_loop: Option<MainLoop>,
}

impl HostRuntime {
    pub fn new(info: AppInfo) -> Self {
        Self {
            cli: Cli::new(info),
            system: PluginSystem::new(),
            loader: Box::new(DylibLoader),
            plugin_dirs: Vec::new(),
            path_env_var: None,
            file_env_var: None,
            hooks: Vec::new(),
            main_loop: None,
        }
    }

    /// Command line shared with modules; the host registers its own options here.
    pub fn cli_mut(&mut self) -> &mut Cli {
        &mut self.cli
    }

    pub fn system(&self) -> &PluginSystem {
        &self.system
    }

    pub fn set_config(&mut self, config: Arc<dyn ConfigProvider>) {
        self.system.set_config(config);
    }

    /// Register a module that is already in memory (linked or built by the host).
    pub fn preload_module(&mut self, module: impl Into<LoadedModule>) {
        self.system.register_module(module);
    }

    pub fn preload_modules(&mut self, modules: impl IntoIterator<Item = LoadedModule>) {
        self.system.merge_modules(modules);
    }

    pub fn set_plugin_directories(&mut self, dirs: impl IntoIterator<Item = PathBuf>) {
        self.plugin_dirs = dirs.into_iter().collect();
    }

    /// Environment variables listing extra plugin directories and plugin files.
    pub fn set_plugin_env_vars(&mut self, path_var: impl Into<String>, file_var: impl Into<String>) {
        self.path_env_var = Some(path_var.into());
        self.file_env_var = Some(file_var.into());
    }

    pub fn set_loader(&mut self, loader: Box<dyn ModuleLoader>) {
        self.loader = loader;
    }

    pub fn add_on_before_cli_parse_hook<F>(&mut self, hook: F)
    where
        F: FnOnce(&mut Cli) -> anyhow::Result<()> + Send + 'static,
    {
        self.hooks.push(Box::new(hook));
    }

    /// Collect plugin files and load each of them. Returns how many were loaded.
    pub fn load_modules(&mut self) -> anyhow::Result<usize> {
        tracing::info!("Phase: load");

        let mut collector = PluginCollector::new();
        collector
            .add_extension(std::env::consts::DLL_EXTENSION)
            .add_directories(self.plugin_dirs.iter().cloned());
        if let Some(var) = &self.path_env_var {
            collector.enable_path_env_var(var.clone());
        }
        if let Some(var) = &self.file_env_var {
            collector.enable_file_env_var(var.clone());
        }

        let paths = collector.collect();
        for path in &paths {
            let module = self
                .loader
                .load(path)
                .with_context(|| format!("failed to load plugin {}", path.display()))?;
            tracing::info!(module = %module.name(), version = %module.version(), path = %path.display(), "Plugin loaded");
            self.system.register_module(module);
        }
        Ok(paths.len())
    }

    /// Prepare modules, run the pre-parse hooks and parse `args`.
    pub fn parse_cli<I, S>(&mut self, args: I) -> anyhow::Result<CliOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<std::ffi::OsString> + Clone,
    {
        self.main_loop = self.system.prepare(&mut self.cli)?;

        for hook in self.hooks.drain(..) {
            hook(&mut self.cli)?;
        }

        Ok(self.cli.parse(args)?)
    }

    pub fn initialize(&mut self) -> Result<(), SystemError> {
        self.system.initialize()
    }

    pub fn start(&mut self) -> Result<(), SystemError> {
        self.system.start()
    }

    /// The main loop claimed during prepare, if any. Can be taken once.
    pub fn take_main_loop(&mut self) -> Option<MainLoop> {
        self.main_loop.take()
    }

    pub fn stop(&mut self) -> Result<(), SystemError> {
        self.system.stop()
    }

    pub fn unload(&mut self) -> Result<(), SystemError> {
        self.system.unload()
    }
}

impl Drop for HostRuntime {
    fn drop(&mut self) {
        // The main loop may capture module state.
        self.main_loop = None;

        if self.system.state() == SystemState::Started {
            if let Err(e) = self.system.stop() {
                tracing::warn!(error = %e, "Stop during drop failed");
            }
        }
        if !matches!(
            self.system.state(),
            SystemState::Unresolved | SystemState::Unloaded
        ) {
            if let Err(e) = self.system.unload() {
                tracing::warn!(error = %e, "Unload during drop failed");
            }
        }
    }
}

impl std::fmt::Debug for HostRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostRuntime")
            .field("system", &self.system)
            .field("plugin_dirs", &self.plugin_dirs)
            .field("has_main_loop", &self.main_loop.is_some())
            .finish_non_exhaustive()
    }
}
