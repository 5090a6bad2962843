//! # Plugkit - Plugin Host Core
//!
//! Hosts independently built modules that exchange typed resources.
//!
//! ## Features
//!
//! - **Dependency resolution**: modules declare what they provide and consume;
//!   providers are initialized before their consumers
//! - **Cycle reporting**: every dependency loop is reported by module name
//! - **Ordered teardown**: stop and unload run in reverse initialization order
//! - **Static and dynamic modules**: linked via `register_module!` or loaded
//!   from shared libraries exporting `export_module!`
//!
//! ## Basic Module Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use plugkit::{Module, ModuleCtx, ProviderSet, Resource};
//!
//! #[derive(Default)]
//! pub struct Clock;
//!
//! impl Module for Clock {
//!     fn name(&self) -> &str { "clock" }
//!
//!     fn declare_providers(&mut self, providers: &mut ProviderSet) {
//!         providers.provide("clock", || Ok(Resource::new(Arc::new(SystemClock))));
//!     }
//!
//!     fn initialize(&mut self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! plugkit::register_module!(Clock);
//! ```

pub use anyhow::Result;

// Re-export inventory for the registration macro
pub use inventory;

pub mod cli;
pub mod collector;
pub mod context;
pub mod contracts;
pub mod graph;
pub mod loader;
pub mod registry;
pub mod resource;
pub mod runtime;
pub mod system;

pub use cli::{AppInfo, Cli, CliError, CliOutcome, CliValue, OptionSpec};
pub use collector::PluginCollector;
pub use context::{
    ConfigProvider, ContextError, EmptyConfigProvider, MainLoop, ModuleCtx, PrepareCtx,
};
pub use contracts::{ConsumerFn, ConsumerSet, Module, ProviderFn, ProviderSet};
pub use graph::{DependencyGraph, GraphError};
pub use loader::{DylibLoader, LoadError, LoadedModule, ModuleLoader, MAKE_MODULE_SYMBOL};
pub use registry::discover_static_modules;
pub use resource::{Resource, ResourceError, ResourceRegistry};
pub use runtime::{run, HostRuntime, RunOptions, ShutdownOptions};
pub use system::{PluginSystem, SystemError, SystemState};
