//! The resolution engine.
//!
//! [`PluginSystem`] owns every registered module. `initialize` wires providers to
//! consumers through a [`DependencyGraph`], runs the modules in dependency order and
//! keeps that order for `start`, `stop` and `unload`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::cli::Cli;
use crate::context::{ConfigProvider, EmptyConfigProvider, MainLoop, ModuleCtx, PrepareCtx};
use crate::contracts::{ConsumerSet, ProviderSet};
use crate::graph::{DependencyGraph, GraphError};
use crate::loader::LoadedModule;
use crate::resource::{ResourceError, ResourceRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    Unresolved,
    Resolved,
    Started,
    Stopped,
    Unloaded,
    Failed,
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unresolved => "unresolved",
            Self::Resolved => "resolved",
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Unloaded => "unloaded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum SystemError {
    #[error("module '{name}' is registered more than once")]
    DuplicateModule { name: String },
    #[error("module '{module}' depends on unregistered resource '{key}'")]
    UnresolvedDependency { module: String, key: String },
    #[error("circular dependency detected: {}", format_cycles(.cycles))]
    CircularDependency { cycles: Vec<Vec<String>> },
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: SystemState,
    },

    #[error("prepare failed for module '{module}'")]
    Prepare {
        module: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("module '{module}' failed to consume resource '{key}'")]
    Consume {
        module: String,
        key: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("initialization failed for module '{module}'")]
    Init {
        module: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("module '{module}' failed to provide resource '{key}'")]
    Provide {
        module: String,
        key: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("start failed for module '{module}'")]
    Start {
        module: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("stop failed for module '{module}'")]
    Stop {
        module: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("unload failed for module '{module}'")]
    Unload {
        module: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

/// Renders cycles as `(1) A -> B -> A; (2) ...`.
fn format_cycles(cycles: &[Vec<String>]) -> String {
    let mut out = String::new();
    for (i, cycle) in cycles.iter().enumerate() {
        out.push_str(&format!("({}) ", i + 1));
        for name in cycle {
            out.push_str(name);
            out.push_str(" -> ");
        }
        if let Some(first) = cycle.first() {
            out.push_str(first);
        }
        out.push_str("; ");
    }
    out
}

/// One module plus its declarations for the current resolution pass.
struct ModuleNode {
    name: String,
    loaded: LoadedModule,
    providers: ProviderSet,
    consumers: ConsumerSet,
    // Keys this module declares but another module already owns.
    shadowed: Vec<String>,
}

/// Owns modules and drives them through their lifecycle in dependency order.
pub struct PluginSystem {
    unresolved: Vec<LoadedModule>,
    ordered: Vec<LoadedModule>,
    resources: ResourceRegistry,
    config: Arc<dyn ConfigProvider>,
    state: SystemState,
}

impl Default for PluginSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginSystem {
    pub fn new() -> Self {
        Self {
            unresolved: Vec::new(),
            ordered: Vec::new(),
            resources: ResourceRegistry::new(),
            config: Arc::new(EmptyConfigProvider),
            state: SystemState::Unresolved,
        }
    }

    /// Source of the config sections handed to modules in `initialize`.
    pub fn with_config(mut self, config: Arc<dyn ConfigProvider>) -> Self {
        self.config = config;
        self
    }

    pub fn set_config(&mut self, config: Arc<dyn ConfigProvider>) {
        self.config = config;
    }

    /// Take ownership of a module. It stays unresolved until `initialize`.
    pub fn register_module(&mut self, module: impl Into<LoadedModule>) {
        let module = module.into();
        tracing::debug!(module = %module.name(), version = %module.version(), "Module registered");
        self.unresolved.push(module);
    }

    pub fn merge_modules(&mut self, modules: impl IntoIterator<Item = LoadedModule>) {
        for module in modules {
            self.register_module(module);
        }
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    pub fn unresolved_len(&self) -> usize {
        self.unresolved.len()
    }

    /// Names of resolved modules in initialization order.
    pub fn resolved_order(&self) -> Vec<&str> {
        self.ordered.iter().map(LoadedModule::name).collect()
    }

    pub fn resources(&self) -> &ResourceRegistry {
        &self.resources
    }

    /// Run every unresolved module's prepare hook in registration order.
    ///
    /// Returns the main loop claimed by a module, if any.
    pub fn prepare(&mut self, cli: &mut Cli) -> Result<Option<MainLoop>, SystemError> {
        tracing::info!("Phase: prepare");
        let mut main_loop = None;

        for loaded in &mut self.unresolved {
            let name = loaded.name().to_string();
            tracing::debug!(module = %name, "Preparing module");
            let mut ctx = PrepareCtx::new(name.clone(), cli, &mut main_loop);
            loaded
                .module_mut()
                .prepare(&mut ctx)
                .map_err(|source| SystemError::Prepare {
                    module: name,
                    source,
                })?;
        }

        Ok(main_loop.map(|(owner, main_loop)| {
            tracing::debug!(module = %owner, "Main loop claimed");
            main_loop
        }))
    }

    /// Resolve dependencies and initialize every unresolved module.
    ///
    /// Validation failures (duplicate names, missing providers, cycles) leave all
    /// modules unresolved and untouched. A failing hook stops the pass: modules
    /// that completed keep their place in the resolved order, the rest are not run.
    pub fn initialize(&mut self) -> Result<(), SystemError> {
        if self.state != SystemState::Unresolved {
            return Err(SystemError::InvalidState {
                operation: "initialize",
                state: self.state,
            });
        }
        tracing::info!("Phase: initialize");

        self.resources = ResourceRegistry::new();
        let sorted = self.resolve()?;

        let mut remaining = sorted.into_iter();
        while let Some(mut node) = remaining.next() {
            if let Err(err) = self.init_node(&mut node) {
                tracing::error!(module = %node.name, error = %err, "Resolution pass aborted");
                self.unresolved.push(node.loaded);
                self.unresolved.extend(remaining.map(|n| n.loaded));
                self.state = SystemState::Failed;
                return Err(err);
            }
            self.ordered.push(node.loaded);
        }

        self.state = SystemState::Resolved;
        tracing::info!(order = ?self.resolved_order(), "Modules resolved");
        Ok(())
    }

    /// Build and validate the graph, returning nodes in initialization order.
    fn resolve(&mut self) -> Result<Vec<ModuleNode>, SystemError> {
        let mut graph = DependencyGraph::new(|n: &ModuleNode| n.name.clone());
        let mut origins: HashMap<String, String> = HashMap::new();
        let mut wants: Vec<(String, Vec<String>)> = Vec::new();

        let mut pending = std::mem::take(&mut self.unresolved).into_iter();
        while let Some(mut loaded) = pending.next() {
            let name = loaded.name().to_string();
            if graph.contains(&name) {
                self.unresolved = graph
                    .into_nodes()
                    .into_iter()
                    .map(|n| n.loaded)
                    .chain(std::iter::once(loaded))
                    .chain(pending)
                    .collect();
                return Err(SystemError::DuplicateModule { name });
            }

            let mut providers = ProviderSet::new();
            let mut consumers = ConsumerSet::new();
            loaded.module_mut().declare_providers(&mut providers);
            loaded.module_mut().declare_consumers(&mut consumers);

            let mut shadowed = Vec::new();
            for key in providers.keys() {
                match origins.get(key) {
                    // Repeated within one module; the registry keeps the first value.
                    Some(owner) if *owner == name => {}
                    Some(owner) => {
                        tracing::warn!(
                            key = %key,
                            kept = %owner,
                            ignored = %name,
                            "Resource provided more than once; first registration wins"
                        );
                        shadowed.push(key.to_string());
                    }
                    None => {
                        origins.insert(key.to_string(), name.clone());
                    }
                }
            }
            wants.push((name.clone(), consumers.keys().map(str::to_string).collect()));

            graph.add_node(ModuleNode {
                name,
                loaded,
                providers,
                consumers,
                shadowed,
            })?;
        }

        for (module, keys) in &wants {
            for key in keys {
                let Some(provider) = origins.get(key) else {
                    self.unresolved = Self::release(graph);
                    return Err(SystemError::UnresolvedDependency {
                        module: module.clone(),
                        key: key.clone(),
                    });
                };
                graph.add_edge(module, provider)?;
            }
        }

        let cycles: Vec<Vec<String>> = graph
            .find_cycles()
            .into_iter()
            .map(|cycle| cycle.into_iter().map(|n| n.name.clone()).collect())
            .collect();
        if !cycles.is_empty() {
            self.unresolved = Self::release(graph);
            return Err(SystemError::CircularDependency { cycles });
        }

        Ok(graph.into_sorted())
    }

    fn release(graph: DependencyGraph<String, ModuleNode>) -> Vec<LoadedModule> {
        graph.into_nodes().into_iter().map(|n| n.loaded).collect()
    }

    /// Consumers, then `initialize`, then providers.
    fn init_node(&mut self, node: &mut ModuleNode) -> Result<(), SystemError> {
        tracing::debug!(module = %node.name, "Initializing module");

        for (key, consume) in node.consumers.iter_mut() {
            let resource = self.resources.get(key)?;
            consume(resource).map_err(|source| SystemError::Consume {
                module: node.name.clone(),
                key: key.to_string(),
                source,
            })?;
        }

        let ctx = ModuleCtx::new(node.name.clone(), Arc::clone(&self.config));
        node.loaded
            .module_mut()
            .initialize(&ctx)
            .map_err(|source| SystemError::Init {
                module: node.name.clone(),
                source,
            })?;

        for (key, provide) in node.providers.iter_mut() {
            if node.shadowed.iter().any(|k| k == key) {
                continue;
            }
            let resource = provide().map_err(|source| SystemError::Provide {
                module: node.name.clone(),
                key: key.to_string(),
                source,
            })?;
            self.resources.put(key, resource);
        }

        Ok(())
    }

    /// Start resolved modules, dependencies first.
    ///
    /// If a module fails, the modules already started are stopped in reverse order.
    pub fn start(&mut self) -> Result<(), SystemError> {
        if !matches!(self.state, SystemState::Resolved | SystemState::Stopped) {
            return Err(SystemError::InvalidState {
                operation: "start",
                state: self.state,
            });
        }
        tracing::info!("Phase: start");

        for i in 0..self.ordered.len() {
            let name = self.ordered[i].name().to_string();
            tracing::debug!(module = %name, "Starting module");
            if let Err(source) = self.ordered[i].module_mut().start() {
                tracing::error!(module = %name, error = %source, "Start failed; stopping started modules");
                for started in self.ordered[..i].iter_mut().rev() {
                    if let Err(e) = started.module_mut().stop() {
                        tracing::warn!(module = %started.name(), error = %e, "Failed to stop module");
                    }
                }
                self.state = SystemState::Failed;
                return Err(SystemError::Start {
                    module: name,
                    source,
                });
            }
        }

        self.state = SystemState::Started;
        Ok(())
    }

    /// Stop resolved modules, dependents first.
    ///
    /// Every module is visited; the first failure is returned afterwards.
    pub fn stop(&mut self) -> Result<(), SystemError> {
        if self.state == SystemState::Unloaded {
            return Err(SystemError::InvalidState {
                operation: "stop",
                state: self.state,
            });
        }
        tracing::info!("Phase: stop");

        let mut first_error = None;
        for loaded in self.ordered.iter_mut().rev() {
            let name = loaded.name().to_string();
            tracing::debug!(module = %name, "Stopping module");
            if let Err(source) = loaded.module_mut().stop() {
                tracing::warn!(module = %name, error = %source, "Failed to stop module");
                first_error.get_or_insert(SystemError::Stop {
                    module: name,
                    source,
                });
            }
        }

        if self.state != SystemState::Failed {
            self.state = SystemState::Stopped;
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Unload and destroy resolved modules, dependents first.
    ///
    /// Each module is dropped, together with its library, before the previous one
    /// is unloaded. Every module is visited; the first failure is returned afterwards.
    pub fn unload(&mut self) -> Result<(), SystemError> {
        if self.state == SystemState::Unloaded {
            return Ok(());
        }
        tracing::info!("Phase: unload");

        // Resource values may run code from the libraries released below.
        self.resources = ResourceRegistry::new();

        let mut first_error = None;
        while let Some(mut loaded) = self.ordered.pop() {
            let name = loaded.name().to_string();
            tracing::debug!(module = %name, "Unloading module");
            if let Err(source) = loaded.module_mut().unload() {
                tracing::warn!(module = %name, error = %source, "Failed to unload module");
                first_error.get_or_insert(SystemError::Unload {
                    module: name,
                    source,
                });
            }
            drop(loaded);
        }

        self.state = SystemState::Unloaded;
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for PluginSystem {
    fn drop(&mut self) {
        self.resources = ResourceRegistry::new();
        // Dependents go before the modules they used.
        while let Some(loaded) = self.ordered.pop() {
            drop(loaded);
        }
    }
}

impl fmt::Debug for PluginSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginSystem")
            .field("state", &self.state)
            .field("unresolved", &self.unresolved)
            .field("ordered", &self.resolved_order())
            .field("resources", &self.resources.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::Module;
    use crate::resource::Resource;

    struct Stub {
        name: &'static str,
        provides: &'static [&'static str],
        consumes: &'static [&'static str],
    }

    impl Module for Stub {
        fn name(&self) -> &str {
            self.name
        }
        fn declare_providers(&mut self, providers: &mut ProviderSet) {
            for key in self.provides {
                let name = self.name;
                providers.provide(*key, move || Ok(Resource::new(name.to_string())));
            }
        }
        fn declare_consumers(&mut self, consumers: &mut ConsumerSet) {
            for key in self.consumes {
                consumers.consume(*key, |_| Ok(()));
            }
        }
        fn initialize(&mut self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn stub(
        name: &'static str,
        provides: &'static [&'static str],
        consumes: &'static [&'static str],
    ) -> Box<dyn Module> {
        Box::new(Stub {
            name,
            provides,
            consumes,
        })
    }

    #[test]
    fn cycle_message_lists_each_loop() {
        let cycles = vec![
            vec!["a".to_string(), "b".to_string()],
            vec!["c".to_string()],
        ];
        assert_eq!(format_cycles(&cycles), "(1) a -> b -> a; (2) c -> c; ");
    }

    #[test]
    fn duplicate_module_names_are_rejected_without_losing_modules() {
        let mut sys = PluginSystem::new();
        sys.register_module(stub("a", &[], &[]));
        sys.register_module(stub("a", &[], &[]));
        sys.register_module(stub("b", &[], &[]));

        match sys.initialize() {
            Err(SystemError::DuplicateModule { name }) => assert_eq!(name, "a"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(sys.unresolved_len(), 3);
        assert_eq!(sys.state(), SystemState::Unresolved);
    }

    #[test]
    fn self_consuming_module_is_a_cycle() {
        let mut sys = PluginSystem::new();
        sys.register_module(stub("loop", &["x"], &["x"]));
        match sys.initialize() {
            Err(SystemError::CircularDependency { cycles }) => {
                assert_eq!(cycles, vec![vec!["loop".to_string()]]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(sys.unresolved_len(), 1);
    }

    #[test]
    fn initialize_twice_is_refused() {
        let mut sys = PluginSystem::new();
        sys.register_module(stub("p", &["x"], &[]));
        sys.initialize().unwrap();
        assert!(matches!(
            sys.initialize(),
            Err(SystemError::InvalidState {
                operation: "initialize",
                state: SystemState::Resolved
            })
        ));
    }

    #[test]
    fn start_requires_resolution() {
        let mut sys = PluginSystem::new();
        assert!(matches!(
            sys.start(),
            Err(SystemError::InvalidState { operation: "start", .. })
        ));
    }

    #[test]
    fn providers_land_in_registry() {
        let mut sys = PluginSystem::new();
        sys.register_module(stub("c", &[], &["x"]));
        sys.register_module(stub("p", &["x", "y"], &[]));
        sys.initialize().unwrap();

        assert_eq!(sys.resolved_order(), vec!["p", "c"]);
        assert_eq!(sys.resources().keys(), vec!["x", "y"]);
        assert_eq!(
            sys.resources().get("x").unwrap().get::<String>().unwrap(),
            "p"
        );
    }
}
