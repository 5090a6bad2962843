use std::sync::Arc;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::cli::Cli;

/// Blocking function that runs the application once all modules are started.
///
/// The returned value becomes the process exit code.
pub type MainLoop = Box<dyn FnOnce() -> anyhow::Result<i32> + Send>;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("possible module conflict: main loop already set by '{existing}', '{module}' tried to replace it")]
    MainLoopConflict { existing: String, module: String },
    #[error("module '{module}' config is invalid")]
    InvalidConfig {
        module: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Source of per-module configuration sections.
pub trait ConfigProvider: Send + Sync {
    /// Raw config section for `module_name`, if any.
    fn get_module_config(&self, module_name: &str) -> Option<&serde_json::Value>;
}

/// Provider with no sections at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyConfigProvider;

impl ConfigProvider for EmptyConfigProvider {
    fn get_module_config(&self, _module_name: &str) -> Option<&serde_json::Value> {
        None
    }
}

/// Handed to every module during the prepare phase.
pub struct PrepareCtx<'a> {
    module_name: String,
    cli: &'a mut Cli,
    main_loop: &'a mut Option<(String, MainLoop)>,
}

impl<'a> PrepareCtx<'a> {
    pub(crate) fn new(
        module_name: impl Into<String>,
        cli: &'a mut Cli,
        main_loop: &'a mut Option<(String, MainLoop)>,
    ) -> Self {
        Self {
            module_name: module_name.into(),
            cli,
            main_loop,
        }
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Command line handle; register options here.
    pub fn cli(&mut self) -> &mut Cli {
        self.cli
    }

    /// Claim the application main loop. Only one module may do so.
    pub fn set_main_loop(&mut self, main_loop: MainLoop) -> Result<(), ContextError> {
        if let Some((existing, _)) = self.main_loop.as_ref() {
            return Err(ContextError::MainLoopConflict {
                existing: existing.clone(),
                module: self.module_name.clone(),
            });
        }
        *self.main_loop = Some((self.module_name.clone(), main_loop));
        Ok(())
    }
}

/// Handed to every module during initialization.
#[derive(Clone)]
pub struct ModuleCtx {
    module_name: String,
    config: Arc<dyn ConfigProvider>,
}

impl ModuleCtx {
    pub fn new(module_name: impl Into<String>, config: Arc<dyn ConfigProvider>) -> Self {
        Self {
            module_name: module_name.into(),
            config,
        }
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn raw_config(&self) -> Option<&serde_json::Value> {
        self.config.get_module_config(&self.module_name)
    }

    /// Typed module config. A missing section yields `T::default()`.
    ///
    /// Sections may wrap the payload in a `config` key, as in
    /// `modules: { name: { config: {...} } }`.
    pub fn config<T: DeserializeOwned + Default>(&self) -> Result<T, ContextError> {
        let Some(raw) = self.raw_config() else {
            return Ok(T::default());
        };
        let section = match raw.get("config") {
            Some(inner) => inner,
            None => raw,
        };
        serde_json::from_value(section.clone()).map_err(|source| ContextError::InvalidConfig {
            module: self.module_name.clone(),
            source,
        })
    }
}

impl std::fmt::Debug for ModuleCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCtx")
            .field("module_name", &self.module_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::AppInfo;
    use serde::Deserialize;
    use std::collections::HashMap;

    struct MapProvider(HashMap<String, serde_json::Value>);

    impl ConfigProvider for MapProvider {
        fn get_module_config(&self, module_name: &str) -> Option<&serde_json::Value> {
            self.0.get(module_name)
        }
    }

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Cfg {
        step: u32,
    }

    #[test]
    fn missing_section_yields_default() {
        let ctx = ModuleCtx::new("product", Arc::new(EmptyConfigProvider));
        assert_eq!(ctx.config::<Cfg>().unwrap(), Cfg::default());
        assert!(ctx.raw_config().is_none());
    }

    #[test]
    fn nested_and_flat_sections_parse() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), serde_json::json!({ "config": { "step": 2 } }));
        map.insert("b".to_string(), serde_json::json!({ "step": 5 }));
        map.insert("c".to_string(), serde_json::json!({ "step": "many" }));
        let provider: Arc<dyn ConfigProvider> = Arc::new(MapProvider(map));

        assert_eq!(
            ModuleCtx::new("a", provider.clone()).config::<Cfg>().unwrap(),
            Cfg { step: 2 }
        );
        assert_eq!(
            ModuleCtx::new("b", provider.clone()).config::<Cfg>().unwrap(),
            Cfg { step: 5 }
        );
        assert!(matches!(
            ModuleCtx::new("c", provider).config::<Cfg>(),
            Err(ContextError::InvalidConfig { module, .. }) if module == "c"
        ));
    }

    #[test]
    fn second_main_loop_is_a_conflict() {
        let mut cli = Cli::new(AppInfo::default());
        let mut slot = None;

        PrepareCtx::new("first", &mut cli, &mut slot)
            .set_main_loop(Box::new(|| Ok(0)))
            .unwrap();
        let err = PrepareCtx::new("second", &mut cli, &mut slot)
            .set_main_loop(Box::new(|| Ok(1)))
            .unwrap_err();

        match err {
            ContextError::MainLoopConflict { existing, module } => {
                assert_eq!(existing, "first");
                assert_eq!(module, "second");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(slot.as_ref().map(|(owner, _)| owner.as_str()), Some("first"));
    }
}
