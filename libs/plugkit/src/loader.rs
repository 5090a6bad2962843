//! Loading modules from shared libraries.
//!
//! A plugin library exports [`MAKE_MODULE_SYMBOL`], a function returning a boxed
//! [`Module`]. Use [`export_module!`](crate::export_module) to generate it. Host and
//! plugin must be built with the same compiler and the same `plugkit` version.

#![allow(unsafe_code)]

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::{Library, Symbol};
use thiserror::Error;

use crate::contracts::Module;

/// Name of the factory symbol every plugin library must export.
pub const MAKE_MODULE_SYMBOL: &str = "plugkit_make_module";

/// Signature of the exported factory.
pub type MakeModuleFn = fn() -> Box<dyn Module>;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("plugin library not found: {}", path.display())]
    LibraryNotFound { path: PathBuf },
    #[error("failed to open plugin library {}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("symbol '{symbol}' not found in {}", path.display())]
    SymbolNotFound {
        path: PathBuf,
        symbol: &'static str,
        #[source]
        source: libloading::Error,
    },
}

/// A module instance together with the library its code lives in.
///
/// Field order matters: the module is dropped before the library is unloaded.
pub struct LoadedModule {
    module: Box<dyn Module>,
    library: Option<Arc<Library>>,
}

impl LoadedModule {
    pub fn new(module: Box<dyn Module>) -> Self {
        Self {
            module,
            library: None,
        }
    }

    pub fn name(&self) -> &str {
        self.module.name()
    }

    pub fn version(&self) -> &str {
        self.module.version()
    }

    /// Whether the module came from a shared library.
    pub fn is_dynamic(&self) -> bool {
        self.library.is_some()
    }

    pub fn module(&self) -> &dyn Module {
        self.module.as_ref()
    }

    pub fn module_mut(&mut self) -> &mut dyn Module {
        self.module.as_mut()
    }
}

impl From<Box<dyn Module>> for LoadedModule {
    fn from(module: Box<dyn Module>) -> Self {
        Self::new(module)
    }
}

impl fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModule")
            .field("name", &self.name())
            .field("version", &self.version())
            .field("dynamic", &self.is_dynamic())
            .finish()
    }
}

/// Turns a plugin file into a module instance.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<LoadedModule, LoadError>;
}

/// Loads plugins with the platform dynamic linker.
#[derive(Debug, Default, Clone, Copy)]
pub struct DylibLoader;

impl ModuleLoader for DylibLoader {
    fn load(&self, path: &Path) -> Result<LoadedModule, LoadError> {
        if !path.is_file() {
            return Err(LoadError::LibraryNotFound {
                path: path.to_path_buf(),
            });
        }

        // SAFETY: loading a library runs its initializers; plugin files are trusted input.
        let library = unsafe { Library::new(path) }.map_err(|source| LoadError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let module = {
            // SAFETY: the symbol is generated by `export_module!` with the `MakeModuleFn` signature.
            let make: Symbol<'_, MakeModuleFn> = unsafe {
                library.get(MAKE_MODULE_SYMBOL.as_bytes())
            }
            .map_err(|source| LoadError::SymbolNotFound {
                path: path.to_path_buf(),
                symbol: MAKE_MODULE_SYMBOL,
                source,
            })?;
            make()
        };

        tracing::debug!(
            path = %path.display(),
            module = module.name(),
            version = module.version(),
            "Loaded plugin library"
        );

        Ok(LoadedModule {
            module,
            library: Some(Arc::new(library)),
        })
    }
}

/// Export a module type from a `cdylib` plugin.
///
/// The type must implement [`Module`](crate::Module) and `Default`.
#[macro_export]
macro_rules! export_module {
    ($ty:ty) => {
        #[allow(unsafe_code)]
        #[no_mangle]
        pub fn plugkit_make_module() -> ::std::boxed::Box<dyn $crate::Module> {
            ::std::boxed::Box::new(<$ty as ::std::default::Default>::default())
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ModuleCtx;

    struct Noop;

    impl Module for Noop {
        fn name(&self) -> &str {
            "noop"
        }
        fn initialize(&mut self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libabsent.so");
        match DylibLoader.load(&path) {
            Err(LoadError::LibraryNotFound { path: p }) => assert_eq!(p, path),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn garbage_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libgarbage.so");
        std::fs::write(&path, b"definitely not an ELF image").unwrap();
        assert!(matches!(
            DylibLoader.load(&path),
            Err(LoadError::Open { .. })
        ));
    }

    #[test]
    fn static_modules_wrap_without_library() {
        let loaded = LoadedModule::from(Box::new(Noop) as Box<dyn Module>);
        assert_eq!(loaded.name(), "noop");
        assert_eq!(loaded.version(), "0.0.0");
        assert!(!loaded.is_dynamic());
    }
}
