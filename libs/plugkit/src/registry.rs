//! Modules linked into the host binary.
//!
//! A module crate submits a factory with [`register_module!`](crate::register_module);
//! the host collects every submission at startup.

use crate::contracts::Module;
use crate::loader::LoadedModule;

/// The factory submitted via `inventory::submit!`.
pub struct Registrator(pub fn() -> Box<dyn Module>);

inventory::collect!(Registrator);

/// Instantiate every statically registered module, ordered by name.
pub fn discover_static_modules() -> Vec<LoadedModule> {
    let mut modules: Vec<LoadedModule> = inventory::iter::<Registrator>
        .into_iter()
        .map(|r| LoadedModule::from((r.0)()))
        .collect();
    modules.sort_by(|a, b| a.name().cmp(b.name()));
    tracing::debug!(
        modules = ?modules.iter().map(LoadedModule::name).collect::<Vec<_>>(),
        "Discovered static modules"
    );
    modules
}

/// Register a `Default` module type for static discovery.
#[macro_export]
macro_rules! register_module {
    ($ty:ty) => {
        const _: () = {
            fn make_module() -> ::std::boxed::Box<dyn $crate::Module> {
                ::std::boxed::Box::new(<$ty as ::std::default::Default>::default())
            }
            $crate::inventory::submit! {
                $crate::registry::Registrator(make_module)
            }
        };
    };
}
