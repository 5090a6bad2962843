// === MODULE DEFINITION ===
pub mod module;
pub use module::ProductProviderModule;

// === PUBLIC CONTRACT ===
// Consumers depend on this crate for the shared `Product` interface.
pub mod contract;
pub use contract::{Product, ProductHandle, PRODUCT_RESOURCE};

#[doc(hidden)]
pub mod config;
#[doc(hidden)]
pub mod domain;
