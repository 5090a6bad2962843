// === MODULE DEFINITION ===
pub mod module;
pub use module::ProductConsumerModule;
