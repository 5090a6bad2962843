use std::sync::Arc;

/// Resource key under which the product is published.
pub const PRODUCT_RESOURCE: &str = "product";

/// A shared counter.
pub trait Product: Send + Sync {
    fn value(&self) -> i64;

    /// Increment by the configured step and return the new value.
    fn increase_value(&self) -> i64;
}

/// The type stored in the `product` resource.
pub type ProductHandle = Arc<dyn Product>;
