use serde::{Deserialize, Serialize};

/// Configuration for the product_provider module
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProductProviderConfig {
    #[serde(default)]
    pub initial: i64,
    #[serde(default = "default_step")]
    pub step: i64,
}

impl Default for ProductProviderConfig {
    fn default() -> Self {
        Self {
            initial: 0,
            step: default_step(),
        }
    }
}

fn default_step() -> i64 {
    1
}
