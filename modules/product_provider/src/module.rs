use std::sync::Arc;

use anyhow::anyhow;
use arc_swap::ArcSwapOption;
use plugkit::{Module, ModuleCtx, ProviderSet, Resource};
use tracing::{debug, info};

use crate::config::ProductProviderConfig;
use crate::contract::{ProductHandle, PRODUCT_RESOURCE};
use crate::domain::Counter;

/// Publishes a shared [`Counter`] as the `product` resource.
#[derive(Default)]
pub struct ProductProviderModule {
    // Created in initialize, read by the provider factory.
    product: Arc<ArcSwapOption<Counter>>,
}

impl Module for ProductProviderModule {
    fn name(&self) -> &str {
        "product_provider"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn declare_providers(&mut self, providers: &mut ProviderSet) {
        let slot = Arc::clone(&self.product);
        providers.provide(PRODUCT_RESOURCE, move || {
            let counter = slot
                .load_full()
                .ok_or_else(|| anyhow!("product requested before initialization"))?;
            let handle: ProductHandle = counter;
            Ok(Resource::new(handle))
        });
    }

    fn initialize(&mut self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        let cfg: ProductProviderConfig = ctx.config()?;
        debug!(initial = cfg.initial, step = cfg.step, "Loaded product_provider config");

        self.product
            .store(Some(Arc::new(Counter::new(cfg.initial, cfg.step))));
        info!("Product created");
        Ok(())
    }

    fn unload(&mut self) -> anyhow::Result<()> {
        self.product.store(None);
        Ok(())
    }
}

plugkit::register_module!(ProductProviderModule);
