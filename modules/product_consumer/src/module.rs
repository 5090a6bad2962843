use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use anyhow::anyhow;
use plugkit::{ConsumerSet, Module, ModuleCtx, OptionSpec, PrepareCtx};
use product_provider::{ProductHandle, PRODUCT_RESOURCE};
use tracing::{debug, info};

/// Consumes the `product` resource and drives it from the application main loop.
///
/// `-i/--increase N` sets how many times the main loop increases the product.
#[derive(Default)]
pub struct ProductConsumerModule {
    product: Arc<OnceLock<ProductHandle>>,
    running: Arc<AtomicBool>,
}

impl Module for ProductConsumerModule {
    fn name(&self) -> &str {
        "product_consumer"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn prepare(&mut self, ctx: &mut PrepareCtx<'_>) -> anyhow::Result<()> {
        let increases = ctx.cli().add_option(
            OptionSpec::new("increase", "Number of increases").short('i'),
            1_u32,
        )?;

        let product = Arc::clone(&self.product);
        let running = Arc::clone(&self.running);
        ctx.set_main_loop(Box::new(move || {
            let product = product
                .get()
                .ok_or_else(|| anyhow!("product was never delivered"))?;
            for _ in 0..increases.get() {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                println!("Increased product value: {}", product.increase_value());
            }
            println!("Exiting");
            Ok(0)
        }))?;
        Ok(())
    }

    fn declare_consumers(&mut self, consumers: &mut ConsumerSet) {
        let slot = Arc::clone(&self.product);
        consumers.consume(PRODUCT_RESOURCE, move |resource| {
            let handle: ProductHandle = resource.get()?;
            if slot.set(handle).is_err() {
                debug!("Product already delivered; keeping the first handle");
            }
            Ok(())
        });
    }

    fn initialize(&mut self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        let product = self
            .product
            .get()
            .ok_or_else(|| anyhow!("product was not delivered before initialization"))?;
        info!(value = product.value(), "Initial product value");
        Ok(())
    }

    fn start(&mut self) -> anyhow::Result<()> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

plugkit::register_module!(ProductConsumerModule);
