use crate::context::{ModuleCtx, PrepareCtx};
use crate::resource::Resource;

/// Produces a resource once its module has been initialized.
pub type ProviderFn = Box<dyn FnMut() -> anyhow::Result<Resource> + Send>;

/// Receives a resource before its module is initialized.
pub type ConsumerFn = Box<dyn FnMut(&Resource) -> anyhow::Result<()> + Send>;

/// A unit of functionality hosted by the plugin system.
///
/// Lifecycle: `prepare` → `declare_*` → consumers → `initialize` → providers →
/// `start` → `stop` → `unload`. Teardown runs in reverse dependency order.
pub trait Module: Send + 'static {
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "0.0.0"
    }

    /// Register command line options or claim the main loop.
    fn prepare(&mut self, _ctx: &mut PrepareCtx<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Resources this module publishes.
    fn declare_providers(&mut self, _providers: &mut ProviderSet) {}

    /// Resources this module needs before it can initialize.
    fn declare_consumers(&mut self, _consumers: &mut ConsumerSet) {}

    fn initialize(&mut self, ctx: &ModuleCtx) -> anyhow::Result<()>;

    fn start(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn unload(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Declared providers of one module, in declaration order.
#[derive(Default)]
pub struct ProviderSet {
    entries: Vec<(String, ProviderFn)>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provide<F>(&mut self, key: impl Into<String>, provider: F) -> &mut Self
    where
        F: FnMut() -> anyhow::Result<Resource> + Send + 'static,
    {
        self.entries.push((key.into(), Box::new(provider)));
        self
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut ProviderFn)> {
        self.entries.iter_mut().map(|(k, f)| (k.as_str(), f))
    }
}

/// Declared consumers of one module, in declaration order.
#[derive(Default)]
pub struct ConsumerSet {
    entries: Vec<(String, ConsumerFn)>,
}

impl ConsumerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consume<F>(&mut self, key: impl Into<String>, consumer: F) -> &mut Self
    where
        F: FnMut(&Resource) -> anyhow::Result<()> + Send + 'static,
    {
        self.entries.push((key.into(), Box::new(consumer)));
        self
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut ConsumerFn)> {
        self.entries.iter_mut().map(|(k, f)| (k.as_str(), f))
    }
}
