mod host_runtime;
mod runner;

pub use host_runtime::{CliHook, HostRuntime};
pub use runner::{run, RunOptions, ShutdownOptions};
