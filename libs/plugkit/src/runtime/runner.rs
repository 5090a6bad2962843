//! Plugkit runtime runner.
//!
//! Phase order: **initialize → start → main loop or wait → stop → unload**.
//! Shutdown can be driven by OS signals, an external `CancellationToken`,
//! or an arbitrary future.

use std::{future::Future, pin::Pin};

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::runtime::HostRuntime;

/// How the runtime should decide when to stop.
pub enum ShutdownOptions {
    /// Listen for OS signals (Ctrl+C / SIGTERM).
    Signals,
    /// An external `CancellationToken` controls the lifecycle.
    Token(CancellationToken),
    /// An arbitrary future; when it completes, we initiate shutdown.
    Future(Pin<Box<dyn Future<Output = ()> + Send>>),
}

/// Options for running the Plugkit runner.
pub struct RunOptions {
    pub shutdown: ShutdownOptions,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            shutdown: ShutdownOptions::Signals,
        }
    }
}

/// Full cycle for a host whose command line has already been parsed.
///
/// Returns the main loop's exit code, or 0 when no module claimed the main loop.
/// A shutdown request during the main loop stops the modules first and then
/// waits for the loop to return.
pub async fn run(mut host: HostRuntime, opts: RunOptions) -> anyhow::Result<i32> {
    // 1. Prepare cancellation token based on shutdown options
    let cancel = match &opts.shutdown {
        ShutdownOptions::Token(t) => t.clone(),
        _ => CancellationToken::new(),
    };

    // 2. Spawn shutdown waiter (Signals / Future)
    match opts.shutdown {
        ShutdownOptions::Signals => {
            let c = cancel.clone();
            tokio::spawn(async move {
                match plugkit_bootstrap::wait_for_shutdown().await {
                    Ok(signal) => {
                        tracing::info!(%signal, "shutdown: signal received");
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            "shutdown: primary waiter failed; falling back to ctrl_c()"
                        );
                        let _ = tokio::signal::ctrl_c().await;
                    }
                }
                c.cancel();
            });
        }
        ShutdownOptions::Future(waiter) => {
            let c = cancel.clone();
            tokio::spawn(async move {
                waiter.await;
                tracing::info!("shutdown: external future completed");
                c.cancel();
            });
        }
        ShutdownOptions::Token(_) => {
            tracing::info!("shutdown: external token will control lifecycle");
        }
    }

    // 3. Resolve and start
    host.initialize()?;
    host.start()?;

    // 4. Main loop or wait
    let mut stopped = false;
    let code = match host.take_main_loop() {
        Some(main_loop) => {
            tracing::info!("Running main loop");
            let mut handle = tokio::task::spawn_blocking(main_loop);
            let joined = tokio::select! {
                joined = &mut handle => joined,
                _ = cancel.cancelled() => {
                    tracing::info!("Shutdown requested while main loop is running");
                    stopped = true;
                    if let Err(e) = host.stop() {
                        tracing::warn!(error = %e, "Stop failed");
                    }
                    handle.await
                }
            };
            joined.context("main loop panicked")??
        }
        None => {
            cancel.cancelled().await;
            0
        }
    };

    // 5. Teardown
    if !stopped {
        host.stop()?;
    }
    host.unload()?;

    tracing::info!(exit_code = code, "Host finished");
    Ok(code)
}
