use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use mimalloc::MiMalloc;
use plugkit::{AppInfo, CliOutcome, CliValue, HostRuntime, OptionSpec, RunOptions};
use plugkit_bootstrap::{AppConfig, AppConfigProvider, CliArgs, ConfigProvider};

mod args;
mod registered_modules;

use args::BootArgs;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Adapter to make `AppConfigProvider` implement `plugkit::ConfigProvider`.
struct PlugkitConfigAdapter(Arc<AppConfigProvider>);

impl plugkit::ConfigProvider for PlugkitConfigAdapter {
    fn get_module_config(&self, module_name: &str) -> Option<&serde_json::Value> {
        self.0.get_module_config(module_name)
    }
}

/// Options the host itself registers next to the module options.
struct HostOptions {
    print_config: CliValue<bool>,
    verbose: CliValue<u8>,
}

impl HostOptions {
    fn register(cli: &mut plugkit::Cli) -> Result<Self> {
        // Already consumed by the boot scan; registered for help and validation.
        cli.add_option(
            OptionSpec::new("config", "Path to configuration file").short('c'),
            String::new(),
        )?;
        cli.add_list::<String>(OptionSpec::new(
            "plugins-dir",
            "Additional directory to load plugins from",
        ))?;

        Ok(Self {
            print_config: cli.add_flag(OptionSpec::new(
                "print-config",
                "Print effective configuration (YAML) and exit",
            ))?,
            verbose: cli.add_count(
                OptionSpec::new("verbose", "Log verbosity level (-v debug, -vv trace)").short('v'),
            )?,
        })
    }
}

fn app_info() -> AppInfo {
    AppInfo {
        name: "plugkit-host".to_string(),
        description: "Plugkit Host - runs statically linked and dynamically loaded modules"
            .to_string(),
        version_page: format!("plugkit-host {}", env!("CARGO_PKG_VERSION")),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let argv: Vec<String> = std::env::args().collect();
    let boot = BootArgs::scan(argv.iter().skip(1));

    // Layered config:
    // 1) defaults -> 2) YAML (if provided) -> 3) env (APP__*) -> 4) CLI overrides
    let mut config = AppConfig::load_or_default(boot.config.as_deref())?;
    config.apply_cli_overrides(&CliArgs {
        config: boot.config.clone(),
        plugin_dirs: boot.plugin_dirs,
        ..CliArgs::default()
    });

    let mut host = HostRuntime::new(app_info());
    host.set_plugin_directories(config.plugin_directories());
    host.set_plugin_env_vars(
        config.host.plugin_path_env.clone(),
        config.host.plugin_file_env.clone(),
    );
    host.preload_modules(plugkit::discover_static_modules());
    host.load_modules()?;

    let options = HostOptions::register(host.cli_mut())?;
    if let CliOutcome::Quit { message } = host.parse_cli(&argv)? {
        print!("{message}");
        return Ok(ExitCode::SUCCESS);
    }

    config.apply_cli_overrides(&CliArgs {
        verbose: options.verbose.get(),
        ..CliArgs::default()
    });
    let logging_config = config
        .logging
        .clone()
        .unwrap_or_else(plugkit_bootstrap::default_logging_config);
    plugkit_bootstrap::init_logging(&logging_config, &config.home_dir());

    if options.print_config.get() {
        println!("{}", config.to_yaml()?);
        return Ok(ExitCode::SUCCESS);
    }

    tracing::info!(
        home_dir = %config.host.home_dir,
        modules = host.system().unresolved_len(),
        "Plugkit Host starting"
    );

    // Bridge AppConfig into the per-module JSON bag handed to `initialize`.
    host.set_config(Arc::new(PlugkitConfigAdapter(Arc::new(
        AppConfigProvider::new(config),
    ))));

    let code = plugkit::run(host, RunOptions::default()).await?;
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}
