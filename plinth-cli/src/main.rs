//! plinth CLI

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use plinth_runtime::{
    HotReloadWatcher, InProcessHost, PluginLifecycleManager, RuntimeConfig,
    StaticArchiveLoader,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "plinth")]
#[command(about = "plinth plugin runtime", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and start plugins, then wait for Ctrl-C
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "plinth.yaml")]
        config: PathBuf,

        /// Log level (trace, debug, info, warn, error)
        #[arg(short, long, default_value = "info")]
        log_level: String,

        /// Watch the plugins root and reload changed plugins
        #[arg(short, long)]
        watch: bool,
    },

    /// Load plugins without starting them and print their state
    List {
        /// Path to configuration file
        #[arg(short, long, default_value = "plinth.yaml")]
        config: PathBuf,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "plinth.yaml")]
        config: PathBuf,
    },

    /// Print shell completions to stdout
    Completions {
        /// Target shell
        shell: clap_complete::Shell,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            log_level,
            watch,
        } => {
            init_tracing(&log_level)?;
            tracing::info!("Config file: {}", config.display());

            let config = load_config(&config)?;
            let auto_start = config.auto_start;
            let watch = watch || config.hot_reload.enabled;

            let host = InProcessHost::new();
            let manager = Arc::new(build_manager(config, Some(&host))?);

            manager.load_all()?;
            if auto_start {
                manager.start_all();
            }
            print_table(&manager);

            for greeter in manager.lookup::<dyn plinth_hello::Greeter>().iter() {
                tracing::info!(register = greeter.register(), "{}", greeter.greet("plinth"));
            }
            tracing::info!(routes = host.routes.len(), "Routes bound");

            let mut watcher = if watch {
                let mut watcher = HotReloadWatcher::from_config(manager.clone());
                watcher.start()?;
                let mut reloads = watcher.subscribe();
                let reload_loop = watcher.run()?;
                tokio::spawn(async move {
                    while let Some(event) = reloads.recv().await {
                        match event.error {
                            None => tracing::info!(
                                plugin = event.plugin_id.as_deref().unwrap_or("?"),
                                path = %event.path.display(),
                                "Plugin reloaded"
                            ),
                            Some(error) => tracing::warn!(
                                path = %event.path.display(),
                                error = %error,
                                "Plugin reload failed"
                            ),
                        }
                    }
                });
                Some((watcher, reload_loop))
            } else {
                None
            };

            tokio::signal::ctrl_c()
                .await
                .context("cannot listen for Ctrl-C")?;
            tracing::info!("Shutting down");

            // The reload loop flushes pending reloads once the watcher stops.
            if let Some((mut watcher, reload_loop)) = watcher.take() {
                watcher.stop();
                if let Err(e) = reload_loop.await {
                    tracing::warn!(error = %e, "Hot reload loop ended abnormally");
                }
            }
            manager.stop_all();
            Ok(())
        }

        Commands::List { config, json } => {
            tracing_subscriber::fmt().with_target(false).init();

            let manager = build_manager(load_config(&config)?, None)?;
            manager.load_all()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&manager.list_plugins())?);
            } else {
                print_table(&manager);
                for path in manager.describe_unloaded()? {
                    println!("  (not loaded) {}", path.display());
                }
            }
            Ok(())
        }

        Commands::Validate { config } => {
            tracing_subscriber::fmt().with_target(false).init();

            tracing::info!("Validating configuration: {}", config.display());

            match RuntimeConfig::load(&config) {
                Ok(cfg) => {
                    tracing::info!("✓ Configuration is valid");
                    tracing::info!("  Plugins root: {}", cfg.plugins_root.display());
                    tracing::info!("  Auto start: {}", cfg.auto_start);
                    tracing::info!("  Disabled: {}", cfg.disabled_plugins.len());
                    tracing::info!("  Hot reload: {}", cfg.hot_reload.enabled);
                    Ok(())
                }
                Err(e) => {
                    tracing::error!("✗ Configuration validation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "plinth", &mut std::io::stdout());
            Ok(())
        }

        Commands::Version => {
            println!("plinth plugin runtime");
            println!("Version: {}", env!("CARGO_PKG_VERSION"));
            println!("Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
            Ok(())
        }
    }
}

/// Load the configuration, falling back to defaults when the file is absent
fn load_config(path: &Path) -> Result<RuntimeConfig> {
    if path.exists() {
        RuntimeConfig::load(path)
            .with_context(|| format!("cannot load configuration from {}", path.display()))
    } else {
        tracing::warn!("{} not found, using default configuration", path.display());
        Ok(RuntimeConfig::default())
    }
}

/// Build a manager over the plugins linked into this binary
fn build_manager(
    config: RuntimeConfig,
    host: Option<&InProcessHost>,
) -> Result<PluginLifecycleManager> {
    let archives = StaticArchiveLoader::new()
        .with_archive(plinth_hello::PLUGIN_CLASS, plinth_hello::archive)
        .with_archive(plinth_audit::PLUGIN_CLASS, plinth_audit::archive);

    let builder = PluginLifecycleManager::builder()
        .config(config)
        .archive_loader(Arc::new(archives));
    let builder = match host {
        Some(host) => builder.host(host),
        None => builder,
    };
    Ok(builder.build()?)
}

fn print_table(manager: &PluginLifecycleManager) {
    println!(
        "{:<16} {:<10} {:<10} {:<24} {}",
        "ID", "VERSION", "STATE", "REQUIRED BY", "DETAIL"
    );
    for plugin in manager.list_plugins() {
        let required_by = manager.transitive_dependents(&plugin.id).join(", ");
        let detail = plugin
            .starting_error
            .as_ref()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| plugin.dependencies.join(", "));
        println!(
            "{:<16} {:<10} {:<10} {:<24} {}",
            plugin.id, plugin.version, plugin.state, required_by, detail
        );
    }
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_level(true),
        )
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(filter.into())
                .add_directive("notify=warn".parse()?),
        )
        .init();

    Ok(())
}
