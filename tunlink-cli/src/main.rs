//! Tunlink CLI
//!
//! A command-line interface for driving the tunnel control bridge.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tunlink_bridge::{observer, BridgeConfig, ServiceResponse, TunnelBridge};

/// Tunlink - control bridge for the tunnel extension
#[derive(Parser)]
#[command(name = "tunlink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the tunnel profile
    Install,

    /// Start the tunnel
    Start {
        /// Path to a JSON tunnel configuration; omitted means the
        /// profile's last-persisted configuration
        #[arg(short = 'f', long)]
        config_file: Option<PathBuf>,
    },

    /// Stop the tunnel
    Stop,

    /// Query tunnel status
    Status,

    /// Remove and recreate the tunnel profile
    Reinstall,

    /// Watch tunnel state changes until interrupted
    Watch,

    /// Generate a sample configuration file
    GenConfig {
        /// Output path for the configuration file
        #[arg(short, long, default_value = "tunlink.toml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    if let Commands::GenConfig { output } = &cli.command {
        return generate_config(output);
    }

    let config = load_config(cli.config.as_deref())?;
    let bridge = TunnelBridge::new(config).context("Failed to create tunnel bridge")?;

    match cli.command {
        Commands::Install => print_response(bridge.install()),
        Commands::Start { config_file } => {
            let config = match config_file {
                Some(path) => Some(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {path:?}"))?,
                ),
                None => None,
            };
            print_response(bridge.start(config.as_deref()))
        }
        Commands::Stop => print_response(bridge.stop()),
        Commands::Status => print_response(bridge.status()),
        Commands::Reinstall => print_response(bridge.reinstall()),
        Commands::Watch => watch(&bridge),
        Commands::GenConfig { .. } => unreachable!("handled above"),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(path: Option<&std::path::Path>) -> Result<BridgeConfig> {
    match path {
        Some(path) => {
            let config = BridgeConfig::load(path)
                .with_context(|| format!("Failed to load configuration from {path:?}"))?;
            info!("Configuration loaded from {:?}", path);
            Ok(config)
        }
        None => Ok(BridgeConfig::default()),
    }
}

fn print_response(response: ServiceResponse) -> Result<()> {
    println!("{}", response.to_json());
    if response.is_ok() {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

fn watch(bridge: &TunnelBridge) -> Result<()> {
    bridge.set_state_callback(Some(observer(|state| {
        println!("{state}");
    })));

    info!("Watching tunnel state changes, press Ctrl-C to stop");
    bridge
        .runtime_handle()
        .block_on(tokio::signal::ctrl_c())
        .context("Failed to wait for Ctrl-C")?;

    bridge.set_state_callback(None);
    Ok(())
}

fn generate_config(output: &std::path::Path) -> Result<()> {
    std::fs::write(output, BridgeConfig::sample())
        .with_context(|| format!("Failed to write configuration to {output:?}"))?;
    info!("Sample configuration written to {:?}", output);
    Ok(())
}
