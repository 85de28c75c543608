//! wrtflash CLI
//!
//! Finds OpenWrt routers on the local network and flashes firmware onto
//! them over SSH:
//! - `scan` / `check` to find and identify devices
//! - `connect` to test credentials
//! - `install` to run the staged upgrade
//! - `releases` / `config` for firmware and settings

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wf_connection::{connect_system, ConnectionManager};
use wf_core::config::{self, AppConfig};
use wf_core::types::{Address, FirmwareDescriptor};
use wrtflash::commands::{self, FirmwareChoice};
use wrtflash::output::print_warning;

#[derive(Parser)]
#[command(name = "wrtflash")]
#[command(author, version, about = "Discover OpenWrt routers and flash firmware over SSH")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find routers reachable over SSH on the local network
    Scan {
        /// Additional subnet to sweep (CIDR, /16 to /30)
        #[arg(short, long = "subnet", value_name = "CIDR")]
        subnets: Vec<String>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Probe and identify a single address
    Check {
        /// Device address
        address: Address,
    },

    /// Log in to a device and show its board information
    Connect {
        /// Device address
        address: Address,
        /// Root password (empty when omitted)
        #[arg(short, long, env = "WRTFLASH_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Flash firmware onto a device
    Install {
        /// Device address
        address: Address,
        /// Firmware image URL
        #[arg(
            long,
            required_unless_present = "release",
            conflicts_with = "release",
            requires = "version"
        )]
        url: Option<String>,
        /// Version string of the image given with --url
        #[arg(long, requires = "url")]
        version: Option<String>,
        /// Board tag the image supports (repeatable)
        #[arg(long = "device", value_name = "TAG")]
        devices: Vec<String>,
        /// Target architecture of the image
        #[arg(long)]
        arch: Option<String>,
        /// Expected SHA-256 of the image
        #[arg(long)]
        sha256: Option<String>,
        /// Text the device's version marker must contain after the flash
        #[arg(long, value_name = "TEXT")]
        marker: Option<String>,
        /// Install this version from the release feed instead of --url
        #[arg(long, value_name = "VERSION")]
        release: Option<String>,
        /// Root password (empty when omitted)
        #[arg(short, long, env = "WRTFLASH_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        /// Keep the device configuration across the flash
        #[arg(long)]
        keep_settings: bool,
    },

    /// List firmware releases
    Releases {
        /// Only releases supporting this board name
        #[arg(short, long)]
        board: Option<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show config file path
    Path,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config_path = cli.config.unwrap_or_else(config::default_config_path);

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(&config_path),
            ConfigAction::Path => {
                println!("{}", config_path.display());
                Ok(())
            }
            ConfigAction::Init { force } => commands::config_init(&config_path, force),
        },
        command => {
            let config = config::load_or_default(&config_path)
                .with_context(|| format!("Failed to load config from {:?}", config_path))?;
            tracing::debug!("Using configuration from {:?}", config_path);
            run_device_command(command, config).await
        }
    }
}

/// Run a command that talks to devices, closing every session afterwards
async fn run_device_command(command: Commands, config: AppConfig) -> Result<()> {
    let connections = Arc::new(connect_system(config.connection.clone()));

    let result = tokio::select! {
        result = dispatch(command, config, Arc::clone(&connections)) => result,
        _ = tokio::signal::ctrl_c() => {
            print_warning("Interrupted; closing connections");
            Err(anyhow::anyhow!("Interrupted"))
        }
    };

    connections.close_all().await;
    result
}

async fn dispatch(
    command: Commands,
    config: AppConfig,
    connections: Arc<ConnectionManager>,
) -> Result<()> {
    match command {
        Commands::Scan { subnets, json } => {
            commands::scan_command(connections, config.discovery, &subnets, json).await
        }

        Commands::Check { address } => {
            commands::check_command(connections, config.discovery, address).await
        }

        Commands::Connect { address, password } => {
            commands::connect_command(&connections, address, password.as_deref().unwrap_or(""))
                .await
        }

        Commands::Install {
            address,
            url,
            version,
            devices,
            arch,
            sha256,
            marker,
            release,
            password,
            keep_settings,
        } => {
            let choice = match (release, url) {
                (Some(release), _) => FirmwareChoice::Release(release),
                (None, Some(url)) => FirmwareChoice::Manual(FirmwareDescriptor {
                    supported_devices: devices,
                    architecture: arch.unwrap_or_default(),
                    sha256,
                    ..FirmwareDescriptor::new(version.unwrap_or_default(), url)
                }),
                (None, None) => anyhow::bail!("Either --url or --release is required"),
            };

            let mut upgrade = config.upgrade;
            upgrade.keep_settings |= keep_settings;

            commands::install_command(
                connections,
                upgrade,
                config.releases,
                address,
                choice,
                marker,
                password.as_deref().unwrap_or(""),
            )
            .await
        }

        Commands::Releases { board } => {
            commands::releases_command(config.releases, board.as_deref()).await
        }

        Commands::Config { .. } => anyhow::bail!("Config commands do not talk to devices"),
    }
}
