//! Lanwatch CLI - LAN discovery service
//!
//! This binary can:
//! - Run a one-shot scan of the local network (or a given subnet)
//! - Serve the HTTP API and node gateway with scheduled scans
//! - Show where configuration is read from

mod daemon;

use std::sync::Arc;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use lanwatch_core::config::{self, LoadedConfig};
use lanwatch_core::scan::ScanDisposition;
use lanwatch_core::{Device, ScanCoordinator, ScanRequest};

#[derive(Parser)]
#[command(name = "lanwatch")]
#[command(version)]
#[command(about = "LAN discovery service with an HTTP API and node gateway")]
#[command(long_about = "
Lanwatch discovers hosts on the local network, tracks when they come and
go, and exposes the results over HTTP. Remote agents can report in over
the node gateway WebSocket.

Quick start:
  1. One-off scan:     lanwatch scan
  2. Run the service:  lanwatch serve
  3. Show config:      lanwatch config
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API, node gateway and scheduled scans
    Serve {
        /// Address to listen on (overrides server.bind)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Scan once and print the devices found
    Scan {
        /// Subnet in CIDR notation; defaults to the local interface's
        #[arg(short, long)]
        subnet: Option<String>,

        /// Per-probe connect timeout in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<i64>,
    },

    /// Show configuration paths and settings
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("lanwatch={},lanwatch_core={}", log_level, log_level).into()),
        )
        .with_target(false)
        .init();

    let loaded = config::load_config();

    match &cli.command {
        Commands::Serve { bind } => {
            let mut config = loaded.config;
            if let Some(bind) = bind {
                config.server.bind = bind.clone();
            }
            daemon::run_service(config).await
        }
        Commands::Scan { subnet, timeout_ms } => cmd_scan(&cli, loaded, subnet.as_deref(), *timeout_ms).await,
        Commands::Config => cmd_config(&cli, &loaded),
    }
}

async fn cmd_scan(cli: &Cli, loaded: LoadedConfig, subnet: Option<&str>, timeout_ms: Option<i64>) -> Result<()> {
    if let Some(subnet) = subnet {
        lanwatch_core::validation::validate_cidr(subnet)?;
    }
    let timeout_ms = timeout_ms.map(lanwatch_core::validation::validate_timeout).transpose()?;

    let registry = daemon::build_registry(&loaded.config)?;
    let coordinator = Arc::new(ScanCoordinator::from_config(&loaded.config, registry));
    let mut progress = coordinator.subscribe();

    let request = ScanRequest::manual(subnet).with_timeout_ms(timeout_ms).forced();
    let outcome = coordinator.request_scan(request).await;
    let generation = match outcome.disposition {
        ScanDisposition::Started { generation } => generation,
        ScanDisposition::Blocked(phase) => {
            let p = coordinator.progress();
            let reason = p.message.unwrap_or_else(|| phase.to_string());
            match p.fix_action {
                Some(fix) => bail!("Scan blocked ({}): {} [fix: {}]", phase, reason, fix),
                None => bail!("Scan blocked ({}): {}", phase, reason),
            }
        }
        ScanDisposition::Throttled => bail!("Scan throttled; try again shortly"),
    };

    if let OutputFormat::Text = cli.format {
        println!("Scanning {}...", coordinator.progress().subnet.unwrap_or_default());
    }

    let mut last_pct = None;
    loop {
        let current = progress.borrow_and_update().clone();
        if current.generation == generation {
            if let OutputFormat::Text = cli.format {
                if last_pct != Some(current.progress_pct) && current.progress_pct % 10 == 0 {
                    println!("  [{:>3}%] {} device(s) found", current.progress_pct, current.devices_found);
                    last_pct = Some(current.progress_pct);
                }
            }
            if current.phase.is_terminal() {
                break;
            }
        }
        if progress.changed().await.is_err() {
            break;
        }
    }

    let devices = coordinator.results();
    match cli.format {
        OutputFormat::Text => print_devices(&devices),
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "devices": devices,
                    "progress": coordinator.progress(),
                })
            );
        }
    }
    Ok(())
}

fn print_devices(devices: &[Device]) {
    println!();
    println!("Found {} devices:", devices.len());
    println!();
    for device in devices {
        let mac = device.mac.as_deref().unwrap_or("-");
        let vendor = device.vendor.as_deref().unwrap_or("");
        let ports = device
            .open_ports
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",");

        if vendor.is_empty() {
            println!("  {:15} {:17}  {}  [{}]", device.ip, mac, device.display_name(), ports);
        } else {
            println!(
                "  {:15} {:17}  {} ({})  [{}]",
                device.ip,
                mac,
                device.display_name(),
                vendor,
                ports
            );
        }
    }
}

fn cmd_config(cli: &Cli, loaded: &LoadedConfig) -> Result<()> {
    let config_path = loaded
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(config::get_config_file_path_string);
    let state_path = loaded
        .config
        .storage
        .path
        .clone()
        .or_else(config::default_state_path)
        .map(|p| p.display().to_string());

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration");
            println!("=============");
            println!();
            println!("Config file:      {} (from {})", config_path, loaded.source);
            println!("Listen address:   {}", loaded.config.server.bind);
            println!(
                "API token:        {}",
                if loaded.config.server.api_token.is_some() { "set" } else { "not set" }
            );
            println!("State file:       {}", state_path.as_deref().unwrap_or("-"));
            println!();
            println!("Environment variables:");
            println!("  {} - Path to a config file", config::ENV_CONFIG_PATH);
            println!("  {} - Override listen address", config::ENV_BIND);
            println!("  {} - Override API token", config::ENV_API_TOKEN);
            println!();
            println!("Example config.toml:");
            println!();
            println!("{}", config::generate_example_config());
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "config_file": config_path,
                    "source": loaded.source.to_string(),
                    "state_file": state_path,
                    "config": loaded.config,
                })
            );
        }
    }

    Ok(())
}
