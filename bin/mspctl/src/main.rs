//! ---
//! msp_section: "06-tooling"
//! msp_subsection: "binary"
//! msp_type: "source"
//! msp_scope: "code"
//! msp_description: "Command-line entrypoint for talking to MSP flight controllers."
//! msp_version: "v0.0.0-prealpha"
//! msp_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use msp_common::{init_tracing, AppConfig, PendingPolicy, ProtocolPreference};
use msp_transport::Endpoint;
use tracing::info;

mod client;
mod simulate;

#[derive(Debug, Parser)]
#[command(author, version, about = "MSP flight controller client", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", global = true, help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        value_name = "ENDPOINT",
        global = true,
        help = "Link to open: tcp://host:port, serial:///dev/ttyACM0?baud=115200, or a bare port"
    )]
    endpoint: Option<Endpoint>,

    #[arg(long, value_name = "MS", global = true, help = "Override the request timeout")]
    timeout_ms: Option<u64>,

    #[arg(long, value_enum, global = true, help = "Override the outgoing frame layout")]
    protocol: Option<CliProtocol>,

    #[arg(long, global = true, help = "Queue same-code requests instead of failing fast")]
    queue: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliProtocol {
    Auto,
    V1,
    V2,
}

impl From<CliProtocol> for ProtocolPreference {
    fn from(value: CliProtocol) -> Self {
        match value {
            CliProtocol::Auto => ProtocolPreference::Auto,
            CliProtocol::V1 => ProtocolPreference::V1,
            CliProtocol::V2 => ProtocolPreference::V2,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Query flight controller identity and status")]
    Probe,
    #[command(about = "Request one command and print the decoded reply")]
    Get(client::GetArgs),
    #[command(about = "Stream MSP2_SENSOR_GPS fixes and read back MSP_RAW_GPS")]
    GpsInject(client::GpsInjectArgs),
    #[command(about = "List the commands the registry knows")]
    Commands,
    #[command(about = "Serve a simulated flight controller over TCP")]
    Simulate(simulate::SimulateArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, source) = load_config(&cli)?;
    init_tracing("mspctl", &config.logging)?;
    match &source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("no configuration file, using defaults"),
    }

    match cli.command {
        Commands::Probe => client::probe(&config).await,
        Commands::Get(args) => client::get(&config, args).await,
        Commands::GpsInject(args) => client::gps_inject(&config, args).await,
        Commands::Commands => client::list_commands(&config),
        Commands::Simulate(args) => simulate::run(&config, args).await,
    }
}

fn load_config(cli: &Cli) -> Result<(AppConfig, Option<PathBuf>)> {
    let (mut config, source) = match &cli.config {
        Some(path) => {
            let config = AppConfig::load(std::slice::from_ref(path))
                .with_context(|| format!("loading {}", path.display()))?;
            (config, Some(path.clone()))
        }
        None => {
            let loaded = AppConfig::load_or_default(&["configs/mspctl.toml", "mspctl.toml"])?;
            (loaded.config, loaded.source)
        }
    };

    if let Some(endpoint) = &cli.endpoint {
        config.connection.endpoint = endpoint.clone();
    }
    if let Some(ms) = cli.timeout_ms {
        config.engine.request_timeout = Duration::from_millis(ms);
    }
    if let Some(protocol) = cli.protocol {
        config.engine.protocol = protocol.into();
    }
    if cli.queue {
        config.engine.pending_policy = PendingPolicy::Queue;
    }
    config.validate()?;
    Ok((config, source))
}
