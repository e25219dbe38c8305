//! `hearth` — serve a simulated smart home over a Home-Assistant-
//! compatible API.

mod config;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use config::ServeFileConfig;
use hearth_behaviors::home::HomeConfig;
use hearth_behaviors::simulator::{Simulator, SimulatorConfig};
use hearth_gateway::server::{ApiServer, ApiServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hearth", version, about = "Smart-home simulator with a Home-Assistant-compatible API")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the live simulator and API server.
    Serve(ServeArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Host to bind.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind.
    #[arg(long, default_value_t = 8123)]
    port: u16,

    /// Time acceleration factor (1.0 = real time).
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// Initial simulated time (RFC 3339); defaults to now.
    #[arg(long)]
    start_time: Option<String>,

    /// Start with the clock paused.
    #[arg(long)]
    paused: bool,

    /// Master seed for all random behavior.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// YAML config describing homes; without it a demo home is created.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await,
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let start_time = args
        .start_time
        .as_deref()
        .map(|raw| {
            raw.parse::<DateTime<Utc>>()
                .with_context(|| format!("bad --start-time {raw:?}"))
        })
        .transpose()?;

    let file_config = args
        .config
        .as_deref()
        .map(ServeFileConfig::load)
        .transpose()?
        .unwrap_or_default();

    let simulator = Arc::new(Simulator::new(SimulatorConfig {
        start_time,
        speed: args.speed,
        paused: args.paused,
        seed: args.seed,
        region: file_config.region.clone().unwrap_or_else(|| "north".into()),
        ..SimulatorConfig::default()
    })?);

    let homes = file_config.all_homes();
    if homes.is_empty() {
        info!("no homes configured; creating demo home");
        let mut demo = HomeConfig::new("demo_home");
        demo.features.energy_monitoring = true;
        demo.occupancy = Some(Default::default());
        demo.residents = vec!["resident".into()];
        simulator.create_home(&demo)?;
    } else {
        for home in &homes {
            simulator.create_home(home)?;
        }
    }

    let stats = simulator.stats();
    info!(
        entities = stats.entities,
        domains = ?stats.domains,
        speed = stats.speed,
        "initialized"
    );

    simulator.start();

    let server = ApiServer::new(
        ApiServerConfig {
            host: args.host,
            port: args.port,
        },
        simulator.clone(),
    );
    let result = server.start().await;

    simulator
        .stop(Duration::from_secs(5))
        .await
        .context("stopping simulator")?;
    result.context("API server")
}
