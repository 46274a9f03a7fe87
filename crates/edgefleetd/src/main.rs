//! edgefleetd — the EdgeFleet daemon.
//!
//! # Usage
//!
//! ```text
//! edgefleetd run --config /etc/edgefleet/edgefleet.toml --data-dir /var/lib/edgefleet
//! edgefleetd check-config --config /etc/edgefleet/edgefleet.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use edgefleet_cluster::MemoryCluster;
use edgefleet_core::FleetConfig;
use edgefleetd::Fleet;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,edgefleetd=debug,edgefleet=debug";

#[derive(Parser)]
#[command(name = "edgefleetd", about = "EdgeFleet control plane daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane until interrupted.
    Run {
        /// Path to the TOML config file.
        #[arg(long)]
        config: PathBuf,

        /// Directory for the database and the software key; overrides
        /// `storage.path` and `software.key_file`.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = LogFormat::Text)]
        log_format: LogFormat,
    },
    /// Parse and validate a config file, then print the effective config.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            data_dir,
            log_format,
        } => {
            init_tracing(log_format);
            run(config, data_dir).await
        }
        Command::CheckConfig { config } => {
            let config = FleetConfig::from_file(&config)?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn run(config_path: PathBuf, data_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let mut config = FleetConfig::from_file(&config_path)?;
    if let Some(dir) = data_dir {
        std::fs::create_dir_all(&dir)?;
        config.storage.path = dir.join("edgefleet.db");
        config.software.key_file = dir.join("software.key");
    }
    info!(config = %config_path.display(), "edgefleetd starting");

    // No external cluster client is linked in; the in-process backend
    // stands in for the cluster API.
    warn!("using the in-memory cluster backend");
    let cluster = Arc::new(MemoryCluster::new());

    let fleet = Fleet::start(&config, cluster).await?;

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    fleet.shutdown().await;
    Ok(())
}
