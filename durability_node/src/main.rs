/// # Durability Node
///
/// Entry point for the durability node: a service that keeps content-addressed
/// data available across a fleet of IPFS-style storage nodes and archives it
/// into Filecoin-style storage deals.
///
/// ## Usage
///
/// ```bash
/// # Write a default configuration
/// durability-node --config config.toml init-config
///
/// # Run the node
/// durability-node --config config.toml
/// ```
///
/// Any setting can be overridden from the environment, e.g.
/// `DURABILITY__API__PORT=9090`.
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use durability_node::api::ApiServer;
use durability_node::config::{ensure_default_config, Config};
use durability_node::runtime::DurabilityServices;
use durability_node::tasks::TaskScheduler;

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node (default)
    Run,

    /// Write a default configuration file if none exists
    InitConfig,
}

fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run(config: Config) -> anyhow::Result<()> {
    let services = Arc::new(
        DurabilityServices::from_config(&config)
            .await
            .context("Failed to initialize services")?,
    );

    let scheduler = Arc::new(TaskScheduler::new());
    services.register_background_tasks(&scheduler);
    scheduler
        .start()
        .await
        .context("Failed to start background tasks")?;

    let server = ApiServer::new(services, scheduler.clone());
    info!("Durability node running. Press Ctrl+C to stop.");

    tokio::select! {
        result = server.start() => {
            if let Err(e) = &result {
                error!("Server error: {}", e);
            }
            scheduler.stop().await;
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            scheduler.stop().await;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::InitConfig => {
            let config = ensure_default_config(&cli.config)
                .with_context(|| format!("Failed to prepare {}", cli.config.display()))?;
            init_logging(&config.logging.level);
            info!("Configuration ready at {}", cli.config.display());
            Ok(())
        }
        Commands::Run => {
            let config = Config::load(&cli.config)
                .with_context(|| format!("Failed to load {}", cli.config.display()))?;
            init_logging(&config.logging.level);
            info!("Configuration loaded from {}", cli.config.display());
            run(config).await
        }
    }
}
