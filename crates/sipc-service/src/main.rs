use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sipc_service::config::ServiceConfig;
use sipc_service::service::{KeyStorage, SecureService};

#[derive(Parser)]
#[command(name = "sipc-service")]
#[command(about = "Secure IPC responder daemon")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keep the identity in memory only (new keypair on every start)
    #[arg(long)]
    ephemeral: bool,

    /// Log level (overrides the configuration file)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => ServiceConfig::load_from_file(path)?,
        None => ServiceConfig::load_from_env()?,
    };
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "sipc_service={lvl},sipc_core={lvl},sipc_crypto={lvl}",
            lvl = config.log_level
        ))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting sipc-service");

    let storage = if args.ephemeral {
        KeyStorage::Ephemeral
    } else {
        KeyStorage::Persistent
    };
    let mut service = SecureService::start(&config, storage).await?;
    info!(
        addr = %service.local_addr(),
        fingerprint = service.fingerprint(),
        "sipc-service started"
    );

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    service.stop().await?;
    let stats = service.stats().snapshot();
    info!(
        received = stats.received,
        dispatched = stats.dispatched,
        dropped = stats.dropped,
        "sipc-service stopped"
    );

    Ok(())
}
