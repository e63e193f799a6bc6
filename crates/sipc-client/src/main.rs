use clap::Parser;
use std::path::PathBuf;
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sipc_client::config::ClientConfig;
use sipc_client::console::{failure_text, Console};
use sipc_core::tcp::TcpHub;
use sipc_core::Initiator;

#[derive(Parser)]
#[command(name = "sipc-client")]
#[command(about = "Send lines to the secure IPC service and print its answers")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Service address (overrides the configuration)
    #[arg(short, long)]
    server: Option<String>,

    /// Log level (overrides the configuration file)
    #[arg(short, long)]
    log_level: Option<String>,
}

const NOT_CONNECTED: &str = "Could not connect to Secure Service.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => ClientConfig::load_from_file(path)?,
        None => ClientConfig::load_from_env()?,
    };
    if let Some(server) = args.server {
        config.server_addr = server;
        config.validate()?;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    // Initialize tracing; logs go to stderr so stdout carries only responses
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "sipc_client={lvl},sipc_core={lvl}",
            lvl = config.log_level
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let (hub, events) = TcpHub::new();
    let conn = match hub.connect(config.socket_addr()?).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!("connect failed: {}", e);
            eprintln!("{}", NOT_CONNECTED);
            std::process::exit(1);
        }
    };

    let initiator = Initiator::spawn(hub.clone(), conn, events);
    if let Err(e) = initiator.connect(conn).await {
        eprintln!("{}", failure_text(&e));
        std::process::exit(1);
    }
    match tokio::time::timeout(config.handshake_timeout(), initiator.established()).await {
        Ok(Ok(())) => info!(server = %config.server_addr, "secure session established"),
        Ok(Err(e)) => {
            warn!("handshake abandoned: {}", e);
            eprintln!("{}", NOT_CONNECTED);
            std::process::exit(1);
        }
        Err(_) => {
            // No NACK exists; a failed handshake simply never completes.
            warn!("handshake did not complete in time");
            eprintln!("{}", NOT_CONNECTED);
            std::process::exit(1);
        }
    }

    let mut console = Console::new(tokio::io::stdout());
    console
        .run(
            &initiator,
            BufReader::new(tokio::io::stdin()),
            config.response_timeout(),
        )
        .await?;

    initiator.shutdown();
    hub.close(conn);
    Ok(())
}
