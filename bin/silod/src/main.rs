//! Silo node daemon.
//!
//! Loads configuration, restores or generates the node identity, wires
//! the stores and overlay client into a node, and serves until ctrl-c.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use silo_node::{HttpOverlay, Node, NodeConfig, NodeState, StaticWallet};
use silo_protocol::{DirectKeySource, Identity};

#[derive(Parser)]
#[command(name = "silod")]
#[command(about = "Silo storage network node", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Transport port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Hostname advertised to peers (overrides config)
    #[arg(long)]
    hostname: Option<String>,

    /// Shard storage directory (overrides config)
    #[arg(long)]
    storage_path: Option<PathBuf>,

    /// Bytes of disk sold to the network (overrides config)
    #[arg(long)]
    allocated_bytes: Option<u64>,

    /// Payment address handed out for claimed contracts
    #[arg(long)]
    payment_address: Option<String>,

    /// Accept claims from any renter
    #[arg(long)]
    accept_all_claims: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &cli.config {
        Some(path) => NodeConfig::from_file(path)?,
        None => NodeConfig::default(),
    };
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(hostname) = cli.hostname {
        config.hostname = hostname;
    }
    if let Some(path) = cli.storage_path {
        config.storage.path = path;
    }
    if let Some(bytes) = cli.allocated_bytes {
        config.storage.allocated_bytes = bytes;
    }
    if cli.accept_all_claims {
        config.claims = vec!["*".to_string()];
    }
    config.validate()?;

    let identity = Identity::load_or_generate(&config.identity_path)?;
    info!(node_id = %identity.node_id(), "Starting Silo node");

    let wallet = Arc::new(StaticWallet::new(cli.payment_address));
    let state = Arc::new(NodeState::new(
        config,
        identity,
        Arc::new(DirectKeySource),
        wallet,
    )?);
    let overlay = Arc::new(HttpOverlay::new(state.contact()));
    let node = Node::new(state, overlay);

    let addr = node.listen().await?;
    info!(addr = %addr, "Node initialized");
    info!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    node.shutdown().await;

    Ok(())
}
