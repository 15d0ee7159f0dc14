//! Beck node entry point: chain bootstrap, mining RPC server, and the
//! HTTP read API.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use beck_core::address::Address;
use beck_core::constants::INITIAL_DIFFICULTY;
use beck_node_lib::api::{self, ApiState};
use beck_node_lib::chain::Chain;
use beck_node_lib::config::{NodeConfig, DEFAULT_API_PORT, DEFAULT_RPC_PORT};
use beck_node_lib::coordinator::MiningCoordinator;
use beck_node_lib::rpc;

/// CLI arguments for the node.
#[derive(Debug, Parser)]
#[command(name = "beck-node")]
#[command(about = "Beck proof-of-work cryptocurrency node", long_about = None)]
struct Args {
    /// Address rewarded by the genesis block (required).
    #[arg(long, env = "GENESIS_ADDRESS")]
    genesis_address: String,

    /// Data directory for the block store.
    #[arg(long, default_value = "beck-data")]
    data_dir: PathBuf,

    /// Bind address for the mining RPC server.
    #[arg(long, default_value = "127.0.0.1")]
    rpc_bind: String,

    /// Port for the mining RPC server.
    #[arg(long, default_value_t = DEFAULT_RPC_PORT)]
    rpc_port: u16,

    /// Bind address for the HTTP read API.
    #[arg(long, default_value = "127.0.0.1")]
    api_bind: String,

    /// Port for the HTTP read API.
    #[arg(long, default_value_t = DEFAULT_API_PORT)]
    api_port: u16,

    /// Difficulty used when creating a fresh chain.
    #[arg(long, default_value_t = INITIAL_DIFFICULTY)]
    initial_difficulty: u32,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .init();

    info!("beck-node v{}", env!("CARGO_PKG_VERSION"));

    let genesis_address: Address = args
        .genesis_address
        .parse()
        .context("invalid genesis address")?;

    let config = NodeConfig {
        data_dir: args.data_dir,
        genesis_address,
        rpc_bind: args.rpc_bind,
        rpc_port: args.rpc_port,
        api_bind: args.api_bind,
        api_port: args.api_port,
        initial_difficulty: args.initial_difficulty,
        log_level: args.log_level,
    };

    let db_path = config.db_path();
    let chain = if db_path.exists() {
        Chain::open(&db_path).context("failed to open chain")?
    } else {
        Chain::create(&db_path, config.genesis_address, config.initial_difficulty)
            .context("failed to create chain")?
    };
    info!(height = chain.height(), tip = %chain.tip_hash(), "chain ready");

    let coordinator = Arc::new(MiningCoordinator::new(chain));

    // Read API in a background task; the RPC server owns its own listener.
    let api_state = ApiState::new(Arc::clone(&coordinator));
    let api_addr: SocketAddr = config
        .api_addr()
        .parse()
        .context("invalid read API address")?;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_state, api_addr).await {
            error!("read API server failed: {e}");
        }
    });

    let rpc_handle = rpc::serve(Arc::clone(&coordinator), &config.rpc_addr())
        .await
        .context("failed to start mining RPC server")?;

    tokio::signal::ctrl_c().await.ok();
    info!("shutting down");
    rpc_handle.stop().ok();
    Ok(())
}
