//! Beck miner: fetches block templates over RPC, searches the nonce
//! space, and submits solutions.
//!
//! The event loop alternates status poll, template fetch, cancellable
//! nonce search, and submission. The search runs on a blocking thread and
//! is abandoned when the chain tip reaches the template height or the
//! process is interrupted; RPC errors back off for a fixed five seconds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use beck_core::address::Address;
use beck_core::constants::MINER_BACKOFF_SECS;
use beck_core::pow::{self, SearchOutcome};
use beck_core::types::{Block, Hash256, Transaction};

/// CLI arguments for the miner.
#[derive(Debug, Parser)]
#[command(name = "beck-miner")]
#[command(about = "Standalone miner for the Beck network", long_about = None)]
struct Args {
    /// RPC endpoint of a beck-node.
    #[arg(long, default_value = "http://127.0.0.1:50051")]
    rpc_endpoint: String,

    /// Address to receive block rewards (required).
    #[arg(long)]
    miner_address: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// JSON RPC response for getblockchainstatus.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StatusJson {
    height: u64,
    latest_block_hash: String,
    difficulty: u32,
}

/// JSON RPC response for getblocktemplate.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BlockTemplateJson {
    prev_block_hash: String,
    timestamp: i64,
    difficulty: u32,
    nonce: i64,
    height: u64,
    transactions: String,
}

/// JSON RPC response for submitblock.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SubmitBlockJson {
    success: bool,
    block_hash: Option<String>,
    error_message: Option<String>,
}

async fn fetch_status(client: &HttpClient) -> Result<StatusJson> {
    client
        .request("getblockchainstatus", ArrayParams::new())
        .await
        .context("failed to fetch blockchain status")
}

async fn fetch_template(client: &HttpClient, miner_address: &str) -> Result<BlockTemplateJson> {
    let mut params = ArrayParams::new();
    params.insert(miner_address).ok();
    client
        .request("getblocktemplate", params)
        .await
        .context("failed to fetch block template")
}

async fn submit_block(client: &HttpClient, block: &Block, hash: &Hash256, nonce: i64) -> Result<SubmitBlockJson> {
    let encoded = bincode::encode_to_vec(block, bincode::config::standard())
        .context("failed to serialize block")?;
    let mut params = ArrayParams::new();
    params.insert(hex::encode(encoded)).ok();
    params.insert(hash.to_string()).ok();
    params.insert(nonce).ok();
    client
        .request("submitblock", params)
        .await
        .context("failed to submit block")
}

/// Reconstruct the unmined block from a template.
fn template_to_block(template: &BlockTemplateJson) -> Result<Block> {
    let prev_block_hash = Hash256::from_hex(&template.prev_block_hash)
        .context("invalid prev_block_hash in template")?;
    let tx_bytes =
        hex::decode(&template.transactions).context("invalid transactions hex")?;
    let (transactions, _): (Vec<Transaction>, usize) =
        bincode::decode_from_slice(&tx_bytes, bincode::config::standard())
            .context("failed to decode template transactions")?;

    Ok(Block {
        timestamp: template.timestamp,
        transactions,
        prev_block_hash,
        hash: Hash256::ZERO,
        nonce: template.nonce,
        height: template.height,
        difficulty: template.difficulty,
    })
}

async fn backoff() {
    tokio::time::sleep(Duration::from_secs(MINER_BACKOFF_SECS)).await;
}

/// Search the template's nonce space, abandoning the attempt when the
/// chain tip reaches the template height or `shutdown` is raised.
async fn mine_template(
    client: &HttpClient,
    block: &Block,
    shutdown: &AtomicBool,
) -> Result<SearchOutcome> {
    let cancel = Arc::new(AtomicBool::new(false));
    let mut handle = tokio::task::spawn_blocking({
        let block = block.clone();
        let cancel = Arc::clone(&cancel);
        move || pow::search(&block, &cancel)
    });

    let mut poll = tokio::time::interval(Duration::from_secs(1));
    poll.tick().await; // first tick completes immediately
    loop {
        tokio::select! {
            outcome = &mut handle => {
                return outcome.context("nonce search task panicked");
            }
            _ = poll.tick() => {
                if shutdown.load(Ordering::Relaxed) {
                    cancel.store(true, Ordering::Relaxed);
                    continue;
                }
                if let Ok(status) = fetch_status(client).await {
                    if status.height >= block.height {
                        info!(
                            height = status.height,
                            "tip advanced past template; abandoning search"
                        );
                        cancel.store(true, Ordering::Relaxed);
                    }
                }
            }
        }
    }
}

async fn run(client: HttpClient, miner_address: String, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Relaxed) {
        let status = match fetch_status(&client).await {
            Ok(status) => status,
            Err(e) => {
                error!("{e:#}");
                backoff().await;
                continue;
            }
        };
        info!(
            height = status.height,
            difficulty = status.difficulty,
            tip = %status.latest_block_hash,
            "chain status"
        );

        let template = match fetch_template(&client, &miner_address).await {
            Ok(template) => template,
            Err(e) => {
                error!("{e:#}");
                backoff().await;
                continue;
            }
        };
        let block = match template_to_block(&template) {
            Ok(block) => block,
            Err(e) => {
                error!("failed to parse template: {e:#}");
                backoff().await;
                continue;
            }
        };
        info!(
            height = block.height,
            txs = block.transactions.len(),
            difficulty = block.difficulty,
            "mining template"
        );

        let outcome = match mine_template(&client, &block, &shutdown).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("{e:#}");
                backoff().await;
                continue;
            }
        };
        let (nonce, hash) = match outcome {
            SearchOutcome::Found { nonce, hash } => (nonce, hash),
            SearchOutcome::Cancelled => continue,
            SearchOutcome::Exhausted => {
                warn!("nonce space exhausted; fetching a fresh template");
                continue;
            }
        };
        info!(height = block.height, nonce, %hash, "found block");

        match submit_block(&client, &block, &hash, nonce).await {
            Ok(response) if response.success => {
                info!(
                    hash = response.block_hash.as_deref().unwrap_or_default(),
                    "block accepted"
                );
            }
            Ok(response) => {
                // A stale tip is the common cause; fetch a new template.
                warn!(
                    reason = response.error_message.as_deref().unwrap_or("unknown"),
                    "block rejected"
                );
            }
            Err(e) => {
                error!("{e:#}");
                backoff().await;
            }
        }
    }

    info!("miner shutting down");
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

    info!("beck-miner v{}", env!("CARGO_PKG_VERSION"));

    // Validate the reward address before doing any work.
    let _: Address = args
        .miner_address
        .parse()
        .context("invalid miner address")?;

    let client = HttpClientBuilder::default()
        .build(&args.rpc_endpoint)
        .context("failed to create RPC client")?;

    let status = fetch_status(&client)
        .await
        .context("failed to connect to RPC server")?;
    info!(
        endpoint = %args.rpc_endpoint,
        height = status.height,
        "connected to node"
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_signal = Arc::clone(&shutdown);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        warn!("received interrupt, shutting down...");
        shutdown_signal.store(true, Ordering::Relaxed);
    });

    run(client, args.miner_address, shutdown).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_round_trips_to_block() {
        let coinbase = Transaction::coinbase(
            Address::from_bytes([7; 20]),
            b"Mining reward 1",
            beck_core::amount::Amount::ZERO,
        )
        .unwrap();
        let txs = vec![coinbase];
        let template = BlockTemplateJson {
            prev_block_hash: Hash256([0x11; 32]).to_string(),
            timestamp: 1_700_000_000,
            difficulty: 24,
            nonce: 0,
            height: 3,
            transactions: hex::encode(
                bincode::encode_to_vec(&txs, bincode::config::standard()).unwrap(),
            ),
        };

        let block = template_to_block(&template).unwrap();
        assert_eq!(block.height, 3);
        assert_eq!(block.difficulty, 24);
        assert_eq!(block.prev_block_hash, Hash256([0x11; 32]));
        assert_eq!(block.transactions, txs);
        assert!(block.hash.is_zero());
    }

    #[test]
    fn template_rejects_bad_hex() {
        let template = BlockTemplateJson {
            prev_block_hash: "zz".into(),
            timestamp: 0,
            difficulty: 1,
            nonce: 0,
            height: 1,
            transactions: String::new(),
        };
        assert!(template_to_block(&template).is_err());
    }
}
