//! JSON-RPC server for mining coordination.
//!
//! Uses jsonrpsee 0.24 to expose the four coordinator methods to remote
//! miners: chain status, block templates, block submission, and the
//! pending-transaction snapshot. Hashes and ids travel as hex strings;
//! the template's transaction list travels as hex-encoded bincode so the
//! miner hashes exactly the bytes the node will validate.

use std::sync::Arc;

use jsonrpsee::core::async_trait;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use beck_core::types::{Block, Hash256, Transaction};

use crate::coordinator::{MiningCoordinator, SubmitOutcome};

/// JSON shape of the chain status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusJson {
    /// Current tip height.
    pub height: u64,
    /// Tip hash as hex.
    pub latest_block_hash: String,
    /// Difficulty in effect for the next block.
    pub difficulty: u32,
}

/// JSON shape of a block template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockTemplateJson {
    /// Parent hash as hex.
    pub prev_block_hash: String,
    /// Template timestamp (Unix seconds).
    pub timestamp: i64,
    /// Difficulty the block must be mined at.
    pub difficulty: u32,
    /// Initial nonce (always 0).
    pub nonce: i64,
    /// Height of the block being mined.
    pub height: u64,
    /// Hex-encoded bincode of the ordered transaction list.
    pub transactions: String,
}

/// JSON shape of a submission outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitBlockJson {
    pub success: bool,
    /// Accepted block hash as hex; absent on rejection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    /// Human-readable rejection reason; absent on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// JSON summary of a pending transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTxJson {
    pub tx_id: String,
    pub from: String,
    pub to: String,
    pub amount: String,
    pub fee: String,
}

/// JSON shape of the pending-transactions snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTransactionsJson {
    pub transactions: Vec<PendingTxJson>,
}

/// Parse a 64-character hex string into a [`Hash256`].
pub fn parse_hash(hex_str: &str) -> Result<Hash256, ErrorObjectOwned> {
    if hex_str.len() != 64 {
        return Err(rpc_error(-1, "hash must be 64 hex characters"));
    }
    Hash256::from_hex(hex_str).ok_or_else(|| rpc_error(-1, "invalid hex in hash"))
}

fn rpc_error(code: i32, msg: &str) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(code, msg.to_string(), None::<()>)
}

/// The mining coordination RPC interface.
#[rpc(server)]
pub trait MiningRpc {
    /// Returns the current tip height, hash, and difficulty.
    #[method(name = "getblockchainstatus")]
    async fn get_blockchain_status(&self) -> Result<StatusJson, ErrorObjectOwned>;

    /// Builds a block template paying `miner_address`.
    #[method(name = "getblocktemplate")]
    async fn get_block_template(
        &self,
        miner_address: String,
    ) -> Result<BlockTemplateJson, ErrorObjectOwned>;

    /// Submits a mined block (hex bincode of the template block, the
    /// claimed hash, and the winning nonce).
    #[method(name = "submitblock")]
    async fn submit_block(
        &self,
        block_hex: String,
        block_hash: String,
        nonce: i64,
    ) -> Result<SubmitBlockJson, ErrorObjectOwned>;

    /// Returns the current mempool snapshot.
    #[method(name = "getpendingtransactions")]
    async fn get_pending_transactions(
        &self,
    ) -> Result<PendingTransactionsJson, ErrorObjectOwned>;
}

/// Server-side implementation backed by the coordinator.
pub struct RpcServerImpl {
    coordinator: Arc<MiningCoordinator>,
}

impl RpcServerImpl {
    pub fn new(coordinator: Arc<MiningCoordinator>) -> Self {
        Self { coordinator }
    }
}

fn pending_tx_json(tx: &Transaction) -> PendingTxJson {
    PendingTxJson {
        tx_id: tx.id.to_string(),
        from: tx.from.to_string(),
        to: tx.to.to_string(),
        amount: tx.amount.to_string(),
        fee: tx.fee.to_string(),
    }
}

#[async_trait]
impl MiningRpcServer for RpcServerImpl {
    async fn get_blockchain_status(&self) -> Result<StatusJson, ErrorObjectOwned> {
        let status = self.coordinator.status();
        Ok(StatusJson {
            height: status.height,
            latest_block_hash: status.latest_hash.to_string(),
            difficulty: status.difficulty,
        })
    }

    async fn get_block_template(
        &self,
        miner_address: String,
    ) -> Result<BlockTemplateJson, ErrorObjectOwned> {
        let address = miner_address
            .parse()
            .map_err(|_| rpc_error(-1, "invalid miner address"))?;
        let template = self
            .coordinator
            .block_template(address)
            .map_err(|e| rpc_error(-1, &e.to_string()))?;

        let tx_bytes = bincode::encode_to_vec(
            &template.block.transactions,
            bincode::config::standard(),
        )
        .map_err(|e| rpc_error(-1, &e.to_string()))?;

        Ok(BlockTemplateJson {
            prev_block_hash: template.block.prev_block_hash.to_string(),
            timestamp: template.block.timestamp,
            difficulty: template.difficulty,
            nonce: template.block.nonce,
            height: template.block.height,
            transactions: hex::encode(tx_bytes),
        })
    }

    async fn submit_block(
        &self,
        block_hex: String,
        block_hash: String,
        nonce: i64,
    ) -> Result<SubmitBlockJson, ErrorObjectOwned> {
        let claimed_hash = parse_hash(&block_hash)?;
        let block_bytes =
            hex::decode(&block_hex).map_err(|_| rpc_error(-1, "invalid hex in block"))?;
        let (block, _): (Block, usize) =
            bincode::decode_from_slice(&block_bytes, bincode::config::standard())
                .map_err(|_| rpc_error(-1, "malformed block encoding"))?;

        match self.coordinator.submit_block(block, claimed_hash, nonce) {
            SubmitOutcome::Accepted { block_hash } => Ok(SubmitBlockJson {
                success: true,
                block_hash: Some(block_hash.to_string()),
                error_message: None,
            }),
            SubmitOutcome::Rejected { error_message } => Ok(SubmitBlockJson {
                success: false,
                block_hash: None,
                error_message: Some(error_message),
            }),
        }
    }

    async fn get_pending_transactions(
        &self,
    ) -> Result<PendingTransactionsJson, ErrorObjectOwned> {
        let transactions = self
            .coordinator
            .pending_transactions()
            .iter()
            .map(pending_tx_json)
            .collect();
        Ok(PendingTransactionsJson { transactions })
    }
}

/// Start the mining RPC server on `addr`.
pub async fn serve(
    coordinator: Arc<MiningCoordinator>,
    addr: &str,
) -> anyhow::Result<ServerHandle> {
    let server = Server::builder().build(addr).await?;
    let local_addr = server.local_addr()?;
    let handle = server.start(RpcServerImpl::new(coordinator).into_rpc());
    info!(%local_addr, "mining RPC server listening");
    Ok(handle)
}
